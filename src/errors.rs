// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the viewer
//!
//! Errors follow the pipeline's failure taxonomy:
//! - [`ConfigError`]: startup configuration problems, always fatal
//! - [`ResourceError`]: GPU resource lifecycle failures, fatal for the
//!   resolution they were raised for
//! - [`RenderError`]: per-tick failures inside a render procedure, recovered
//!   by skipping that draw
//! - [`DeviceError`]: device collaborator failures
//!
//! A tick without a fresher frame is normal operation and has no error type.

use crate::frame::Resolution;
use std::fmt;

/// Result type alias using ViewerError
pub type ViewerResult<T> = Result<T, ViewerError>;

/// Main viewer error type
#[derive(Debug, Clone)]
pub enum ViewerError {
    /// Configuration errors
    Config(ConfigError),
    /// GPU resource lifecycle errors
    Resource(ResourceError),
    /// Device errors
    Device(DeviceError),
    /// Terminal or other I/O errors
    Io(String),
    /// Generic error with message
    Other(String),
}

/// Configuration errors detected at initialization
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Device delivers a different resolution than configured
    ResolutionMismatch {
        configured: Resolution,
        device: Resolution,
    },
    /// A resolution with a zero dimension
    InvalidResolution(Resolution),
    /// A frame rate outside the accepted range
    InvalidFrameRate(u32),
    /// Unknown device name
    UnknownDevice(String),
    /// Config file could not be read or parsed
    Parse(String),
}

/// GPU resource lifecycle errors
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceError {
    /// Backend refused to create a resource
    CreationFailed { label: String, reason: String },
    /// Requested size does not match the configured size
    SizeMismatch {
        label: String,
        expected: Resolution,
        actual: Resolution,
    },
    /// Resolution is zero or exceeds the backend's limits
    InvalidSize(Resolution),
    /// Data does not fit the destination resource
    BufferTooSmall {
        label: String,
        capacity: u64,
        required: u64,
    },
    /// A handle that is not (or no longer) live was used
    Dangling(String),
    /// Resources were used before `initialize` or after `teardown`
    NotInitialized,
    /// Backend-specific failure (device lost, mapping failed, ...)
    Backend(String),
}

/// Per-tick render procedure errors
#[derive(Debug, Clone, PartialEq)]
pub enum RenderError {
    /// Source data resolution differs from the destination texture
    DimensionMismatch {
        texture: Resolution,
        source: Resolution,
    },
    /// A tracker output or frame the procedure needs is not available yet
    MissingInput(&'static str),
    /// Quadtree mesh exceeds the preallocated vertex/index buffers
    MeshTooLarge { vertices: usize, indices: usize },
    /// Underlying resource failure
    Resource(ResourceError),
}

/// Device collaborator errors
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// Device could not be opened or started
    StartFailed(String),
    /// Device is already streaming
    AlreadyStreaming,
    /// Device disconnected during operation
    Disconnected,
}

impl fmt::Display for ViewerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewerError::Config(e) => write!(f, "Configuration error: {}", e),
            ViewerError::Resource(e) => write!(f, "GPU resource error: {}", e),
            ViewerError::Device(e) => write!(f, "Device error: {}", e),
            ViewerError::Io(msg) => write!(f, "I/O error: {}", msg),
            ViewerError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ResolutionMismatch { configured, device } => write!(
                f,
                "Device resolution {} does not match configured camera resolution {}",
                device, configured
            ),
            ConfigError::InvalidResolution(res) => write!(f, "Invalid resolution {}", res),
            ConfigError::InvalidFrameRate(fps) => write!(f, "Invalid frame rate {}", fps),
            ConfigError::UnknownDevice(name) => write!(f, "Unknown device '{}'", name),
            ConfigError::Parse(msg) => write!(f, "Failed to load config: {}", msg),
        }
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::CreationFailed { label, reason } => {
                write!(f, "Failed to create '{}': {}", label, reason)
            }
            ResourceError::SizeMismatch {
                label,
                expected,
                actual,
            } => write!(
                f,
                "'{}' sized {} but {} is required",
                label, actual, expected
            ),
            ResourceError::InvalidSize(res) => write!(f, "Invalid resource size {}", res),
            ResourceError::BufferTooSmall {
                label,
                capacity,
                required,
            } => write!(
                f,
                "'{}' holds {} bytes but {} are required",
                label, capacity, required
            ),
            ResourceError::Dangling(handle) => write!(f, "Use of released resource {}", handle),
            ResourceError::NotInitialized => write!(f, "GPU resources are not initialized"),
            ResourceError::Backend(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::DimensionMismatch { texture, source } => write!(
                f,
                "Source is {} but destination texture is {}",
                source, texture
            ),
            RenderError::MissingInput(what) => write!(f, "No {} available", what),
            RenderError::MeshTooLarge { vertices, indices } => write!(
                f,
                "Mesh with {} vertices / {} indices exceeds buffer capacity",
                vertices, indices
            ),
            RenderError::Resource(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::StartFailed(msg) => write!(f, "Failed to start device: {}", msg),
            DeviceError::AlreadyStreaming => write!(f, "Device is already streaming"),
            DeviceError::Disconnected => write!(f, "Device disconnected"),
        }
    }
}

impl std::error::Error for ViewerError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for ResourceError {}
impl std::error::Error for RenderError {}
impl std::error::Error for DeviceError {}

impl From<ConfigError> for ViewerError {
    fn from(err: ConfigError) -> Self {
        ViewerError::Config(err)
    }
}

impl From<ResourceError> for ViewerError {
    fn from(err: ResourceError) -> Self {
        ViewerError::Resource(err)
    }
}

impl From<DeviceError> for ViewerError {
    fn from(err: DeviceError) -> Self {
        ViewerError::Device(err)
    }
}

impl From<ResourceError> for RenderError {
    fn from(err: ResourceError) -> Self {
        RenderError::Resource(err)
    }
}

impl From<std::io::Error> for ViewerError {
    fn from(err: std::io::Error) -> Self {
        ViewerError::Io(err.to_string())
    }
}

impl From<String> for ViewerError {
    fn from(msg: String) -> Self {
        ViewerError::Other(msg)
    }
}

impl From<&str> for ViewerError {
    fn from(msg: &str) -> Self {
        ViewerError::Other(msg.to_string())
    }
}
