// SPDX-License-Identifier: GPL-3.0-only

//! Persistent viewer configuration
//!
//! Stored as JSON at `<config_dir>/rgbd-viewer/config.json`. A missing file
//! yields the defaults; command-line flags override individual values.

use crate::backends::DeviceKind;
use crate::constants::*;
use crate::errors::ConfigError;
use crate::frame::Resolution;
use crate::input::KeyBindings;
use crate::render::DisplayMode;
use crate::tracker::PipelineOptions;
use crate::viewer::ViewerSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory name under the user's config and cache directories
pub const APP_DIR: &str = "rgbd-viewer";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Frame source
    pub device: DeviceKind,
    /// Resolution frames are expected in
    pub camera_resolution: Resolution,
    /// Device frame rate
    pub device_fps: u32,
    /// Render loop tick rate
    pub target_fps: u32,
    /// Off-screen frame buffer size used until the first reshape
    pub screen_resolution: Resolution,
    /// Off-screen pixels per terminal cell column
    pub render_scale: u32,
    /// Display mode at startup
    pub initial_mode: DisplayMode,
    pub pipeline: PipelineOptions,
    pub key_bindings: KeyBindings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: DeviceKind::default(),
            camera_resolution: Resolution::new(DEFAULT_CAMERA_WIDTH, DEFAULT_CAMERA_HEIGHT),
            device_fps: DEFAULT_DEVICE_FPS,
            target_fps: DEFAULT_TARGET_FPS,
            screen_resolution: Resolution::new(DEFAULT_SCREEN_WIDTH, DEFAULT_SCREEN_HEIGHT),
            render_scale: DEFAULT_RENDER_SCALE,
            initial_mode: DisplayMode::default(),
            pipeline: PipelineOptions::default(),
            key_bindings: KeyBindings::default(),
        }
    }
}

impl Config {
    /// Default location of the config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`, or from [`Config::default_path`] when `None`.
    /// A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => {
                    debug!("No config directory, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let text = fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_json(&text)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Parse and validate a JSON document
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let mut config: Config =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        let clamped = config.pipeline.clamped();
        if clamped != config.pipeline {
            warn!(from = ?config.pipeline, to = ?clamped, "Pipeline options out of range, clamped");
            config.pipeline = clamped;
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Write to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ConfigError::Parse(format!("{}: {}", parent.display(), e)))?;
        }
        fs::write(path, self.to_json()?)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))
    }

    /// Reject values the viewer cannot start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        for resolution in [self.camera_resolution, self.screen_resolution] {
            if resolution.is_empty()
                || resolution.width > MAX_TEXTURE_DIMENSION
                || resolution.height > MAX_TEXTURE_DIMENSION
            {
                return Err(ConfigError::InvalidResolution(resolution));
            }
        }
        for fps in [self.device_fps, self.target_fps] {
            if fps == 0 || fps > MAX_FPS {
                return Err(ConfigError::InvalidFrameRate(fps));
            }
        }
        if self.render_scale == 0 {
            return Err(ConfigError::Parse("render_scale must be at least 1".to_string()));
        }
        self.key_bindings.validate()
    }

    /// Settings for constructing the viewer
    pub fn viewer_settings(&self) -> ViewerSettings {
        ViewerSettings {
            camera_resolution: self.camera_resolution,
            screen_resolution: self.screen_resolution,
            mode: self.initial_mode,
            options: self.pipeline.clamped(),
            key_bindings: self.key_bindings.clone(),
            ..ViewerSettings::default()
        }
    }
}
