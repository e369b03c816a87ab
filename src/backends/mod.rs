// SPDX-License-Identifier: GPL-3.0-only

//! Depth camera device abstraction
//!
//! ```text
//! ┌──────────────────┐   on_new_frame()   ┌──────────────┐
//! │ RgbdDevice       │ ─────────────────▶ │ FrameListener│  (FrameIntake)
//! │ (capture thread) │                    └──────────────┘
//! └──────────────────┘
//! ```
//!
//! A device delivers frames on its own thread to every registered listener.
//! Listeners are shared handles, so each callback resolves to the object it
//! was registered with; there is no process-wide instance.

pub mod frame_loop;
pub mod synthetic;

pub use frame_loop::{CaptureLoopController, CaptureTick, LoopAction};
pub use synthetic::{SyntheticDevice, SyntheticScene};

use crate::errors::{ConfigError, DeviceError};
use crate::frame::{FramePtr, Intrinsics, Resolution};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Frame-arrival notification
///
/// Called from the device's capture thread. Implementations must return
/// quickly and must not fail back into the device.
pub trait FrameListener: Send + Sync {
    fn on_new_frame(&self, frame: FramePtr);
}

/// RGBD capture device
pub trait RgbdDevice: Send {
    /// Human readable device name
    fn name(&self) -> &str;

    /// Resolution of every frame this device delivers
    fn resolution(&self) -> Resolution;

    /// Intrinsics of the depth/color pair
    fn intrinsics(&self) -> Intrinsics;

    /// Register a listener; must be called before [`RgbdDevice::start`]
    fn add_listener(&mut self, listener: Arc<dyn FrameListener>);

    /// Start producing frames
    fn start(&mut self) -> Result<(), DeviceError>;

    /// Stop producing frames and join the capture thread
    fn stop(&mut self);

    /// True while frames are being produced
    fn is_streaming(&self) -> bool;
}

/// Selectable device kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    /// Synthetic room scene with a moving sphere
    #[default]
    SyntheticRoom,
    /// Synthetic left-to-right depth ramp
    SyntheticRamp,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 2] = [DeviceKind::SyntheticRoom, DeviceKind::SyntheticRamp];

    /// Name used on the command line and in the config file
    pub fn id(&self) -> &'static str {
        match self {
            DeviceKind::SyntheticRoom => "synthetic-room",
            DeviceKind::SyntheticRamp => "synthetic-ramp",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DeviceKind::SyntheticRoom => "Synthetic room with floor, wall and a moving sphere",
            DeviceKind::SyntheticRamp => "Synthetic depth ramp (near left, far right)",
        }
    }

    pub fn from_id(id: &str) -> Result<Self, ConfigError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.id() == id)
            .ok_or_else(|| ConfigError::UnknownDevice(id.to_string()))
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Open a device of `kind` at `resolution`
pub fn open_device(kind: DeviceKind, resolution: Resolution, fps: u32) -> Box<dyn RgbdDevice> {
    let scene = match kind {
        DeviceKind::SyntheticRoom => SyntheticScene::Room,
        DeviceKind::SyntheticRamp => SyntheticScene::Ramp,
    };
    Box::new(SyntheticDevice::new(scene, resolution, fps))
}

/// Fail startup if the device does not deliver the configured resolution
pub fn validate_device(device: &dyn RgbdDevice, configured: Resolution) -> Result<(), ConfigError> {
    if configured.is_empty() {
        return Err(ConfigError::InvalidResolution(configured));
    }
    let actual = device.resolution();
    if actual != configured {
        return Err(ConfigError::ResolutionMismatch {
            configured,
            device: actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_kind_ids_round_trip() {
        for kind in DeviceKind::ALL {
            assert_eq!(DeviceKind::from_id(kind.id()), Ok(kind));
        }
        assert!(matches!(
            DeviceKind::from_id("kinect2"),
            Err(ConfigError::UnknownDevice(_))
        ));
    }

    #[test]
    fn test_validate_device_resolution() {
        let device = open_device(DeviceKind::SyntheticRamp, Resolution::new(320, 240), 30);
        assert!(validate_device(device.as_ref(), Resolution::new(320, 240)).is_ok());
        assert_eq!(
            validate_device(device.as_ref(), Resolution::new(640, 480)),
            Err(ConfigError::ResolutionMismatch {
                configured: Resolution::new(640, 480),
                device: Resolution::new(320, 240),
            })
        );
    }
}
