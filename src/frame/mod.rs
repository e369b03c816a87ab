// SPDX-License-Identifier: GPL-3.0-only

//! RGBD frames and the hand-off between the device and the render loop
//!
//! A [`RgbdFrame`] is immutable once built and shared through [`FramePtr`]
//! between the device's capture thread and the render thread. The
//! [`FrameSlot`] holds the most recent unconsumed frame; the
//! [`FrameIntake`] handler is what the device calls to fill it.

mod intake;
mod slot;

pub use intake::FrameIntake;
pub use slot::{FrameSlot, PublishOutcome, SlotStats};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Capture timestamp in microseconds on the device's monotonic clock
pub type Timestamp = u64;

/// Shared, immutable frame reference
pub type FramePtr = Arc<RgbdFrame>;

/// Width/height pair used for camera, screen and texture sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// True if either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Resolution of pyramid level `level` (each level halves both sides)
    pub fn at_level(&self, level: usize) -> Self {
        let shift = level.min(31) as u32;
        Self {
            width: (self.width >> shift).max(1),
            height: (self.height >> shift).max(1),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pinhole camera intrinsics (pixels)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Intrinsics {
    /// Kinect v1 intrinsics at 640x480, scaled to `resolution`
    pub fn kinect(resolution: Resolution) -> Self {
        const FX: f32 = 594.21;
        const FY: f32 = 591.04;
        const CX: f32 = 339.5;
        const CY: f32 = 242.7;
        const BASE_WIDTH: f32 = 640.0;
        const BASE_HEIGHT: f32 = 480.0;

        let sx = resolution.width as f32 / BASE_WIDTH;
        let sy = resolution.height as f32 / BASE_HEIGHT;
        Self {
            fx: FX * sx,
            fy: FY * sy,
            cx: CX * sx,
            cy: CY * sy,
        }
    }

    /// Intrinsics for pyramid level `level`
    pub fn at_level(&self, level: usize) -> Self {
        let scale = 1.0 / (1u32 << level.min(31)) as f32;
        Self {
            fx: self.fx * scale,
            fy: self.fy * scale,
            cx: self.cx * scale,
            cy: self.cy * scale,
        }
    }

    /// Back-project pixel (x, y) at `depth_m` meters into camera space
    #[inline]
    pub fn unproject(&self, x: f32, y: f32, depth_m: f32) -> [f32; 3] {
        [
            (x - self.cx) * depth_m / self.fx,
            (y - self.cy) * depth_m / self.fy,
            depth_m,
        ]
    }
}

/// One capture: aligned color and depth at a known resolution
#[derive(Clone)]
pub struct RgbdFrame {
    pub resolution: Resolution,
    pub intrinsics: Intrinsics,
    /// RGB8 pixels, row-major, `width * height * 3` bytes
    pub color: Arc<[u8]>,
    /// Depth in millimeters, row-major, 0 = no reading
    pub depth: Arc<[u16]>,
    /// Capture time on the device clock
    pub timestamp: Timestamp,
}

impl RgbdFrame {
    /// Build a frame, checking that both pixel arrays match `resolution`
    pub fn new(
        resolution: Resolution,
        intrinsics: Intrinsics,
        color: Vec<u8>,
        depth: Vec<u16>,
        timestamp: Timestamp,
    ) -> Result<Self, String> {
        let pixels = resolution.pixel_count();
        if color.len() != pixels * 3 {
            return Err(format!(
                "color array has {} bytes, expected {} for {}",
                color.len(),
                pixels * 3,
                resolution
            ));
        }
        if depth.len() != pixels {
            return Err(format!(
                "depth array has {} values, expected {} for {}",
                depth.len(),
                pixels,
                resolution
            ));
        }
        Ok(Self {
            resolution,
            intrinsics,
            color: color.into(),
            depth: depth.into(),
            timestamp,
        })
    }

    /// Depth at (x, y) in meters, `None` for missing readings
    #[inline]
    pub fn depth_m(&self, x: u32, y: u32) -> Option<f32> {
        let idx = (y * self.resolution.width + x) as usize;
        match self.depth.get(idx).copied() {
            Some(0) | None => None,
            Some(mm) => Some(mm as f32 * 0.001),
        }
    }
}

impl fmt::Debug for RgbdFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RgbdFrame")
            .field("resolution", &self.resolution)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}
