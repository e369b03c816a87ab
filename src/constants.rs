// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Default camera (device) resolution: Kinect medium depth mode
pub const DEFAULT_CAMERA_WIDTH: u32 = 640;
pub const DEFAULT_CAMERA_HEIGHT: u32 = 480;

/// Default off-screen render resolution before the first reshape
pub const DEFAULT_SCREEN_WIDTH: u32 = 1280;
pub const DEFAULT_SCREEN_HEIGHT: u32 = 960;

/// Default device frame rate
pub const DEFAULT_DEVICE_FPS: u32 = 30;
/// Render loop tick rate
pub const DEFAULT_TARGET_FPS: u32 = 60;
/// Upper bound accepted for either rate
pub const MAX_FPS: u32 = 240;

/// FPS counter window
pub const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Terminal presentation: off-screen pixels per half-block cell column
pub const DEFAULT_RENDER_SCALE: u32 = 4;

/// Number of levels in the vertex/normal map pyramids
pub const PYRAMID_LEVELS: usize = 3;

/// Pyramid level the tracker's normal-based segmentation runs at
pub const NORMAL_SEGMENTATION_LEVEL: usize = 1;

/// Number of image-space scratch textures used by the debug modes
pub const IMAGE_TEXTURE_COUNT: usize = 4;
/// Number of camera-resolution staging buffers (pixel buffer objects)
pub const IMAGE_PBO_COUNT: usize = 3;

/// Capacity of the quadtree mesh vertex buffer (vec4 positions)
pub const QTM_MAX_VERTICES: usize = 640 * 480;
/// Capacity of the quadtree mesh index buffer. Sized for the wireframe
/// expansion of a full-resolution triangle list (two triangles per pixel,
/// six line indices per triangle).
pub const QTM_MAX_INDICES: usize = 640 * 480 * 12;

/// Side length of the quadtree debug texture
pub const QTM_TEXTURE_SIZE: u32 = 512;

/// Largest texture dimension the resource set will allocate
pub const MAX_TEXTURE_DIMENSION: u32 = 8192;

/// Depth encoding (millimeters)
pub mod depth {
    /// Invalid depth marker
    pub const INVALID_MM: u16 = 0;
    /// Values above this are treated as invalid
    pub const MAX_VALID_MM: u16 = 8000;
}

/// Pipeline option defaults and limits
pub mod pipeline {
    pub const DEFAULT_SPATIAL_SIGMA: f32 = 2.0;
    pub const DEFAULT_DEPTH_SIGMA: f32 = 0.005;
    pub const DEFAULT_MAX_DEPTH_M: f32 = 5.0;

    pub const SPATIAL_SIGMA_STEP: f32 = 0.5;
    pub const SPATIAL_SIGMA_RANGE: (f32, f32) = (0.5, 16.0);
    pub const DEPTH_SIGMA_STEP: f32 = 0.001;
    pub const DEPTH_SIGMA_RANGE: (f32, f32) = (0.001, 0.1);
    pub const MAX_DEPTH_STEP_M: f32 = 0.25;
    pub const MAX_DEPTH_RANGE_M: (f32, f32) = (0.5, 10.0);
}

/// Virtual camera defaults and limits
pub mod camera {
    pub const DEFAULT_FOVY_DEG: f32 = 45.0;
    pub const DEFAULT_Z_NEAR: f32 = 0.1;
    pub const DEFAULT_Z_FAR: f32 = 100.0;

    pub const FOVY_RANGE_DEG: (f32, f32) = (10.0, 120.0);

    /// Radians of rotation per pixel of mouse drag
    pub const ROTATE_SPEED: f32 = 0.005;
    /// Meters of pan per pixel of mouse drag
    pub const PAN_SPEED: f32 = 0.002;
    /// Meters the eye moves per scroll step
    pub const DOLLY_STEP_M: f32 = 0.1;
    /// Degrees of field of view per scroll step with Ctrl held
    pub const FOVY_STEP_DEG: f32 = 2.0;
    /// Pitch is kept this far (radians) from straight up/down
    pub const PITCH_LIMIT: f32 = 1.5;
}

/// Histogram layout for the histogram-compare debug mode
pub mod histogram {
    /// Normal histogram azimuth bins
    pub const NORMAL_AZIMUTH_BINS: usize = 64;
    /// Normal histogram elevation bins
    pub const NORMAL_ELEVATION_BINS: usize = 32;
    /// Distance histogram bins
    pub const DISTANCE_BINS: usize = 256;
    /// Rows of the distance histogram texture, one per plane
    pub const MAX_DISTANCE_HISTOGRAMS: usize = 16;
    /// Default bar scale for distance histograms
    pub const DEFAULT_BAR_SCALE: i32 = 10;
}
