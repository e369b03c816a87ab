// SPDX-License-Identifier: GPL-3.0-only

//! Mesh tracker collaborator
//!
//! The tracker consumes submitted frames and exposes derived per-frame
//! outputs. The viewer never triggers recomputation through these
//! accessors; render procedures read whatever the tracker last produced,
//! which may lag the most recently submitted frame by a tick.

mod depth_tracker;

pub use depth_tracker::DepthTracker;

use crate::frame::{FramePtr, Resolution};
use serde::{Deserialize, Serialize};

/// Depth pre-filter applied by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterMode {
    #[default]
    Bilateral,
    Gaussian,
    None,
}

impl FilterMode {
    /// Next mode in the cycle used by the input handler
    pub fn next(self) -> Self {
        match self {
            FilterMode::Bilateral => FilterMode::Gaussian,
            FilterMode::Gaussian => FilterMode::None,
            FilterMode::None => FilterMode::Bilateral,
        }
    }
}

/// Normal estimation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NormalMode {
    /// Cross product of right and down neighbours
    Simple,
    /// Cross product of central differences averaged over a 3x3 window
    #[default]
    AverageGradient,
}

impl NormalMode {
    pub fn toggled(self) -> Self {
        match self {
            NormalMode::Simple => NormalMode::AverageGradient,
            NormalMode::AverageGradient => NormalMode::Simple,
        }
    }
}

/// Options read by the tracker and by some render procedures
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub filter_mode: FilterMode,
    pub normal_mode: NormalMode,
    /// Spatial smoothing sigma (pixels)
    pub spatial_sigma: f32,
    /// Depth smoothing sigma (meters)
    pub depth_sigma: f32,
    /// Depth cutoff (meters); also scales the depth and histogram views
    pub max_depth: f32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        use crate::constants::pipeline::*;
        Self {
            filter_mode: FilterMode::default(),
            normal_mode: NormalMode::default(),
            spatial_sigma: DEFAULT_SPATIAL_SIGMA,
            depth_sigma: DEFAULT_DEPTH_SIGMA,
            max_depth: DEFAULT_MAX_DEPTH_M,
        }
    }
}

impl PipelineOptions {
    /// Numeric options pulled into their allowed ranges; non-finite values
    /// fall back to the defaults
    pub fn clamped(self) -> Self {
        use crate::constants::pipeline::*;
        Self {
            spatial_sigma: clamp_or(self.spatial_sigma, DEFAULT_SPATIAL_SIGMA, SPATIAL_SIGMA_RANGE),
            depth_sigma: clamp_or(self.depth_sigma, DEFAULT_DEPTH_SIGMA, DEPTH_SIGMA_RANGE),
            max_depth: clamp_or(self.max_depth, DEFAULT_MAX_DEPTH_M, MAX_DEPTH_RANGE_M),
            ..self
        }
    }
}

fn clamp_or(value: f32, fallback: f32, range: (f32, f32)) -> f32 {
    if value.is_finite() {
        value.clamp(range.0, range.1)
    } else {
        fallback
    }
}

/// Four-channel float image (vertex or normal map), row-major xyzw
#[derive(Debug, Clone, PartialEq)]
pub struct FloatMap {
    pub resolution: Resolution,
    pub data: Vec<[f32; 4]>,
}

impl FloatMap {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            data: vec![[0.0; 4]; resolution.pixel_count()],
        }
    }
}

/// Per-pixel label image; 0 = unlabelled
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMap {
    pub resolution: Resolution,
    pub labels: Vec<u32>,
}

/// 2D histogram of normal directions (azimuth x elevation)
#[derive(Debug, Clone, PartialEq)]
pub struct NormalHistogram {
    pub azimuth_bins: usize,
    pub elevation_bins: usize,
    /// Row-major counts, `elevation_bins` rows of `azimuth_bins`
    pub counts: Vec<u32>,
}

impl NormalHistogram {
    pub fn max_count(&self) -> u32 {
        self.counts.iter().copied().max().unwrap_or(0)
    }
}

/// 1D histogram of distances with its peak bin
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceHistogram {
    pub counts: Vec<u32>,
    pub peak: usize,
}

/// Image of one detected plane's projected texture (RGBA8)
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneProjection {
    pub resolution: Resolution,
    pub rgba: Vec<u8>,
}

/// Triangle mesh from a plane's quadtree decomposition
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QuadTreeMesh {
    /// Positions (xyz, w = per-vertex scalar used by the distance shader)
    pub vertices: Vec<[f32; 4]>,
    /// Triangle list
    pub indices: Vec<u32>,
    /// Quadtree cell image for the plane (RGBA8), if produced
    pub texture: Option<PlaneProjection>,
}

/// Consumes frames and exposes derived outputs
pub trait MeshTracker {
    /// Hand a frame to the tracker. Fire-and-forget.
    fn submit_frame(&mut self, frame: FramePtr);

    /// Options changed through the input handler
    fn set_options(&mut self, options: &PipelineOptions);

    /// Color pyramid (rgb in 0..1, w = 1) at `level`
    fn rgb_map(&self, level: usize) -> Option<&FloatMap>;

    /// Vertex map (camera space, meters) at pyramid `level`
    fn vertex_map(&self, level: usize) -> Option<&FloatMap>;

    /// Normal map at pyramid `level`
    fn normal_map(&self, level: usize) -> Option<&FloatMap>;

    fn normal_histogram(&self) -> Option<&NormalHistogram>;

    fn distance_histograms(&self) -> &[DistanceHistogram];

    /// Normal-based segmentation labels at pyramid level
    /// [`NORMAL_SEGMENTATION_LEVEL`](crate::constants::NORMAL_SEGMENTATION_LEVEL)
    fn normal_segments(&self) -> Option<&LabelMap>;

    fn final_segments(&self) -> Option<&LabelMap>;

    /// Per-pixel plane label (x) and signed distance to that plane in meters (y)
    fn distance_segments(&self) -> Option<&FloatMap>;

    fn plane_projection(&self, plane: usize) -> Option<&PlaneProjection>;

    fn quadtree_meshes(&self) -> &[QuadTreeMesh];

    /// Number of planes currently detected
    fn plane_count(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::pipeline::*;

    #[test]
    fn test_clamped_keeps_valid_options() {
        let options = PipelineOptions {
            spatial_sigma: 3.0,
            ..PipelineOptions::default()
        };
        assert_eq!(options.clamped(), options);
    }

    #[test]
    fn test_clamped_replaces_nan_with_default() {
        let options = PipelineOptions {
            spatial_sigma: f32::NAN,
            depth_sigma: -1.0,
            max_depth: 100.0,
            ..PipelineOptions::default()
        }
        .clamped();
        assert_eq!(options.spatial_sigma, DEFAULT_SPATIAL_SIGMA);
        assert_eq!(options.depth_sigma, DEPTH_SIGMA_RANGE.0);
        assert_eq!(options.max_depth, MAX_DEPTH_RANGE_M.1);
    }
}
