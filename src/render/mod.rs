// SPDX-License-Identifier: GPL-3.0-only

//! Display Mode State Machine and per-mode render procedures
//!
//! Exactly one [`DisplayMode`] is active. The input handler changes it
//! through [`DisplayState::select`]; nothing else does. Each tick the render
//! loop looks up the mode's procedure with [`procedure_for`] and runs it
//! against the current [`RenderContext`].

pub mod camera;
pub mod fps;
pub mod procedures;

pub use camera::Camera;
pub use fps::FpsCounter;
pub use procedures::{MeshBatch, QuadStyle, RenderContext};

use crate::errors::RenderError;
use crate::gpu::GpuBackend;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Debug views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayMode {
    /// Color, depth, vertex and normal maps in a 2x2 grid
    #[default]
    Overlay,
    Depth,
    Image,
    /// Normal histogram next to the distance histograms
    HistogramCompare,
    /// Vertex map pyramid
    VmapDebug,
    /// Normal map pyramid
    NmapDebug,
    /// Segmentation labels; repeating the selection cycles [`SegmentationView`]
    SegmentationDebug,
    /// Projected texture of the selected plane
    ProjectionDebug,
    /// Quadtree meshes in 3D with the selected plane's quadtree inset
    Quadtree,
    /// Clear only
    None,
}

impl DisplayMode {
    pub const ALL: [DisplayMode; 10] = [
        DisplayMode::Overlay,
        DisplayMode::Depth,
        DisplayMode::Image,
        DisplayMode::HistogramCompare,
        DisplayMode::VmapDebug,
        DisplayMode::NmapDebug,
        DisplayMode::SegmentationDebug,
        DisplayMode::ProjectionDebug,
        DisplayMode::Quadtree,
        DisplayMode::None,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            DisplayMode::Overlay => "overlay",
            DisplayMode::Depth => "depth",
            DisplayMode::Image => "image",
            DisplayMode::HistogramCompare => "histogram-compare",
            DisplayMode::VmapDebug => "vmap-debug",
            DisplayMode::NmapDebug => "nmap-debug",
            DisplayMode::SegmentationDebug => "segmentation-debug",
            DisplayMode::ProjectionDebug => "projection-debug",
            DisplayMode::Quadtree => "quadtree",
            DisplayMode::None => "none",
        }
    }

    /// True for modes that cycle through the detected planes
    pub fn selects_plane(&self) -> bool {
        matches!(self, DisplayMode::ProjectionDebug | DisplayMode::Quadtree)
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.id() == s)
            .ok_or_else(|| {
                let ids: Vec<&str> = Self::ALL.iter().map(|m| m.id()).collect();
                format!("unknown display mode '{}' (expected one of {})", s, ids.join(", "))
            })
    }
}

/// Segmentation debug sub-views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentationView {
    #[default]
    Normal,
    Final,
    Distance,
}

impl SegmentationView {
    pub fn next(self) -> Self {
        match self {
            SegmentationView::Normal => SegmentationView::Final,
            SegmentationView::Final => SegmentationView::Distance,
            SegmentationView::Distance => SegmentationView::Normal,
        }
    }
}

/// Active mode plus the rendering toggles read by the procedures
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayState {
    mode: DisplayMode,
    segmentation_view: SegmentationView,
    selected_plane: usize,
    pub wireframe: bool,
    pub points: bool,
    /// Stop submitting frames to the tracker; rendering continues
    pub paused: bool,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self::new(DisplayMode::default())
    }
}

impl DisplayState {
    pub fn new(mode: DisplayMode) -> Self {
        Self {
            mode,
            segmentation_view: SegmentationView::default(),
            selected_plane: 0,
            wireframe: false,
            points: false,
            paused: false,
        }
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn segmentation_view(&self) -> SegmentationView {
        self.segmentation_view
    }

    pub fn selected_plane(&self) -> usize {
        self.selected_plane
    }

    /// Select `mode`. Selecting the active mode again cycles its sub-view
    /// (segmentation view, or the plane among `plane_count` planes).
    pub fn select(&mut self, mode: DisplayMode, plane_count: usize) {
        if mode != self.mode {
            self.mode = mode;
            if mode.selects_plane() && self.selected_plane >= plane_count.max(1) {
                self.selected_plane = 0;
            }
            return;
        }
        match mode {
            DisplayMode::SegmentationDebug => {
                self.segmentation_view = self.segmentation_view.next();
            }
            m if m.selects_plane() => {
                self.selected_plane = (self.selected_plane + 1) % plane_count.max(1);
            }
            _ => {}
        }
    }
}

/// A per-mode render procedure
pub type RenderProcedure<B> = fn(&mut RenderContext<'_, B>) -> Result<(), RenderError>;

/// Render procedure for `mode`
pub fn procedure_for<B: GpuBackend>(mode: DisplayMode) -> RenderProcedure<B> {
    match mode {
        DisplayMode::Overlay => procedures::draw_overlay,
        DisplayMode::Depth => procedures::draw_depth_view,
        DisplayMode::Image => procedures::draw_image_view,
        DisplayMode::HistogramCompare => procedures::draw_histogram_compare,
        DisplayMode::VmapDebug => procedures::draw_vmap_debug,
        DisplayMode::NmapDebug => procedures::draw_nmap_debug,
        DisplayMode::SegmentationDebug => procedures::draw_segmentation_debug,
        DisplayMode::ProjectionDebug => procedures::draw_projection_debug,
        DisplayMode::Quadtree => procedures::draw_quadtree_view,
        DisplayMode::None => procedures::draw_nothing,
    }
}
