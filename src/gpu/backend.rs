// SPDX-License-Identifier: GPL-3.0-only

//! Backend seam between the resource set and the graphics API
//!
//! Resources are referred to by opaque handles. A backend must reject any
//! handle it did not create or has already destroyed with
//! [`ResourceError::Dangling`], so a stale handle can never reach the GPU.

use crate::errors::ResourceError;
use crate::frame::Resolution;
use bytemuck::{Pod, Zeroable};
use std::fmt;

macro_rules! handle {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            pub fn id(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

handle!(TextureHandle, "texture");
handle!(BufferHandle, "buffer");
handle!(ProgramHandle, "program");

/// Texel formats used by the viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// Single-channel float (depth in meters)
    R32Float,
    /// 8-bit RGBA (color image, frame-buffer color attachment)
    Rgba8Unorm,
    /// Four-channel float (vertex/normal maps, histograms, labels)
    Rgba32Float,
    /// Frame-buffer depth attachment
    Depth32,
}

impl TextureFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R32Float | TextureFormat::Rgba8Unorm | TextureFormat::Depth32 => 4,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: String,
    pub size: Resolution,
    pub format: TextureFormat,
}

impl TextureDesc {
    pub fn new(label: impl Into<String>, size: Resolution, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            size,
            format,
        }
    }

    pub fn byte_len(&self) -> u64 {
        self.size.pixel_count() as u64 * self.format.bytes_per_pixel() as u64
    }
}

/// Buffer roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Staging buffer for texture uploads (pixel unpack buffer)
    PixelUnpack,
    /// Read-back buffer for frame-buffer contents (pixel pack buffer)
    PixelPack,
    Vertex,
    Index,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub kind: BufferKind,
}

impl BufferDesc {
    pub fn new(label: impl Into<String>, size: u64, kind: BufferKind) -> Self {
        Self {
            label: label.into(),
            size,
            kind,
        }
    }
}

/// Shader programs, one per visualization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProgramKind {
    Depth,
    Color,
    Abs,
    Vmap,
    Nmap,
    Histogram,
    BarHistogram,
    NormalSegments,
    FinalSegments,
    ProjectedSegments,
    DistSegments,
    Quadtree,
    QtmColor,
    QtmDist,
    QtmHighlightBlue,
    QtmHighlightGreen,
}

impl ProgramKind {
    pub const ALL: [ProgramKind; 16] = [
        ProgramKind::Depth,
        ProgramKind::Color,
        ProgramKind::Abs,
        ProgramKind::Vmap,
        ProgramKind::Nmap,
        ProgramKind::Histogram,
        ProgramKind::BarHistogram,
        ProgramKind::NormalSegments,
        ProgramKind::FinalSegments,
        ProgramKind::ProjectedSegments,
        ProgramKind::DistSegments,
        ProgramKind::Quadtree,
        ProgramKind::QtmColor,
        ProgramKind::QtmDist,
        ProgramKind::QtmHighlightBlue,
        ProgramKind::QtmHighlightGreen,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ProgramKind::Depth => "depth",
            ProgramKind::Color => "color",
            ProgramKind::Abs => "abs",
            ProgramKind::Vmap => "vmap",
            ProgramKind::Nmap => "nmap",
            ProgramKind::Histogram => "histogram",
            ProgramKind::BarHistogram => "barhistogram",
            ProgramKind::NormalSegments => "normalsegments",
            ProgramKind::FinalSegments => "finalsegments",
            ProgramKind::ProjectedSegments => "projectedsegments",
            ProgramKind::DistSegments => "distsegments",
            ProgramKind::Quadtree => "quadtree",
            ProgramKind::QtmColor => "qtm_color",
            ProgramKind::QtmDist => "qtm_dist",
            ProgramKind::QtmHighlightBlue => "qtm_highlight_blue",
            ProgramKind::QtmHighlightGreen => "qtm_highlight_green",
        }
    }

    /// Mesh programs draw quadtree meshes; all others draw textured quads
    pub fn is_mesh(&self) -> bool {
        matches!(
            self,
            ProgramKind::QtmColor
                | ProgramKind::QtmDist
                | ProgramKind::QtmHighlightBlue
                | ProgramKind::QtmHighlightGreen
        )
    }

    /// Fragment entry point in the program's WGSL module
    pub fn fragment_entry(&self) -> &'static str {
        match self {
            ProgramKind::Depth => "fs_depth",
            ProgramKind::Color => "fs_color",
            ProgramKind::Abs => "fs_abs",
            ProgramKind::Vmap => "fs_vmap",
            ProgramKind::Nmap => "fs_nmap",
            ProgramKind::Histogram => "fs_histogram",
            ProgramKind::BarHistogram => "fs_bar_histogram",
            ProgramKind::NormalSegments => "fs_normal_segments",
            ProgramKind::FinalSegments => "fs_final_segments",
            ProgramKind::ProjectedSegments => "fs_projected_segments",
            ProgramKind::DistSegments => "fs_dist_segments",
            ProgramKind::Quadtree => "fs_quadtree",
            ProgramKind::QtmColor => "fs_qtm_color",
            ProgramKind::QtmDist => "fs_qtm_dist",
            ProgramKind::QtmHighlightBlue => "fs_qtm_highlight_blue",
            ProgramKind::QtmHighlightGreen => "fs_qtm_highlight_green",
        }
    }
}

/// Off-screen frame buffer: color + depth attachments of equal size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub color: TextureHandle,
    pub depth: TextureHandle,
}

/// Rectangle in normalized frame-buffer coordinates, origin top-left
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Viewport {
    pub const FULL: Viewport = Viewport::new(0.0, 0.0, 1.0, 1.0);

    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Cell (`col`, `row`) of a `cols` x `rows` grid covering the frame
    pub fn grid(cols: u32, rows: u32, col: u32, row: u32) -> Self {
        let w = 1.0 / cols.max(1) as f32;
        let h = 1.0 / rows.max(1) as f32;
        Self::new(col as f32 * w, row as f32 * h, w, h)
    }
}

/// Per-draw parameters of the quad programs (WGSL `QuadParams`)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct QuadParams {
    /// x, y, w, h in normalized frame-buffer coordinates
    pub rect: [f32; 4],
    pub color: [f32; 4],
    /// Fraction of the texture sampled (pyramid levels, histograms)
    pub texture_scale: [f32; 2],
    /// Program specific value scaling (1 / max depth, 1 / max count, bar scale)
    pub value_scale: f32,
    /// Highlighted bin or plane
    pub peak: f32,
    pub flags: u32,
    pub _pad: [u32; 3],
}

/// Per-draw parameters of the mesh programs (WGSL `MeshParams`)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshParams {
    pub mvp: [[f32; 4]; 4],
    pub color: [f32; 4],
    /// Distance normalization for the distance program
    pub max_distance: f32,
    pub _pad: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadDraw {
    pub program: ProgramHandle,
    /// Unit quad vertex buffer
    pub geometry: BufferHandle,
    pub texture: TextureHandle,
    pub params: QuadParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshTopology {
    Triangles,
    Lines,
    Points,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshDraw {
    pub program: ProgramHandle,
    pub topology: MeshTopology,
    pub vertices: BufferHandle,
    pub indices: BufferHandle,
    pub first_index: u32,
    pub index_count: u32,
    pub base_vertex: i32,
    pub viewport: Viewport,
    pub params: MeshParams,
}

/// Graphics API used by the resource set and the render procedures
///
/// Draws issued between [`GpuBackend::begin_frame`] and
/// [`GpuBackend::end_frame`] render into the frame's [`RenderTarget`].
/// Texture uploads take effect in submission order, before any draw of
/// the frame that follows them.
pub trait GpuBackend {
    /// Adapter or backend name
    fn name(&self) -> &str;

    /// Largest texture side the backend can allocate
    fn max_texture_dimension(&self) -> u32;

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, ResourceError>;

    fn destroy_texture(&mut self, texture: TextureHandle) -> Result<(), ResourceError>;

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, ResourceError>;

    fn destroy_buffer(&mut self, buffer: BufferHandle) -> Result<(), ResourceError>;

    fn create_program(&mut self, kind: ProgramKind) -> Result<ProgramHandle, ResourceError>;

    fn destroy_program(&mut self, program: ProgramHandle) -> Result<(), ResourceError>;

    /// Copy `data` into `buffer` at byte `offset`
    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), ResourceError>;

    /// Upload tightly packed `data` covering `region` (anchored top-left)
    /// into `texture`, staging it through the `staging` pixel buffer
    fn upload_texture(
        &mut self,
        staging: BufferHandle,
        texture: TextureHandle,
        region: Resolution,
        data: &[u8],
    ) -> Result<(), ResourceError>;

    /// Start a frame, clearing the target
    fn begin_frame(&mut self, target: RenderTarget, clear: [f32; 4]) -> Result<(), ResourceError>;

    fn draw_quad(&mut self, draw: &QuadDraw) -> Result<(), ResourceError>;

    fn draw_mesh(&mut self, draw: &MeshDraw) -> Result<(), ResourceError>;

    /// Submit every draw recorded since `begin_frame`
    fn end_frame(&mut self) -> Result<(), ResourceError>;

    /// Read a color texture back through the `readback` pixel buffer.
    /// Returns tightly packed rows.
    fn read_texture(
        &mut self,
        texture: TextureHandle,
        readback: BufferHandle,
    ) -> Result<Vec<u8>, ResourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_layout_matches_wgsl() {
        assert_eq!(std::mem::size_of::<QuadParams>(), 64);
        assert_eq!(std::mem::size_of::<MeshParams>(), 96);
    }

    #[test]
    fn test_program_kinds() {
        assert_eq!(
            ProgramKind::ALL.iter().filter(|k| k.is_mesh()).count(),
            4
        );
        let mut labels: Vec<_> = ProgramKind::ALL.iter().map(|k| k.label()).collect();
        labels.dedup();
        assert_eq!(labels.len(), ProgramKind::ALL.len());
    }

    #[test]
    fn test_viewport_grid() {
        let cell = Viewport::grid(2, 2, 1, 1);
        assert_eq!(cell, Viewport::new(0.5, 0.5, 0.5, 0.5));
    }
}
