// SPDX-License-Identifier: GPL-3.0-only

//! Per-mode render procedures
//!
//! Every procedure reads the current frame, the tracker's latest outputs,
//! the pipeline options and the camera, and records draws into the frame
//! buffer through the resource set. `draw_*_to_texture` helpers upload a
//! source image into one of the resource set's textures and return the
//! [`QuadStyle`] needed to draw the uploaded region.
//!
//! Uploads are size-checked before anything is written: a source that does
//! not fit its destination texture fails with
//! [`RenderError::DimensionMismatch`] and the texture keeps its contents.
//!
//! Draws are submitted together at the end of the frame, so a texture is
//! uploaded at most once per procedure and each panel gets its own texture.

use super::{Camera, DisplayState, SegmentationView};
use crate::constants::histogram::DEFAULT_BAR_SCALE;
use crate::constants::{
    NORMAL_SEGMENTATION_LEVEL, PYRAMID_LEVELS, QTM_MAX_INDICES, QTM_MAX_VERTICES, QTM_TEXTURE_SIZE,
};
use crate::errors::RenderError;
use crate::frame::{Resolution, RgbdFrame};
use crate::gpu::{
    GpuBackend, GpuResourceSet, MeshDraw, MeshParams, MeshTopology, ProgramKind, QuadDraw,
    QuadParams, TextureHandle, Viewport,
};
use crate::gpu::resources::{distance_histogram_size, normal_histogram_size};
use crate::tracker::{FloatMap, LabelMap, MeshTracker, PipelineOptions, QuadTreeMesh};

/// Signed plane distance mapped to the full color range (meters)
const PLANE_DISTANCE_RANGE_M: f32 = 0.05;

/// Inset for the selected plane's quadtree image in quadtree mode
const QUADTREE_INSET: Viewport = Viewport::new(0.7, 0.0, 0.3, 0.3);

const PLANE_COLORS: [[f32; 4]; 6] = [
    [0.90, 0.30, 0.30, 1.0],
    [0.30, 0.80, 0.35, 1.0],
    [0.30, 0.50, 0.95, 1.0],
    [0.95, 0.80, 0.25, 1.0],
    [0.80, 0.35, 0.90, 1.0],
    [0.25, 0.85, 0.85, 1.0],
];

/// Color assigned to plane `index` in the mesh and histogram views
pub fn plane_color(index: usize) -> [f32; 4] {
    PLANE_COLORS[index % PLANE_COLORS.len()]
}

/// Everything a render procedure may read or draw with
pub struct RenderContext<'a, B: GpuBackend> {
    pub resources: &'a mut GpuResourceSet<B>,
    /// Most recently submitted frame
    pub frame: Option<&'a RgbdFrame>,
    pub tracker: &'a dyn MeshTracker,
    pub options: &'a PipelineOptions,
    pub camera: &'a Camera,
    pub display: &'a DisplayState,
}

/// Per-draw quad settings, turned into [`QuadParams`] by [`draw_quad`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadStyle {
    pub texture_scale: [f32; 2],
    pub value_scale: f32,
    pub color: [f32; 4],
    pub peak: f32,
    pub flags: u32,
}

impl Default for QuadStyle {
    fn default() -> Self {
        Self {
            texture_scale: [1.0, 1.0],
            value_scale: 1.0,
            color: [1.0; 4],
            peak: -1.0,
            flags: 0,
        }
    }
}

impl QuadStyle {
    /// Style sampling the top-left `region` of a `texture`-sized texture
    pub fn region(region: Resolution, texture: Resolution) -> Self {
        Self {
            texture_scale: [
                region.width as f32 / texture.width.max(1) as f32,
                region.height as f32 / texture.height.max(1) as f32,
            ],
            ..Self::default()
        }
    }

    pub fn with_value_scale(mut self, value_scale: f32) -> Self {
        self.value_scale = value_scale;
        self
    }

    fn params(&self, viewport: Viewport) -> QuadParams {
        QuadParams {
            rect: [viewport.x, viewport.y, viewport.w, viewport.h],
            color: self.color,
            texture_scale: self.texture_scale,
            value_scale: self.value_scale,
            peak: self.peak,
            flags: self.flags,
            _pad: [0; 3],
        }
    }
}

/// Draw `texture` with `program` over `viewport`
pub fn draw_quad<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
    program: ProgramKind,
    viewport: Viewport,
    texture: TextureHandle,
    style: &QuadStyle,
) -> Result<(), RenderError> {
    let draw = QuadDraw {
        program: ctx.resources.program(program)?,
        geometry: ctx.resources.statics()?.quad,
        texture,
        params: style.params(viewport),
    };
    ctx.resources.backend_mut().draw_quad(&draw)?;
    Ok(())
}

fn check_fits(texture: Resolution, source: Resolution) -> Result<(), RenderError> {
    if source.is_empty() || source.width > texture.width || source.height > texture.height {
        return Err(RenderError::DimensionMismatch { texture, source });
    }
    Ok(())
}

/// Upload `bytes` covering `region` into the top-left of `texture`
fn upload_region<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
    texture: TextureHandle,
    texture_size: Resolution,
    region: Resolution,
    bytes: &[u8],
) -> Result<QuadStyle, RenderError> {
    check_fits(texture_size, region)?;
    ctx.resources.upload(texture, region, bytes)?;
    Ok(QuadStyle::region(region, texture_size))
}

fn upload_float_map<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
    texture: TextureHandle,
    map: &FloatMap,
) -> Result<QuadStyle, RenderError> {
    if map.data.len() != map.resolution.pixel_count() {
        return Err(RenderError::DimensionMismatch {
            texture: map.resolution,
            source: Resolution::new(map.data.len() as u32, 1),
        });
    }
    let size = ctx.resources.camera()?.resolution;
    upload_region(ctx, texture, size, map.resolution, bytemuck::cast_slice(&map.data))
}

fn upload_labels<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
    texture: TextureHandle,
    labels: &LabelMap,
) -> Result<QuadStyle, RenderError> {
    let data: Vec<[f32; 4]> = labels
        .labels
        .iter()
        .map(|&label| [label as f32, 0.0, 0.0, 1.0])
        .collect();
    upload_float_map(
        ctx,
        texture,
        &FloatMap {
            resolution: labels.resolution,
            data,
        },
    )
}

/// Expand tightly packed RGB8 to RGBA8 with opaque alpha
pub fn rgb_to_rgba(rgb: &[u8]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity(rgb.len() / 3 * 4);
    for px in rgb.chunks_exact(3) {
        rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
    }
    rgba
}

fn current_frame<'a, B: GpuBackend>(
    ctx: &RenderContext<'a, B>,
) -> Result<&'a RgbdFrame, RenderError> {
    ctx.frame.ok_or(RenderError::MissingInput("frame"))
}

/// Frame must match the camera-resolution textures exactly
fn check_frame_size(
    texture: Resolution,
    frame: &RgbdFrame,
    values_per_pixel: usize,
    len: usize,
) -> Result<(), RenderError> {
    let pixels = frame.resolution.pixel_count();
    if frame.resolution != texture || len != pixels * values_per_pixel {
        return Err(RenderError::DimensionMismatch {
            texture,
            source: frame.resolution,
        });
    }
    Ok(())
}

/// Upload the frame's depth (converted to meters) into the depth texture
pub fn draw_depth_image_buffer_to_texture<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
) -> Result<(TextureHandle, QuadStyle), RenderError> {
    let frame = current_frame(ctx)?;
    let camera = ctx.resources.camera()?;
    let (texture, size) = (camera.depth, camera.resolution);
    check_frame_size(size, frame, 1, frame.depth.len())?;

    let meters: Vec<f32> = frame.depth.iter().map(|&mm| mm as f32 * 0.001).collect();
    ctx.resources
        .upload(texture, size, bytemuck::cast_slice(&meters))?;
    let style = QuadStyle::default().with_value_scale(1.0 / ctx.options.max_depth);
    Ok((texture, style))
}

/// Upload the frame's color image into the color texture
pub fn draw_color_image_buffer_to_texture<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
) -> Result<(TextureHandle, QuadStyle), RenderError> {
    let frame = current_frame(ctx)?;
    let camera = ctx.resources.camera()?;
    let (texture, size) = (camera.color, camera.resolution);
    check_frame_size(size, frame, 3, frame.color.len())?;

    ctx.resources.upload(texture, size, &rgb_to_rgba(&frame.color))?;
    Ok((texture, QuadStyle::default()))
}

pub fn draw_rgb_map_to_texture<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
    level: usize,
    texture: TextureHandle,
) -> Result<QuadStyle, RenderError> {
    let tracker = ctx.tracker;
    let map = tracker
        .rgb_map(level)
        .ok_or(RenderError::MissingInput("rgb map"))?;
    upload_float_map(ctx, texture, map)
}

pub fn draw_vmap_to_texture<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
    level: usize,
    texture: TextureHandle,
) -> Result<QuadStyle, RenderError> {
    let tracker = ctx.tracker;
    let map = tracker
        .vertex_map(level)
        .ok_or(RenderError::MissingInput("vertex map"))?;
    let style = upload_float_map(ctx, texture, map)?;
    Ok(style.with_value_scale(1.0 / ctx.options.max_depth))
}

pub fn draw_nmap_to_texture<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
    level: usize,
    texture: TextureHandle,
) -> Result<QuadStyle, RenderError> {
    let tracker = ctx.tracker;
    let map = tracker
        .normal_map(level)
        .ok_or(RenderError::MissingInput("normal map"))?;
    upload_float_map(ctx, texture, map)
}

/// Upload the azimuth x elevation normal histogram into its static texture;
/// counts are normalized by the largest bin in the shader
pub fn draw_normal_histogram_to_texture<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
) -> Result<(TextureHandle, QuadStyle), RenderError> {
    let tracker = ctx.tracker;
    let hist = tracker
        .normal_histogram()
        .ok_or(RenderError::MissingInput("normal histogram"))?;
    let region = Resolution::new(hist.azimuth_bins as u32, hist.elevation_bins as u32);
    if hist.counts.len() != region.pixel_count() {
        return Err(RenderError::DimensionMismatch {
            texture: region,
            source: Resolution::new(hist.counts.len() as u32, 1),
        });
    }
    let data: Vec<[f32; 4]> = hist
        .counts
        .iter()
        .map(|&count| [count as f32, 0.0, 0.0, 1.0])
        .collect();
    let texture = ctx.resources.statics()?.normal_histogram;
    let style = upload_region(
        ctx,
        texture,
        normal_histogram_size(),
        region,
        bytemuck::cast_slice(&data),
    )?;
    Ok((texture, style.with_value_scale(1.0 / hist.max_count().max(1) as f32)))
}

/// Upload every distance histogram as one row of the static histogram
/// texture, each bin holding its share of the histogram's total count
pub fn upload_distance_histograms<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
) -> Result<(TextureHandle, QuadStyle), RenderError> {
    let tracker = ctx.tracker;
    let histograms = tracker.distance_histograms();
    let bins = histograms.iter().map(|h| h.counts.len()).max().unwrap_or(0);
    if histograms.is_empty() || bins == 0 {
        return Err(RenderError::MissingInput("distance histograms"));
    }

    let mut data = vec![[0.0f32; 4]; bins * histograms.len()];
    for (row, hist) in histograms.iter().enumerate() {
        let total = hist.counts.iter().map(|&c| c as u64).sum::<u64>().max(1) as f32;
        for (bin, &count) in hist.counts.iter().enumerate() {
            data[row * bins + bin] = [count as f32 / total, 0.0, 0.0, 1.0];
        }
    }
    let region = Resolution::new(bins as u32, histograms.len() as u32);
    let texture = ctx.resources.statics()?.distance_histograms;
    let style = upload_region(
        ctx,
        texture,
        distance_histogram_size(),
        region,
        bytemuck::cast_slice(&data),
    )?;
    Ok((texture, style))
}

/// One bar chart drawn from a row of the distance histogram texture
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramBars {
    pub row: usize,
    pub color: [f32; 4],
    /// Bar height multiplier applied to each bin's share of the total
    pub scale: i32,
    pub peak: usize,
}

pub fn draw_distance_histogram_to_texture<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
    texture: TextureHandle,
    uploaded: &QuadStyle,
    viewport: Viewport,
    bars: HistogramBars,
) -> Result<(), RenderError> {
    let style = QuadStyle {
        color: bars.color,
        value_scale: bars.scale as f32,
        peak: bars.peak as f32,
        flags: bars.row as u32,
        ..*uploaded
    };
    draw_quad(ctx, ProgramKind::BarHistogram, viewport, texture, &style)
}

/// Upload the normal segmentation labels, computed at pyramid `level`, into
/// the top-left region of `texture`
pub fn draw_normal_segments_to_texture<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
    level: usize,
    texture: TextureHandle,
) -> Result<QuadStyle, RenderError> {
    let tracker = ctx.tracker;
    let labels = tracker
        .normal_segments()
        .ok_or(RenderError::MissingInput("normal segments"))?;
    let expected = ctx.resources.camera()?.resolution.at_level(level);
    if labels.resolution != expected {
        return Err(RenderError::DimensionMismatch {
            texture: expected,
            source: labels.resolution,
        });
    }
    upload_labels(ctx, texture, labels)
}

pub fn draw_final_segments_to_texture<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
    texture: TextureHandle,
) -> Result<QuadStyle, RenderError> {
    let tracker = ctx.tracker;
    let labels = tracker
        .final_segments()
        .ok_or(RenderError::MissingInput("final segments"))?;
    let style = upload_labels(ctx, texture, labels)?;
    Ok(QuadStyle {
        peak: (ctx.display.selected_plane() + 1) as f32,
        ..style
    })
}

pub fn draw_distance_segments_to_texture<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
    texture: TextureHandle,
) -> Result<QuadStyle, RenderError> {
    let tracker = ctx.tracker;
    let map = tracker
        .distance_segments()
        .ok_or(RenderError::MissingInput("distance segments"))?;
    let style = upload_float_map(ctx, texture, map)?;
    Ok(style.with_value_scale(1.0 / PLANE_DISTANCE_RANGE_M))
}

/// Upload plane `plane`'s projected texture into the projection texture
pub fn draw_plane_projected_texture_to_texture<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
    plane: usize,
) -> Result<(TextureHandle, QuadStyle), RenderError> {
    let tracker = ctx.tracker;
    let projection = tracker
        .plane_projection(plane)
        .ok_or(RenderError::MissingInput("plane projection"))?;
    let camera = ctx.resources.camera()?;
    let (texture, size) = (camera.projection, camera.resolution);
    if projection.rgba.len() != projection.resolution.pixel_count() * 4 {
        return Err(RenderError::DimensionMismatch {
            texture: size,
            source: projection.resolution,
        });
    }
    let style = upload_region(ctx, texture, size, projection.resolution, &projection.rgba)?;
    Ok((texture, style))
}

/// Upload plane `plane`'s quadtree cell image into the quadtree texture
pub fn draw_quadtree_to_texture<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
    plane: usize,
) -> Result<(TextureHandle, QuadStyle), RenderError> {
    let tracker = ctx.tracker;
    let image = tracker
        .quadtree_meshes()
        .get(plane)
        .and_then(|mesh| mesh.texture.as_ref())
        .ok_or(RenderError::MissingInput("quadtree texture"))?;
    let texture = ctx.resources.statics()?.qtm_texture;
    let size = Resolution::new(QTM_TEXTURE_SIZE, QTM_TEXTURE_SIZE);
    if image.rgba.len() != image.resolution.pixel_count() * 4 {
        return Err(RenderError::DimensionMismatch {
            texture: size,
            source: image.resolution,
        });
    }
    let style = upload_region(ctx, texture, size, image.resolution, &image.rgba)?;
    Ok((texture, style))
}

/// Index range of one mesh inside the packed quadtree mesh buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshRange {
    pub first_index: u32,
    pub index_count: u32,
    pub base_vertex: i32,
}

/// All quadtree meshes packed into one vertex and one index list
#[derive(Debug, Clone, PartialEq)]
pub struct MeshBatch {
    pub topology: MeshTopology,
    pub vertices: Vec<[f32; 4]>,
    pub indices: Vec<u32>,
    /// One range per mesh, in tracker order
    pub ranges: Vec<MeshRange>,
}

impl MeshBatch {
    /// Pack `meshes`, expanding each triangle into its three edges when
    /// `wireframe` is set. Indices stay relative to each mesh's first vertex.
    pub fn pack(meshes: &[QuadTreeMesh], topology: MeshTopology) -> Result<Self, RenderError> {
        let per_triangle = match topology {
            MeshTopology::Lines => 6,
            MeshTopology::Triangles | MeshTopology::Points => 3,
        };
        let vertex_total: usize = meshes.iter().map(|m| m.vertices.len()).sum();
        let index_total: usize = meshes
            .iter()
            .map(|m| m.indices.len() / 3 * per_triangle)
            .sum();
        if vertex_total > QTM_MAX_VERTICES || index_total > QTM_MAX_INDICES {
            return Err(RenderError::MeshTooLarge {
                vertices: vertex_total,
                indices: index_total,
            });
        }

        let mut batch = MeshBatch {
            topology,
            vertices: Vec::with_capacity(vertex_total),
            indices: Vec::with_capacity(index_total),
            ranges: Vec::with_capacity(meshes.len()),
        };
        for mesh in meshes {
            let first_index = batch.indices.len() as u32;
            let base_vertex = batch.vertices.len() as i32;
            batch.vertices.extend_from_slice(&mesh.vertices);
            for tri in mesh.indices.chunks_exact(3) {
                if topology == MeshTopology::Lines {
                    batch
                        .indices
                        .extend_from_slice(&[tri[0], tri[1], tri[1], tri[2], tri[2], tri[0]]);
                } else {
                    batch.indices.extend_from_slice(tri);
                }
            }
            batch.ranges.push(MeshRange {
                first_index,
                index_count: batch.indices.len() as u32 - first_index,
                base_vertex,
            });
        }
        Ok(batch)
    }
}

/// Pack the tracker's quadtree meshes and write them into the mesh buffers
pub fn upload_quad_tree_meshes<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
    topology: MeshTopology,
) -> Result<MeshBatch, RenderError> {
    let tracker = ctx.tracker;
    let meshes = tracker.quadtree_meshes();
    if meshes.is_empty() {
        return Err(RenderError::MissingInput("quadtree meshes"));
    }
    let batch = MeshBatch::pack(meshes, topology)?;
    let statics = ctx.resources.statics()?;
    let (vbo, ibo) = (statics.qtm_vertices, statics.qtm_indices);
    let backend = ctx.resources.backend_mut();
    if !batch.vertices.is_empty() {
        backend.write_buffer(vbo, 0, bytemuck::cast_slice(&batch.vertices))?;
    }
    if !batch.indices.is_empty() {
        backend.write_buffer(ibo, 0, bytemuck::cast_slice(&batch.indices))?;
    }
    Ok(batch)
}

/// Draw one uploaded mesh of `batch` into the frame buffer with `program`
pub fn draw_quad_tree_mesh_to_frame_buffer<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
    batch: &MeshBatch,
    mesh: usize,
    program: ProgramKind,
    color: [f32; 4],
) -> Result<(), RenderError> {
    let range = batch
        .ranges
        .get(mesh)
        .copied()
        .ok_or(RenderError::MissingInput("quadtree mesh"))?;
    if range.index_count == 0 {
        return Ok(());
    }

    let screen = ctx.resources.screen()?.resolution;
    let aspect = screen.width as f32 / screen.height.max(1) as f32;
    let max_distance = match program {
        ProgramKind::QtmDist => PLANE_DISTANCE_RANGE_M,
        _ => ctx.options.max_depth,
    };
    let statics = ctx.resources.statics()?;
    let draw = MeshDraw {
        program: ctx.resources.program(program)?,
        topology: batch.topology,
        vertices: statics.qtm_vertices,
        indices: statics.qtm_indices,
        first_index: range.first_index,
        index_count: range.index_count,
        base_vertex: range.base_vertex,
        viewport: Viewport::FULL,
        params: MeshParams {
            mvp: ctx.camera.view_projection(aspect).to_cols_array_2d(),
            color,
            max_distance,
            _pad: [0.0; 3],
        },
    };
    ctx.resources.backend_mut().draw_mesh(&draw)?;
    Ok(())
}

/// Treat a missing tracker output as "skip this panel"
fn skip_missing(result: Result<(), RenderError>) -> Result<(), RenderError> {
    match result {
        Err(RenderError::MissingInput(_)) => Ok(()),
        other => other,
    }
}

/// Color, depth, vertex map and normal map in a 2x2 grid
pub fn draw_overlay<B: GpuBackend>(ctx: &mut RenderContext<'_, B>) -> Result<(), RenderError> {
    let maps = ctx.resources.camera()?.maps;

    skip_missing(draw_color_image_buffer_to_texture(ctx).and_then(|(texture, style)| {
        draw_quad(ctx, ProgramKind::Color, Viewport::grid(2, 2, 0, 0), texture, &style)
    }))?;
    skip_missing(draw_depth_image_buffer_to_texture(ctx).and_then(|(texture, style)| {
        draw_quad(ctx, ProgramKind::Depth, Viewport::grid(2, 2, 1, 0), texture, &style)
    }))?;
    skip_missing(draw_vmap_to_texture(ctx, 0, maps[0]).and_then(|style| {
        draw_quad(ctx, ProgramKind::Vmap, Viewport::grid(2, 2, 0, 1), maps[0], &style)
    }))?;
    skip_missing(draw_nmap_to_texture(ctx, 0, maps[1]).and_then(|style| {
        draw_quad(ctx, ProgramKind::Nmap, Viewport::grid(2, 2, 1, 1), maps[1], &style)
    }))
}

pub fn draw_depth_view<B: GpuBackend>(ctx: &mut RenderContext<'_, B>) -> Result<(), RenderError> {
    let (texture, style) = draw_depth_image_buffer_to_texture(ctx)?;
    draw_quad(ctx, ProgramKind::Depth, Viewport::FULL, texture, &style)
}

pub fn draw_image_view<B: GpuBackend>(ctx: &mut RenderContext<'_, B>) -> Result<(), RenderError> {
    let (texture, style) = draw_color_image_buffer_to_texture(ctx)?;
    draw_quad(ctx, ProgramKind::Color, Viewport::FULL, texture, &style)
}

/// Normal histogram on the left, one distance histogram per row on the right
pub fn draw_histogram_compare<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
) -> Result<(), RenderError> {
    skip_missing(draw_normal_histogram_to_texture(ctx).and_then(|(texture, style)| {
        draw_quad(ctx, ProgramKind::Histogram, Viewport::grid(2, 1, 0, 0), texture, &style)
    }))?;

    let (texture, uploaded) = match upload_distance_histograms(ctx) {
        Ok(uploaded) => uploaded,
        Err(RenderError::MissingInput(_)) => return Ok(()),
        Err(e) => return Err(e),
    };
    let tracker = ctx.tracker;
    let histograms = tracker.distance_histograms();
    let rows = histograms.len() as f32;
    for (row, hist) in histograms.iter().enumerate() {
        let viewport = Viewport::new(0.5, row as f32 / rows, 0.5, 1.0 / rows);
        let bars = HistogramBars {
            row,
            color: plane_color(row),
            scale: DEFAULT_BAR_SCALE,
            peak: hist.peak,
        };
        draw_distance_histogram_to_texture(ctx, texture, &uploaded, viewport, bars)?;
    }
    Ok(())
}

/// Vertex map pyramid levels plus the color pyramid's base level
pub fn draw_vmap_debug<B: GpuBackend>(ctx: &mut RenderContext<'_, B>) -> Result<(), RenderError> {
    let maps = ctx.resources.camera()?.maps;
    for level in 0..PYRAMID_LEVELS {
        let style = draw_vmap_to_texture(ctx, level, maps[level])?;
        let viewport = Viewport::grid(2, 2, level as u32 % 2, level as u32 / 2);
        draw_quad(ctx, ProgramKind::Vmap, viewport, maps[level], &style)?;
    }
    skip_missing(draw_rgb_map_to_texture(ctx, 0, maps[3]).and_then(|style| {
        draw_quad(ctx, ProgramKind::Color, Viewport::grid(2, 2, 1, 1), maps[3], &style)
    }))
}

/// Normal map pyramid levels plus |n| of the base level
pub fn draw_nmap_debug<B: GpuBackend>(ctx: &mut RenderContext<'_, B>) -> Result<(), RenderError> {
    let maps = ctx.resources.camera()?.maps;
    let mut base = None;
    for level in 0..PYRAMID_LEVELS {
        let style = draw_nmap_to_texture(ctx, level, maps[level])?;
        let viewport = Viewport::grid(2, 2, level as u32 % 2, level as u32 / 2);
        draw_quad(ctx, ProgramKind::Nmap, viewport, maps[level], &style)?;
        if level == 0 {
            base = Some(style);
        }
    }
    match base {
        Some(style) => draw_quad(ctx, ProgramKind::Abs, Viewport::grid(2, 2, 1, 1), maps[0], &style),
        None => Ok(()),
    }
}

pub fn draw_segmentation_debug<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
) -> Result<(), RenderError> {
    let texture = ctx.resources.camera()?.maps[0];
    let (program, style) = match ctx.display.segmentation_view() {
        SegmentationView::Normal => (
            ProgramKind::NormalSegments,
            draw_normal_segments_to_texture(ctx, NORMAL_SEGMENTATION_LEVEL, texture)?,
        ),
        SegmentationView::Final => (
            ProgramKind::FinalSegments,
            draw_final_segments_to_texture(ctx, texture)?,
        ),
        SegmentationView::Distance => (
            ProgramKind::DistSegments,
            draw_distance_segments_to_texture(ctx, texture)?,
        ),
    };
    draw_quad(ctx, program, Viewport::FULL, texture, &style)
}

pub fn draw_projection_debug<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
) -> Result<(), RenderError> {
    let plane = ctx.display.selected_plane();
    let (texture, style) = draw_plane_projected_texture_to_texture(ctx, plane)?;
    draw_quad(ctx, ProgramKind::ProjectedSegments, Viewport::FULL, texture, &style)
}

/// Quadtree meshes in 3D, the selected plane highlighted, with the selected
/// plane's quadtree image inset
pub fn draw_quadtree_view<B: GpuBackend>(
    ctx: &mut RenderContext<'_, B>,
) -> Result<(), RenderError> {
    let display = ctx.display;
    let topology = if display.points {
        MeshTopology::Points
    } else if display.wireframe {
        MeshTopology::Lines
    } else {
        MeshTopology::Triangles
    };
    let batch = upload_quad_tree_meshes(ctx, topology)?;
    let selected = display.selected_plane();

    for mesh in 0..batch.ranges.len() {
        let program = if mesh == selected {
            ProgramKind::QtmHighlightGreen
        } else {
            match topology {
                MeshTopology::Lines => ProgramKind::QtmHighlightBlue,
                MeshTopology::Points => ProgramKind::QtmColor,
                MeshTopology::Triangles => ProgramKind::QtmDist,
            }
        };
        draw_quad_tree_mesh_to_frame_buffer(ctx, &batch, mesh, program, plane_color(mesh))?;
    }

    skip_missing(draw_quadtree_to_texture(ctx, selected).and_then(|(texture, style)| {
        draw_quad(ctx, ProgramKind::Quadtree, QUADTREE_INSET, texture, &style)
    }))
}

/// Nothing beyond the cleared frame buffer
pub fn draw_nothing<B: GpuBackend>(_ctx: &mut RenderContext<'_, B>) -> Result<(), RenderError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FramePtr, Intrinsics};
    use crate::gpu::{HeadlessBackend, RecordedDraw, RenderTarget};
    use crate::render::{DisplayMode, procedure_for};
    use crate::tracker::{DistanceHistogram, NormalHistogram, PlaneProjection};

    const CAMERA: Resolution = Resolution::new(320, 240);
    const SCREEN: Resolution = Resolution::new(160, 120);

    #[derive(Default)]
    struct FixedTracker {
        vmaps: Vec<FloatMap>,
        normal_histogram: Option<NormalHistogram>,
        distance_histograms: Vec<DistanceHistogram>,
        normal_segments: Option<LabelMap>,
        final_segments: Option<LabelMap>,
        projections: Vec<PlaneProjection>,
        meshes: Vec<QuadTreeMesh>,
    }

    impl MeshTracker for FixedTracker {
        fn submit_frame(&mut self, _frame: FramePtr) {}
        fn set_options(&mut self, _options: &PipelineOptions) {}
        fn rgb_map(&self, _level: usize) -> Option<&FloatMap> {
            None
        }
        fn vertex_map(&self, level: usize) -> Option<&FloatMap> {
            self.vmaps.get(level)
        }
        fn normal_map(&self, _level: usize) -> Option<&FloatMap> {
            None
        }
        fn normal_histogram(&self) -> Option<&NormalHistogram> {
            self.normal_histogram.as_ref()
        }
        fn distance_histograms(&self) -> &[DistanceHistogram] {
            &self.distance_histograms
        }
        fn normal_segments(&self) -> Option<&LabelMap> {
            self.normal_segments.as_ref()
        }
        fn final_segments(&self) -> Option<&LabelMap> {
            self.final_segments.as_ref()
        }
        fn distance_segments(&self) -> Option<&FloatMap> {
            None
        }
        fn plane_projection(&self, plane: usize) -> Option<&PlaneProjection> {
            self.projections.get(plane)
        }
        fn quadtree_meshes(&self) -> &[QuadTreeMesh] {
            &self.meshes
        }
        fn plane_count(&self) -> usize {
            self.meshes.len()
        }
    }

    fn resources() -> GpuResourceSet<HeadlessBackend> {
        let mut set = GpuResourceSet::new(HeadlessBackend::new(), CAMERA);
        set.initialize(SCREEN).unwrap();
        set
    }

    fn frame(resolution: Resolution, depth_mm: u16) -> RgbdFrame {
        let pixels = resolution.pixel_count();
        RgbdFrame::new(
            resolution,
            Intrinsics::kinect(resolution),
            vec![128; pixels * 3],
            vec![depth_mm; pixels],
            100,
        )
        .unwrap()
    }

    fn triangle_mesh() -> QuadTreeMesh {
        QuadTreeMesh {
            vertices: vec![
                [0.0, 0.0, 2.0, 0.0],
                [1.0, 0.0, 2.0, 0.0],
                [0.0, 1.0, 2.0, 0.0],
                [1.0, 1.0, 2.0, 0.0],
            ],
            indices: vec![0, 1, 2, 2, 1, 3],
            texture: None,
        }
    }

    /// Run `mode`'s procedure inside a frame and return the recorded programs
    fn render(
        set: &mut GpuResourceSet<HeadlessBackend>,
        tracker: &dyn MeshTracker,
        frame: Option<&RgbdFrame>,
        display: &DisplayState,
    ) -> Result<Vec<ProgramKind>, RenderError> {
        let target: RenderTarget = set.screen().unwrap().target;
        set.backend_mut().begin_frame(target, [0.0; 4]).unwrap();
        let options = PipelineOptions::default();
        let camera = Camera::default();
        let mut ctx = RenderContext {
            resources: &mut *set,
            frame,
            tracker,
            options: &options,
            camera: &camera,
            display,
        };
        let result = procedure_for::<HeadlessBackend>(display.mode())(&mut ctx);
        set.backend_mut().end_frame().unwrap();
        result.map(|_| set.backend().last_frame_programs())
    }

    #[test]
    fn test_rgb_to_rgba() {
        let rgba = rgb_to_rgba(&[255, 0, 0, 0, 255, 0]);
        assert_eq!(rgba, vec![255, 0, 0, 255, 0, 255, 0, 255]);
    }

    #[test]
    fn test_depth_upload_converts_to_meters() {
        let mut set = resources();
        let frame = frame(CAMERA, 1500);
        let display = DisplayState::new(DisplayMode::Depth);
        let programs = render(&mut set, &FixedTracker::default(), Some(&frame), &display).unwrap();
        assert_eq!(programs, vec![ProgramKind::Depth]);

        let depth = set.camera().unwrap().depth;
        let data = set.backend().texture_data(depth).unwrap();
        let meters: &[f32] = bytemuck::cast_slice(data);
        assert!((meters[0] - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_mismatched_frame_leaves_texture_unchanged() {
        let mut set = resources();
        let display = DisplayState::new(DisplayMode::Depth);
        let tracker = FixedTracker::default();
        render(&mut set, &tracker, Some(&frame(CAMERA, 1000)), &display).unwrap();

        let depth = set.camera().unwrap().depth;
        let before = set.backend().texture_data(depth).unwrap().to_vec();
        let uploads = set.backend().texture_uploads(depth);

        let small = frame(Resolution::new(160, 120), 3000);
        let result = render(&mut set, &tracker, Some(&small), &display);
        assert_eq!(
            result,
            Err(RenderError::DimensionMismatch {
                texture: CAMERA,
                source: Resolution::new(160, 120),
            })
        );
        assert_eq!(set.backend().texture_data(depth).unwrap(), before.as_slice());
        assert_eq!(set.backend().texture_uploads(depth), uploads);
    }

    #[test]
    fn test_overlay_skips_missing_tracker_panels() {
        let mut set = resources();
        let frame = frame(CAMERA, 1000);
        let programs = render(
            &mut set,
            &FixedTracker::default(),
            Some(&frame),
            &DisplayState::default(),
        )
        .unwrap();
        assert_eq!(programs, vec![ProgramKind::Color, ProgramKind::Depth]);
    }

    #[test]
    fn test_vmap_levels_use_scaled_regions() {
        let mut set = resources();
        let tracker = FixedTracker {
            vmaps: (0..PYRAMID_LEVELS)
                .map(|level| FloatMap::new(CAMERA.at_level(level)))
                .collect(),
            ..Default::default()
        };
        let display = DisplayState::new(DisplayMode::VmapDebug);
        let programs = render(&mut set, &tracker, None, &display).unwrap();
        assert_eq!(programs, vec![ProgramKind::Vmap; 3]);

        let scales: Vec<[f32; 2]> = set
            .backend()
            .last_frame()
            .iter()
            .filter_map(|draw| match draw {
                RecordedDraw::Quad(q) => Some(q.params.texture_scale),
                RecordedDraw::Mesh(_) => None,
            })
            .collect();
        assert_eq!(scales, vec![[1.0, 1.0], [0.5, 0.5], [0.25, 0.25]]);
    }

    #[test]
    fn test_histogram_compare_draws_one_bar_chart_per_histogram() {
        let mut set = resources();
        let tracker = FixedTracker {
            normal_histogram: Some(NormalHistogram {
                azimuth_bins: 8,
                elevation_bins: 4,
                counts: vec![1; 32],
            }),
            distance_histograms: vec![
                DistanceHistogram {
                    counts: vec![1, 2, 3, 4],
                    peak: 3,
                },
                DistanceHistogram {
                    counts: vec![4, 0, 0, 0],
                    peak: 0,
                },
            ],
            ..Default::default()
        };
        let display = DisplayState::new(DisplayMode::HistogramCompare);
        let programs = render(&mut set, &tracker, None, &display).unwrap();
        assert_eq!(
            programs,
            vec![
                ProgramKind::Histogram,
                ProgramKind::BarHistogram,
                ProgramKind::BarHistogram
            ]
        );
    }

    #[test]
    fn test_histograms_use_static_textures() {
        let mut set = resources();
        let tracker = FixedTracker {
            distance_histograms: vec![DistanceHistogram {
                counts: vec![1; crate::constants::histogram::DISTANCE_BINS],
                peak: 0,
            }],
            ..Default::default()
        };
        let display = DisplayState::new(DisplayMode::HistogramCompare);
        render(&mut set, &tracker, None, &display).unwrap();

        let texture = set.statics().unwrap().distance_histograms;
        assert_eq!(set.backend().texture_uploads(texture), 1);
        match set.backend().last_frame() {
            [RecordedDraw::Quad(q)] => {
                assert_eq!(q.params.texture_scale, [1.0, 1.0 / 16.0]);
                assert_eq!(q.params.flags, 0);
            }
            other => panic!("unexpected draws {:?}", other),
        }
        let maps = set.camera().unwrap().maps;
        assert!(maps.iter().all(|&m| set.backend().texture_uploads(m) == 0));
    }

    #[test]
    fn test_normal_segments_drawn_at_their_level() {
        let mut set = resources();
        let level = NORMAL_SEGMENTATION_LEVEL;
        let res = CAMERA.at_level(level);
        let tracker = FixedTracker {
            normal_segments: Some(LabelMap {
                resolution: res,
                labels: vec![2; res.pixel_count()],
            }),
            ..Default::default()
        };
        let display = DisplayState::new(DisplayMode::SegmentationDebug);
        let programs = render(&mut set, &tracker, None, &display).unwrap();
        assert_eq!(programs, vec![ProgramKind::NormalSegments]);

        let scale = 1.0 / (1 << level) as f32;
        match set.backend().last_frame() {
            [RecordedDraw::Quad(q)] => assert_eq!(q.params.texture_scale, [scale, scale]),
            other => panic!("unexpected draws {:?}", other),
        }
    }

    #[test]
    fn test_normal_segments_at_wrong_level_rejected() {
        let mut set = resources();
        let tracker = FixedTracker {
            normal_segments: Some(LabelMap {
                resolution: CAMERA.at_level(2),
                labels: vec![1; CAMERA.at_level(2).pixel_count()],
            }),
            ..Default::default()
        };
        let display = DisplayState::new(DisplayMode::SegmentationDebug);
        assert_eq!(
            render(&mut set, &tracker, None, &display),
            Err(RenderError::DimensionMismatch {
                texture: CAMERA.at_level(NORMAL_SEGMENTATION_LEVEL),
                source: CAMERA.at_level(2),
            })
        );
    }

    #[test]
    fn test_final_segments_highlight_selected_plane() {
        let mut set = resources();
        let res = Resolution::new(4, 4);
        let tracker = FixedTracker {
            final_segments: Some(LabelMap {
                resolution: res,
                labels: vec![1; 16],
            }),
            ..Default::default()
        };
        let mut display = DisplayState::new(DisplayMode::SegmentationDebug);
        display.select(DisplayMode::SegmentationDebug, 0);
        render(&mut set, &tracker, None, &display).unwrap();

        match set.backend().last_frame() {
            [RecordedDraw::Quad(q)] => assert_eq!(q.params.peak, 1.0),
            other => panic!("unexpected draws {:?}", other),
        }
    }

    #[test]
    fn test_oversized_projection_rejected() {
        let mut set = resources();
        let big = Resolution::new(CAMERA.width * 2, CAMERA.height);
        let tracker = FixedTracker {
            projections: vec![PlaneProjection {
                resolution: big,
                rgba: vec![0; big.pixel_count() * 4],
            }],
            ..Default::default()
        };
        let display = DisplayState::new(DisplayMode::ProjectionDebug);
        assert_eq!(
            render(&mut set, &tracker, None, &display),
            Err(RenderError::DimensionMismatch {
                texture: CAMERA,
                source: big,
            })
        );
    }

    #[test]
    fn test_mesh_pack_wireframe_expands_edges() {
        let meshes = vec![triangle_mesh(), triangle_mesh()];
        let batch = MeshBatch::pack(&meshes, MeshTopology::Lines).unwrap();
        assert_eq!(batch.vertices.len(), 8);
        assert_eq!(batch.indices.len(), 24);
        assert_eq!(&batch.indices[..6], &[0, 1, 1, 2, 2, 0]);
        assert_eq!(
            batch.ranges[1],
            MeshRange {
                first_index: 12,
                index_count: 12,
                base_vertex: 4,
            }
        );
    }

    #[test]
    fn test_mesh_too_large() {
        let mesh = QuadTreeMesh {
            vertices: vec![[0.0; 4]; QTM_MAX_VERTICES + 1],
            indices: Vec::new(),
            texture: None,
        };
        assert!(matches!(
            MeshBatch::pack(&[mesh], MeshTopology::Triangles),
            Err(RenderError::MeshTooLarge { .. })
        ));
    }

    #[test]
    fn test_quadtree_highlights_selected_plane() {
        let mut set = resources();
        let tracker = FixedTracker {
            meshes: vec![triangle_mesh(), triangle_mesh()],
            ..Default::default()
        };
        let mut display = DisplayState::new(DisplayMode::Quadtree);
        let programs = render(&mut set, &tracker, None, &display).unwrap();
        assert_eq!(programs, vec![ProgramKind::QtmHighlightGreen, ProgramKind::QtmDist]);

        display.wireframe = true;
        display.select(DisplayMode::Quadtree, tracker.plane_count());
        let programs = render(&mut set, &tracker, None, &display).unwrap();
        assert_eq!(
            programs,
            vec![ProgramKind::QtmHighlightBlue, ProgramKind::QtmHighlightGreen]
        );
        match &set.backend().last_frame()[0] {
            RecordedDraw::Mesh(m) => {
                assert_eq!(m.topology, MeshTopology::Lines);
                assert_eq!(m.index_count, 12);
            }
            other => panic!("unexpected draw {:?}", other),
        }
    }

    #[test]
    fn test_none_draws_nothing() {
        let mut set = resources();
        let display = DisplayState::new(DisplayMode::None);
        let programs = render(&mut set, &FixedTracker::default(), None, &display).unwrap();
        assert!(programs.is_empty());
        assert_eq!(set.backend().frames_submitted(), 1);
    }
}
