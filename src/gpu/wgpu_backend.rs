// SPDX-License-Identifier: GPL-3.0-only

//! wgpu implementation of [`GpuBackend`]
//!
//! Renders into offscreen textures; there is no window surface. Draws are
//! recorded between `begin_frame` and `end_frame` and encoded into a single
//! render pass on submission. Uploads are submitted immediately, so they
//! land before the draws of the frame that follows them.

use super::backend::{
    BufferDesc, BufferHandle, BufferKind, GpuBackend, MeshDraw, MeshTopology, ProgramHandle,
    ProgramKind, QuadDraw, RenderTarget, TextureDesc, TextureFormat, TextureHandle, Viewport,
};
use super::{GpuDeviceInfo, create_render_device, padded_bytes_per_row, read_buffer_async};
use crate::errors::ResourceError;
use crate::frame::Resolution;
use crate::shaders::{MESH_SHADER, QUAD_SHADER, VERTEX_ENTRY};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDesc,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    desc: BufferDesc,
}

enum Pipelines {
    Quad(wgpu::RenderPipeline),
    Mesh {
        triangles: wgpu::RenderPipeline,
        lines: wgpu::RenderPipeline,
        points: wgpu::RenderPipeline,
    },
}

struct Program {
    kind: ProgramKind,
    pipelines: Pipelines,
}

enum PendingDraw {
    Quad(QuadDraw),
    Mesh(MeshDraw),
}

struct PendingFrame {
    target: RenderTarget,
    clear: [f32; 4],
    draws: Vec<PendingDraw>,
}

/// Offscreen wgpu renderer
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    info: GpuDeviceInfo,
    next_id: u64,
    textures: HashMap<u64, GpuTexture>,
    buffers: HashMap<u64, GpuBuffer>,
    programs: HashMap<u64, Program>,
    quad_module: Option<wgpu::ShaderModule>,
    mesh_module: Option<wgpu::ShaderModule>,
    quad_bind_layout: wgpu::BindGroupLayout,
    mesh_bind_layout: wgpu::BindGroupLayout,
    quad_pipeline_layout: wgpu::PipelineLayout,
    mesh_pipeline_layout: wgpu::PipelineLayout,
    frame: Option<PendingFrame>,
}

impl WgpuBackend {
    /// Create a backend on a new offscreen device
    pub async fn new() -> Result<Self, ResourceError> {
        let (device, queue, info) = create_render_device("rgbd-viewer render").await?;
        Ok(Self::from_device(device, queue, info))
    }

    pub fn from_device(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        info: GpuDeviceInfo,
    ) -> Self {
        let quad_bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("rgbd-viewer quad bind group layout"),
            entries: &[
                // Source texture, read with textureLoad
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // QuadParams
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let mesh_bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("rgbd-viewer mesh bind group layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let quad_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("rgbd-viewer quad pipeline layout"),
            bind_group_layouts: &[&quad_bind_layout],
            push_constant_ranges: &[],
        });
        let mesh_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("rgbd-viewer mesh pipeline layout"),
            bind_group_layouts: &[&mesh_bind_layout],
            push_constant_ranges: &[],
        });

        info!(adapter = %info.adapter_name, backend = ?info.backend, "wgpu backend ready");

        Self {
            device,
            queue,
            info,
            next_id: 1,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            quad_module: None,
            mesh_module: None,
            quad_bind_layout,
            mesh_bind_layout,
            quad_pipeline_layout,
            mesh_pipeline_layout,
            frame: None,
        }
    }

    pub fn info(&self) -> &GpuDeviceInfo {
        &self.info
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Run `f` inside validation and out-of-memory error scopes
    fn scoped<T>(
        &self,
        label: &str,
        f: impl FnOnce(&wgpu::Device) -> T,
    ) -> Result<T, ResourceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        match validation.or(oom) {
            Some(e) => Err(ResourceError::CreationFailed {
                label: label.to_string(),
                reason: e.to_string(),
            }),
            None => Ok(value),
        }
    }

    fn texture(&self, texture: TextureHandle) -> Result<&GpuTexture, ResourceError> {
        self.textures
            .get(&texture.0)
            .ok_or_else(|| ResourceError::Dangling(texture.to_string()))
    }

    fn buffer(&self, buffer: BufferHandle) -> Result<&GpuBuffer, ResourceError> {
        self.buffers
            .get(&buffer.0)
            .ok_or_else(|| ResourceError::Dangling(buffer.to_string()))
    }

    fn program(&self, program: ProgramHandle) -> Result<&Program, ResourceError> {
        self.programs
            .get(&program.0)
            .ok_or_else(|| ResourceError::Dangling(program.to_string()))
    }

    fn shader_module(&mut self, mesh: bool) -> wgpu::ShaderModule {
        let (slot, source, label) = if mesh {
            (&mut self.mesh_module, MESH_SHADER, "rgbd-viewer mesh shader")
        } else {
            (&mut self.quad_module, QUAD_SHADER, "rgbd-viewer quad shader")
        };
        slot.get_or_insert_with(|| {
            self.device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(label),
                    source: wgpu::ShaderSource::Wgsl(source.into()),
                })
        })
        .clone()
    }

    fn build_pipeline(
        &self,
        kind: ProgramKind,
        module: &wgpu::ShaderModule,
        topology: wgpu::PrimitiveTopology,
    ) -> wgpu::RenderPipeline {
        let mesh = kind.is_mesh();
        let vertex_attributes = if mesh {
            wgpu::vertex_attr_array![0 => Float32x4]
        } else {
            wgpu::vertex_attr_array![0 => Float32x2]
        };
        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: if mesh { 16 } else { 8 },
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &vertex_attributes,
        };

        self.device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(kind.label()),
                layout: Some(if mesh {
                    &self.mesh_pipeline_layout
                } else {
                    &self.quad_pipeline_layout
                }),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some(VERTEX_ENTRY),
                    buffers: &[vertex_layout],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module,
                    entry_point: Some(kind.fragment_entry()),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    // Quads are 2D overlays; only meshes use the depth test
                    depth_write_enabled: mesh,
                    depth_compare: if mesh {
                        wgpu::CompareFunction::Less
                    } else {
                        wgpu::CompareFunction::Always
                    },
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
    }

    fn mesh_pipeline(&self, draw: &MeshDraw) -> Result<&wgpu::RenderPipeline, ResourceError> {
        match &self.program(draw.program)?.pipelines {
            Pipelines::Mesh {
                triangles,
                lines,
                points,
            } => Ok(match draw.topology {
                MeshTopology::Triangles => triangles,
                MeshTopology::Lines => lines,
                MeshTopology::Points => points,
            }),
            Pipelines::Quad(_) => Err(ResourceError::Backend(
                "quad program used for a mesh draw".to_string(),
            )),
        }
    }

    fn encode_frame(&self, frame: &PendingFrame) -> Result<wgpu::CommandBuffer, ResourceError> {
        let color = self.texture(frame.target.color)?;
        let depth = self.texture(frame.target.depth)?;
        let size = color.desc.size;

        // Bind groups are built up front so they outlive the render pass
        let mut bound = Vec::with_capacity(frame.draws.len());
        for draw in &frame.draws {
            let bind_group = match draw {
                PendingDraw::Quad(q) => {
                    let uniform =
                        self.device
                            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                                label: Some("quad params"),
                                contents: bytemuck::bytes_of(&q.params),
                                usage: wgpu::BufferUsages::UNIFORM,
                            });
                    let source = self.texture(q.texture)?;
                    self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("quad bind group"),
                        layout: &self.quad_bind_layout,
                        entries: &[
                            wgpu::BindGroupEntry {
                                binding: 0,
                                resource: wgpu::BindingResource::TextureView(&source.view),
                            },
                            wgpu::BindGroupEntry {
                                binding: 1,
                                resource: uniform.as_entire_binding(),
                            },
                        ],
                    })
                }
                PendingDraw::Mesh(m) => {
                    let uniform =
                        self.device
                            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                                label: Some("mesh params"),
                                contents: bytemuck::bytes_of(&m.params),
                                usage: wgpu::BufferUsages::UNIFORM,
                            });
                    self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("mesh bind group"),
                        layout: &self.mesh_bind_layout,
                        entries: &[wgpu::BindGroupEntry {
                            binding: 0,
                            resource: uniform.as_entire_binding(),
                        }],
                    })
                }
            };
            bound.push(bind_group);
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("rgbd-viewer frame"),
            });
        {
            let [r, g, b, a] = frame.clear.map(f64::from);
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("rgbd-viewer frame pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for (draw, bind_group) in frame.draws.iter().zip(&bound) {
                match draw {
                    PendingDraw::Quad(q) => {
                        let Pipelines::Quad(pipeline) = &self.program(q.program)?.pipelines else {
                            return Err(ResourceError::Backend(
                                "mesh program used for a quad draw".to_string(),
                            ));
                        };
                        set_viewport(&mut pass, Viewport::FULL, size);
                        pass.set_pipeline(pipeline);
                        pass.set_bind_group(0, bind_group, &[]);
                        pass.set_vertex_buffer(0, self.buffer(q.geometry)?.buffer.slice(..));
                        pass.draw(0..6, 0..1);
                    }
                    PendingDraw::Mesh(m) => {
                        set_viewport(&mut pass, m.viewport, size);
                        pass.set_pipeline(self.mesh_pipeline(m)?);
                        pass.set_bind_group(0, bind_group, &[]);
                        pass.set_vertex_buffer(0, self.buffer(m.vertices)?.buffer.slice(..));
                        pass.set_index_buffer(
                            self.buffer(m.indices)?.buffer.slice(..),
                            wgpu::IndexFormat::Uint32,
                        );
                        pass.draw_indexed(
                            m.first_index..m.first_index + m.index_count,
                            m.base_vertex,
                            0..1,
                        );
                    }
                }
            }
        }
        Ok(encoder.finish())
    }
}

fn set_viewport(pass: &mut wgpu::RenderPass<'_>, viewport: Viewport, size: Resolution) {
    let (w, h) = (size.width as f32, size.height as f32);
    pass.set_viewport(
        viewport.x * w,
        viewport.y * h,
        (viewport.w * w).max(1.0),
        (viewport.h * h).max(1.0),
        0.0,
        1.0,
    );
}

fn wgpu_format(format: TextureFormat) -> (wgpu::TextureFormat, wgpu::TextureUsages) {
    match format {
        TextureFormat::R32Float => (
            wgpu::TextureFormat::R32Float,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        ),
        TextureFormat::Rgba32Float => (
            wgpu::TextureFormat::Rgba32Float,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        ),
        TextureFormat::Rgba8Unorm => (
            COLOR_FORMAT,
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::RENDER_ATTACHMENT,
        ),
        TextureFormat::Depth32 => (DEPTH_FORMAT, wgpu::TextureUsages::RENDER_ATTACHMENT),
    }
}

fn buffer_usage(kind: BufferKind) -> wgpu::BufferUsages {
    match kind {
        BufferKind::PixelUnpack => wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        BufferKind::PixelPack => wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        BufferKind::Vertex => wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        BufferKind::Index => wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
    }
}

/// Copy tightly packed rows into rows of `padded` bytes
fn pad_rows(data: &[u8], row: usize, padded: usize, rows: usize) -> Vec<u8> {
    let mut out = vec![0u8; padded * rows];
    for y in 0..rows {
        out[y * padded..y * padded + row].copy_from_slice(&data[y * row..(y + 1) * row]);
    }
    out
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &str {
        &self.info.adapter_name
    }

    fn max_texture_dimension(&self) -> u32 {
        self.info.max_texture_dimension
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, ResourceError> {
        let max = self.info.max_texture_dimension;
        if desc.size.is_empty() || desc.size.width > max || desc.size.height > max {
            return Err(ResourceError::InvalidSize(desc.size));
        }
        let (format, usage) = wgpu_format(desc.format);
        let texture = self.scoped(&desc.label, |device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(&desc.label),
                size: wgpu::Extent3d {
                    width: desc.size.width,
                    height: desc.size.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        })?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = self.allocate_id();
        debug!(label = %desc.label, size = %desc.size, id, "Created texture");
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                view,
                desc: desc.clone(),
            },
        );
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) -> Result<(), ResourceError> {
        let t = self
            .textures
            .remove(&texture.0)
            .ok_or_else(|| ResourceError::Dangling(texture.to_string()))?;
        t.texture.destroy();
        Ok(())
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, ResourceError> {
        if desc.size == 0 {
            return Err(ResourceError::CreationFailed {
                label: desc.label.clone(),
                reason: "zero-sized buffer".to_string(),
            });
        }
        let size = desc.size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let buffer = self.scoped(&desc.label, |device| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&desc.label),
                size,
                usage: buffer_usage(desc.kind),
                mapped_at_creation: false,
            })
        })?;
        let id = self.allocate_id();
        self.buffers.insert(
            id,
            GpuBuffer {
                buffer,
                desc: desc.clone(),
            },
        );
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) -> Result<(), ResourceError> {
        let b = self
            .buffers
            .remove(&buffer.0)
            .ok_or_else(|| ResourceError::Dangling(buffer.to_string()))?;
        b.buffer.destroy();
        Ok(())
    }

    fn create_program(&mut self, kind: ProgramKind) -> Result<ProgramHandle, ResourceError> {
        let module = self.shader_module(kind.is_mesh());
        let pipelines = self.scoped(kind.label(), |_| {
            if kind.is_mesh() {
                Pipelines::Mesh {
                    triangles: self.build_pipeline(
                        kind,
                        &module,
                        wgpu::PrimitiveTopology::TriangleList,
                    ),
                    lines: self.build_pipeline(kind, &module, wgpu::PrimitiveTopology::LineList),
                    points: self.build_pipeline(kind, &module, wgpu::PrimitiveTopology::PointList),
                }
            } else {
                Pipelines::Quad(self.build_pipeline(
                    kind,
                    &module,
                    wgpu::PrimitiveTopology::TriangleList,
                ))
            }
        })?;
        let id = self.allocate_id();
        debug!(program = kind.label(), id, "Created program");
        self.programs.insert(id, Program { kind, pipelines });
        Ok(ProgramHandle(id))
    }

    fn destroy_program(&mut self, program: ProgramHandle) -> Result<(), ResourceError> {
        self.programs
            .remove(&program.0)
            .map(|p| debug!(program = p.kind.label(), "Destroyed program"))
            .ok_or_else(|| ResourceError::Dangling(program.to_string()))
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        let target = self.buffer(buffer)?;
        let end = offset + data.len() as u64;
        if end > target.desc.size {
            return Err(ResourceError::BufferTooSmall {
                label: target.desc.label.clone(),
                capacity: target.desc.size,
                required: end,
            });
        }
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0
            || data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0
        {
            return Err(ResourceError::Backend(format!(
                "unaligned write of {} bytes at {} into '{}'",
                data.len(),
                offset,
                target.desc.label
            )));
        }
        self.queue.write_buffer(&target.buffer, offset, data);
        Ok(())
    }

    fn upload_texture(
        &mut self,
        staging: BufferHandle,
        texture: TextureHandle,
        region: Resolution,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        let dst = self.texture(texture)?;
        if dst.desc.format == TextureFormat::Depth32 {
            return Err(ResourceError::Backend(format!(
                "'{}' is a depth attachment",
                dst.desc.label
            )));
        }
        if region.is_empty()
            || region.width > dst.desc.size.width
            || region.height > dst.desc.size.height
        {
            return Err(ResourceError::SizeMismatch {
                label: dst.desc.label.clone(),
                expected: dst.desc.size,
                actual: region,
            });
        }
        let row = (region.width * dst.desc.format.bytes_per_pixel()) as usize;
        let rows = region.height as usize;
        if data.len() != row * rows {
            return Err(ResourceError::BufferTooSmall {
                label: dst.desc.label.clone(),
                capacity: data.len() as u64,
                required: (row * rows) as u64,
            });
        }

        let src = self.buffer(staging)?;
        if src.desc.kind != BufferKind::PixelUnpack {
            return Err(ResourceError::Backend(format!(
                "'{}' is not a staging buffer",
                src.desc.label
            )));
        }
        let padded = padded_bytes_per_row(row as u32) as usize;
        let required = (padded * rows) as u64;
        if required > src.desc.size {
            return Err(ResourceError::BufferTooSmall {
                label: src.desc.label.clone(),
                capacity: src.desc.size,
                required,
            });
        }

        if padded == row {
            self.queue.write_buffer(&src.buffer, 0, data);
        } else {
            self.queue
                .write_buffer(&src.buffer, 0, &pad_rows(data, row, padded, rows));
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("rgbd-viewer upload"),
            });
        encoder.copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: &src.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded as u32),
                    rows_per_image: Some(region.height),
                },
            },
            wgpu::TexelCopyTextureInfo {
                texture: &dst.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn begin_frame(&mut self, target: RenderTarget, clear: [f32; 4]) -> Result<(), ResourceError> {
        let color = self.texture(target.color)?;
        let depth = self.texture(target.depth)?;
        if color.desc.size != depth.desc.size {
            return Err(ResourceError::SizeMismatch {
                label: depth.desc.label.clone(),
                expected: color.desc.size,
                actual: depth.desc.size,
            });
        }
        self.frame = Some(PendingFrame {
            target,
            clear,
            draws: Vec::new(),
        });
        Ok(())
    }

    fn draw_quad(&mut self, draw: &QuadDraw) -> Result<(), ResourceError> {
        if self.program(draw.program)?.kind.is_mesh() {
            return Err(ResourceError::Backend(
                "mesh program used for a quad draw".to_string(),
            ));
        }
        self.texture(draw.texture)?;
        self.buffer(draw.geometry)?;
        let frame = self
            .frame
            .as_mut()
            .ok_or_else(|| ResourceError::Backend("draw outside of a frame".to_string()))?;
        if draw.texture == frame.target.color {
            return Err(ResourceError::Backend(
                "frame-buffer color attachment sampled while bound".to_string(),
            ));
        }
        frame.draws.push(PendingDraw::Quad(*draw));
        Ok(())
    }

    fn draw_mesh(&mut self, draw: &MeshDraw) -> Result<(), ResourceError> {
        self.mesh_pipeline(draw)?;
        self.buffer(draw.vertices)?;
        let indices = self.buffer(draw.indices)?;
        let end = (draw.first_index as u64 + draw.index_count as u64) * 4;
        if end > indices.desc.size {
            return Err(ResourceError::BufferTooSmall {
                label: indices.desc.label.clone(),
                capacity: indices.desc.size,
                required: end,
            });
        }
        self.frame
            .as_mut()
            .ok_or_else(|| ResourceError::Backend("draw outside of a frame".to_string()))?
            .draws
            .push(PendingDraw::Mesh(*draw));
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), ResourceError> {
        let frame = self
            .frame
            .take()
            .ok_or_else(|| ResourceError::Backend("end_frame without begin_frame".to_string()))?;
        let commands = self.encode_frame(&frame)?;
        self.queue.submit(Some(commands));
        Ok(())
    }

    fn read_texture(
        &mut self,
        texture: TextureHandle,
        readback: BufferHandle,
    ) -> Result<Vec<u8>, ResourceError> {
        let src = self.texture(texture)?;
        let dst = self.buffer(readback)?;
        if dst.desc.kind != BufferKind::PixelPack {
            return Err(ResourceError::Backend(format!(
                "'{}' is not a read-back buffer",
                dst.desc.label
            )));
        }
        let size = src.desc.size;
        let row = (size.width * src.desc.format.bytes_per_pixel()) as usize;
        let padded = padded_bytes_per_row(row as u32) as usize;
        let required = (padded * size.height as usize) as u64;
        if required > dst.desc.size {
            return Err(ResourceError::BufferTooSmall {
                label: dst.desc.label.clone(),
                capacity: dst.desc.size,
                required,
            });
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("rgbd-viewer readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &src.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &dst.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded as u32),
                    rows_per_image: Some(size.height),
                },
            },
            wgpu::Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let mapped = pollster::block_on(read_buffer_async(&self.device, &dst.buffer, required))?;

        let mut pixels = Vec::with_capacity(row * size.height as usize);
        for chunk in mapped.chunks_exact(padded) {
            pixels.extend_from_slice(&chunk[..row]);
        }
        Ok(pixels)
    }
}
