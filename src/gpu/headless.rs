// SPDX-License-Identifier: GPL-3.0-only

//! CPU-side backend without a graphics device
//!
//! Keeps texture contents in memory, validates every handle and size the
//! way a real device would, and records the draws of each frame. Used by
//! the test suite and by `headless` mode on machines without a GPU.

use super::backend::{
    BufferDesc, BufferHandle, BufferKind, GpuBackend, MeshDraw, ProgramHandle, ProgramKind,
    QuadDraw, RenderTarget, TextureDesc, TextureFormat, TextureHandle,
};
use crate::constants::MAX_TEXTURE_DIMENSION;
use crate::errors::ResourceError;
use crate::frame::Resolution;
use std::collections::HashMap;
use tracing::trace;

/// A draw recorded by [`HeadlessBackend`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedDraw {
    Quad(QuadDraw),
    Mesh(MeshDraw),
}

impl RecordedDraw {
    pub fn program(&self) -> ProgramHandle {
        match self {
            RecordedDraw::Quad(q) => q.program,
            RecordedDraw::Mesh(m) => m.program,
        }
    }
}

struct Texture {
    desc: TextureDesc,
    data: Vec<u8>,
    uploads: u64,
}

struct Buffer {
    desc: BufferDesc,
    data: Vec<u8>,
}

struct Frame {
    target: RenderTarget,
    draws: Vec<RecordedDraw>,
}

/// Backend that performs no rendering
pub struct HeadlessBackend {
    next_id: u64,
    max_dimension: u32,
    textures: HashMap<u64, Texture>,
    buffers: HashMap<u64, Buffer>,
    programs: HashMap<u64, ProgramKind>,
    frame: Option<Frame>,
    last_frame: Vec<RecordedDraw>,
    frames_submitted: u64,
    /// Test hook: fail the n-th resource creation from now
    fail_after: Option<u32>,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::with_max_dimension(MAX_TEXTURE_DIMENSION)
    }

    pub fn with_max_dimension(max_dimension: u32) -> Self {
        Self {
            next_id: 1,
            max_dimension,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            programs: HashMap::new(),
            frame: None,
            last_frame: Vec::new(),
            frames_submitted: 0,
            fail_after: None,
        }
    }

    /// Make the `n`-th resource creation from now fail (0 = the next one)
    pub fn fail_creation_after(&mut self, n: u32) {
        self.fail_after = Some(n);
    }

    /// Number of textures, buffers and programs currently alive
    pub fn live_resources(&self) -> usize {
        self.textures.len() + self.buffers.len() + self.programs.len()
    }

    pub fn texture_live(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture.0)
    }

    pub fn texture_desc(&self, texture: TextureHandle) -> Option<&TextureDesc> {
        self.textures.get(&texture.0).map(|t| &t.desc)
    }

    pub fn texture_data(&self, texture: TextureHandle) -> Option<&[u8]> {
        self.textures.get(&texture.0).map(|t| t.data.as_slice())
    }

    /// How many times `texture` has been uploaded to
    pub fn texture_uploads(&self, texture: TextureHandle) -> u64 {
        self.textures.get(&texture.0).map(|t| t.uploads).unwrap_or(0)
    }

    pub fn program_kind(&self, program: ProgramHandle) -> Option<ProgramKind> {
        self.programs.get(&program.0).copied()
    }

    /// Draws of the last submitted frame
    pub fn last_frame(&self) -> &[RecordedDraw] {
        &self.last_frame
    }

    /// Programs used by the last submitted frame, in draw order
    pub fn last_frame_programs(&self) -> Vec<ProgramKind> {
        self.last_frame
            .iter()
            .filter_map(|d| self.program_kind(d.program()))
            .collect()
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    fn allocate_id(&mut self, label: &str) -> Result<u64, ResourceError> {
        if let Some(n) = self.fail_after {
            if n == 0 {
                self.fail_after = None;
                return Err(ResourceError::CreationFailed {
                    label: label.to_string(),
                    reason: "injected failure".to_string(),
                });
            }
            self.fail_after = Some(n - 1);
        }
        let id = self.next_id;
        self.next_id += 1;
        Ok(id)
    }

    fn texture(&self, texture: TextureHandle) -> Result<&Texture, ResourceError> {
        self.textures
            .get(&texture.0)
            .ok_or_else(|| ResourceError::Dangling(texture.to_string()))
    }

    fn buffer(&self, buffer: BufferHandle) -> Result<&Buffer, ResourceError> {
        self.buffers
            .get(&buffer.0)
            .ok_or_else(|| ResourceError::Dangling(buffer.to_string()))
    }

    fn check_program(&self, program: ProgramHandle, mesh: bool) -> Result<(), ResourceError> {
        match self.programs.get(&program.0) {
            Some(kind) if kind.is_mesh() == mesh => Ok(()),
            Some(kind) => Err(ResourceError::Backend(format!(
                "program {} cannot draw {}",
                kind.label(),
                if mesh { "meshes" } else { "quads" }
            ))),
            None => Err(ResourceError::Dangling(program.to_string())),
        }
    }

    fn frame_mut(&mut self) -> Result<&mut Frame, ResourceError> {
        self.frame
            .as_mut()
            .ok_or_else(|| ResourceError::Backend("draw outside of a frame".to_string()))
    }
}

impl GpuBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    fn max_texture_dimension(&self) -> u32 {
        self.max_dimension
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, ResourceError> {
        if desc.size.is_empty()
            || desc.size.width > self.max_dimension
            || desc.size.height > self.max_dimension
        {
            return Err(ResourceError::InvalidSize(desc.size));
        }
        let id = self.allocate_id(&desc.label)?;
        self.textures.insert(
            id,
            Texture {
                desc: desc.clone(),
                data: vec![0; desc.byte_len() as usize],
                uploads: 0,
            },
        );
        trace!(label = %desc.label, size = %desc.size, id, "Created texture");
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) -> Result<(), ResourceError> {
        self.textures
            .remove(&texture.0)
            .map(|_| ())
            .ok_or_else(|| ResourceError::Dangling(texture.to_string()))
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, ResourceError> {
        if desc.size == 0 {
            return Err(ResourceError::CreationFailed {
                label: desc.label.clone(),
                reason: "zero-sized buffer".to_string(),
            });
        }
        let id = self.allocate_id(&desc.label)?;
        self.buffers.insert(
            id,
            Buffer {
                desc: desc.clone(),
                data: vec![0; desc.size as usize],
            },
        );
        Ok(BufferHandle(id))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) -> Result<(), ResourceError> {
        self.buffers
            .remove(&buffer.0)
            .map(|_| ())
            .ok_or_else(|| ResourceError::Dangling(buffer.to_string()))
    }

    fn create_program(&mut self, kind: ProgramKind) -> Result<ProgramHandle, ResourceError> {
        let id = self.allocate_id(kind.label())?;
        self.programs.insert(id, kind);
        Ok(ProgramHandle(id))
    }

    fn destroy_program(&mut self, program: ProgramHandle) -> Result<(), ResourceError> {
        self.programs
            .remove(&program.0)
            .map(|_| ())
            .ok_or_else(|| ResourceError::Dangling(program.to_string()))
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        let target = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| ResourceError::Dangling(buffer.to_string()))?;
        let end = offset + data.len() as u64;
        if end > target.desc.size {
            return Err(ResourceError::BufferTooSmall {
                label: target.desc.label.clone(),
                capacity: target.desc.size,
                required: end,
            });
        }
        target.data[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn upload_texture(
        &mut self,
        staging: BufferHandle,
        texture: TextureHandle,
        region: Resolution,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        let (desc, bpp) = {
            let t = self.texture(texture)?;
            (t.desc.clone(), t.desc.format.bytes_per_pixel() as usize)
        };
        if desc.format == TextureFormat::Depth32 {
            return Err(ResourceError::Backend(format!(
                "'{}' is a depth attachment",
                desc.label
            )));
        }
        if region.is_empty() || region.width > desc.size.width || region.height > desc.size.height
        {
            return Err(ResourceError::SizeMismatch {
                label: desc.label,
                expected: desc.size,
                actual: region,
            });
        }
        let row = region.width as usize * bpp;
        if data.len() != row * region.height as usize {
            return Err(ResourceError::BufferTooSmall {
                label: desc.label,
                capacity: data.len() as u64,
                required: (row * region.height as usize) as u64,
            });
        }

        let staged = self.buffer(staging)?;
        if staged.desc.kind != BufferKind::PixelUnpack {
            return Err(ResourceError::Backend(format!(
                "'{}' is not a staging buffer",
                staged.desc.label
            )));
        }
        self.write_buffer(staging, 0, data)?;

        let stride = desc.size.width as usize * bpp;
        let staged = &self.buffers[&staging.0].data;
        let dst = self
            .textures
            .get_mut(&texture.0)
            .ok_or_else(|| ResourceError::Dangling(texture.to_string()))?;
        for y in 0..region.height as usize {
            dst.data[y * stride..y * stride + row].copy_from_slice(&staged[y * row..(y + 1) * row]);
        }
        dst.uploads += 1;
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

        let texel = clear.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        if let Some(color) = self.textures.get_mut(&target.color.0) {
            for px in color.data.chunks_exact_mut(4) {
                px.copy_from_slice(&texel);
            }
        }
        self.frame = Some(Frame {
            target,
            draws: Vec::new(),
        });
        Ok(())
    }

    fn draw_quad(&mut self, draw: &QuadDraw) -> Result<(), ResourceError> {
        self.check_program(draw.program, false)?;
        self.texture(draw.texture)?;
        let geometry = self.buffer(draw.geometry)?;
        if geometry.desc.kind != BufferKind::Vertex {
            return Err(ResourceError::Backend(format!(
                "'{}' is not a vertex buffer",
                geometry.desc.label
            )));
        }
        let frame = self.frame_mut()?;
        if draw.texture == frame.target.color {
            return Err(ResourceError::Backend(
                "frame-buffer color attachment sampled while bound".to_string(),
            ));
        }
        frame.draws.push(RecordedDraw::Quad(*draw));
        Ok(())
    }

    fn draw_mesh(&mut self, draw: &MeshDraw) -> Result<(), ResourceError> {
        self.check_program(draw.program, true)?;
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
        self.frame_mut()?.draws.push(RecordedDraw::Mesh(*draw));
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), ResourceError> {
        let frame = self
            .frame
            .take()
            .ok_or_else(|| ResourceError::Backend("end_frame without begin_frame".to_string()))?;
        // Attachments may have been destroyed mid-frame by a resize
        self.texture(frame.target.color)?;
        self.texture(frame.target.depth)?;
        self.last_frame = frame.draws;
        self.frames_submitted += 1;
        Ok(())
    }

    fn read_texture(
        &mut self,
        texture: TextureHandle,
        readback: BufferHandle,
    ) -> Result<Vec<u8>, ResourceError> {
        let t = self.texture(texture)?;
        let b = self.buffer(readback)?;
        if b.desc.kind != BufferKind::PixelPack {
            return Err(ResourceError::Backend(format!(
                "'{}' is not a read-back buffer",
                b.desc.label
            )));
        }
        if b.desc.size < t.desc.byte_len() {
            return Err(ResourceError::BufferTooSmall {
                label: b.desc.label.clone(),
                capacity: b.desc.size,
                required: t.desc.byte_len(),
            });
        }
        Ok(t.data.clone())
    }
}
