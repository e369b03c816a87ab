// SPDX-License-Identifier: GPL-3.0-only

//! GPU Resource Set
//!
//! Owns every program, texture and buffer the display modes use, grouped by
//! what their size depends on:
//!
//! | Group                 | Created by             | Contents                                  |
//! |-----------------------|------------------------|-------------------------------------------|
//! | [`StaticResources`]   | `initialize`           | programs, unit quad, quadtree mesh buffers, quadtree and histogram textures |
//! | [`CameraResources`]   | `initialize`           | depth/color/map textures, staging buffers |
//! | [`ScreenResources`]   | `initialize`, `resize` | frame buffer (color + depth), read-back buffer |
//!
//! Each group records the handles it created, so releasing it destroys
//! exactly those handles once. A group that fails half-way releases what it
//! already created before the error is returned.

use super::backend::{
    BufferDesc, BufferHandle, BufferKind, GpuBackend, ProgramHandle, ProgramKind, RenderTarget,
    TextureDesc, TextureFormat, TextureHandle,
};
use super::staging_size;
use crate::constants::histogram::{
    DISTANCE_BINS, MAX_DISTANCE_HISTOGRAMS, NORMAL_AZIMUTH_BINS, NORMAL_ELEVATION_BINS,
};
use crate::constants::{
    IMAGE_PBO_COUNT, IMAGE_TEXTURE_COUNT, QTM_MAX_INDICES, QTM_MAX_VERTICES, QTM_TEXTURE_SIZE,
};
use crate::errors::ResourceError;
use crate::frame::Resolution;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Unit quad as two triangles, (u, v) per vertex
const UNIT_QUAD: [[f32; 2]; 6] = [
    [0.0, 0.0],
    [1.0, 0.0],
    [0.0, 1.0],
    [0.0, 1.0],
    [1.0, 0.0],
    [1.0, 1.0],
];

/// Handles created by one resource group
#[derive(Debug, Default)]
struct Owned {
    textures: Vec<TextureHandle>,
    buffers: Vec<BufferHandle>,
    programs: Vec<ProgramHandle>,
}

impl Owned {
    fn texture<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        desc: TextureDesc,
    ) -> Result<TextureHandle, ResourceError> {
        let handle = backend.create_texture(&desc)?;
        self.textures.push(handle);
        Ok(handle)
    }

    fn buffer<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        desc: BufferDesc,
    ) -> Result<BufferHandle, ResourceError> {
        let handle = backend.create_buffer(&desc)?;
        self.buffers.push(handle);
        Ok(handle)
    }

    fn program<B: GpuBackend>(
        &mut self,
        backend: &mut B,
        kind: ProgramKind,
    ) -> Result<ProgramHandle, ResourceError> {
        let handle = backend.create_program(kind)?;
        self.programs.push(handle);
        Ok(handle)
    }

    fn len(&self) -> usize {
        self.textures.len() + self.buffers.len() + self.programs.len()
    }

    /// Destroy in reverse creation order
    fn release<B: GpuBackend>(self, backend: &mut B, group: &str) {
        let count = self.len();
        for program in self.programs.into_iter().rev() {
            if let Err(e) = backend.destroy_program(program) {
                warn!(group, error = %e, "Failed to destroy program");
            }
        }
        for buffer in self.buffers.into_iter().rev() {
            if let Err(e) = backend.destroy_buffer(buffer) {
                warn!(group, error = %e, "Failed to destroy buffer");
            }
        }
        for texture in self.textures.into_iter().rev() {
            if let Err(e) = backend.destroy_texture(texture) {
                warn!(group, error = %e, "Failed to destroy texture");
            }
        }
        debug!(group, count, "Released GPU resources");
    }
}

/// Run `build`, releasing everything it created if it fails
fn build_group<B, T>(
    backend: &mut B,
    group: &str,
    build: impl FnOnce(&mut B, &mut Owned) -> Result<T, ResourceError>,
) -> Result<(T, Owned), ResourceError>
where
    B: GpuBackend,
{
    let mut owned = Owned::default();
    match build(backend, &mut owned) {
        Ok(value) => Ok((value, owned)),
        Err(e) => {
            warn!(group, error = %e, created = owned.len(), "Resource creation failed, rolling back");
            owned.release(backend, group);
            Err(e)
        }
    }
}

/// Resources whose size does not depend on camera or screen resolution
#[derive(Debug)]
pub struct StaticResources {
    programs: BTreeMap<ProgramKind, ProgramHandle>,
    /// Unit quad vertex buffer shared by every quad program
    pub quad: BufferHandle,
    /// Quadtree mesh vertices (vec4), [`QTM_MAX_VERTICES`] capacity
    pub qtm_vertices: BufferHandle,
    /// Quadtree mesh indices (u32), [`QTM_MAX_INDICES`] capacity
    pub qtm_indices: BufferHandle,
    /// Quadtree cell image, [`QTM_TEXTURE_SIZE`] square
    pub qtm_texture: TextureHandle,
    /// Azimuth x elevation normal histogram (Rgba32Float)
    pub normal_histogram: TextureHandle,
    /// One distance histogram per row (Rgba32Float)
    pub distance_histograms: TextureHandle,
    owned: Owned,
}

impl StaticResources {
    fn create<B: GpuBackend>(backend: &mut B) -> Result<Self, ResourceError> {
        let (mut statics, owned) = build_group(backend, "static", |backend, owned| {
            let mut programs = BTreeMap::new();
            for kind in ProgramKind::ALL {
                programs.insert(kind, owned.program(backend, kind)?);
            }

            let quad = owned.buffer(
                backend,
                BufferDesc::new("unit quad", size_of_val(&UNIT_QUAD) as u64, BufferKind::Vertex),
            )?;
            backend.write_buffer(quad, 0, bytemuck::cast_slice(&UNIT_QUAD))?;

            let qtm_vertices = owned.buffer(
                backend,
                BufferDesc::new(
                    "quadtree mesh vertices",
                    (QTM_MAX_VERTICES * size_of::<[f32; 4]>()) as u64,
                    BufferKind::Vertex,
                ),
            )?;
            let qtm_indices = owned.buffer(
                backend,
                BufferDesc::new(
                    "quadtree mesh indices",
                    (QTM_MAX_INDICES * size_of::<u32>()) as u64,
                    BufferKind::Index,
                ),
            )?;
            let qtm_texture = owned.texture(
                backend,
                TextureDesc::new(
                    "quadtree texture",
                    Resolution::new(QTM_TEXTURE_SIZE, QTM_TEXTURE_SIZE),
                    TextureFormat::Rgba8Unorm,
                ),
            )?;
            let normal_histogram = owned.texture(
                backend,
                TextureDesc::new(
                    "normal histogram",
                    normal_histogram_size(),
                    TextureFormat::Rgba32Float,
                ),
            )?;
            let distance_histograms = owned.texture(
                backend,
                TextureDesc::new(
                    "distance histograms",
                    distance_histogram_size(),
                    TextureFormat::Rgba32Float,
                ),
            )?;

            Ok(StaticResources {
                programs,
                quad,
                qtm_vertices,
                qtm_indices,
                qtm_texture,
                normal_histogram,
                distance_histograms,
                owned: Owned::default(),
            })
        })?;
        statics.owned = owned;
        Ok(statics)
    }

    pub fn program(&self, kind: ProgramKind) -> Option<ProgramHandle> {
        self.programs.get(&kind).copied()
    }
}

/// Size of [`StaticResources::normal_histogram`]
pub const fn normal_histogram_size() -> Resolution {
    Resolution::new(NORMAL_AZIMUTH_BINS as u32, NORMAL_ELEVATION_BINS as u32)
}

/// Size of [`StaticResources::distance_histograms`]
pub const fn distance_histogram_size() -> Resolution {
    Resolution::new(DISTANCE_BINS as u32, MAX_DISTANCE_HISTOGRAMS as u32)
}

/// Textures and staging buffers sized to the camera resolution
#[derive(Debug)]
pub struct CameraResources {
    pub resolution: Resolution,
    /// Depth in meters (R32Float)
    pub depth: TextureHandle,
    /// Color image (Rgba8)
    pub color: TextureHandle,
    /// Float maps: vertex/normal pyramid levels, label images
    pub maps: [TextureHandle; IMAGE_TEXTURE_COUNT],
    /// Plane projection image (Rgba8)
    pub projection: TextureHandle,
    /// Staging buffers for texture uploads, used round-robin
    pub pbos: [BufferHandle; IMAGE_PBO_COUNT],
    owned: Owned,
}

impl CameraResources {
    fn create<B: GpuBackend>(backend: &mut B, resolution: Resolution) -> Result<Self, ResourceError> {
        let (mut camera, owned) = build_group(backend, "camera", |backend, owned| {
            let depth = owned.texture(
                backend,
                TextureDesc::new("depth", resolution, TextureFormat::R32Float),
            )?;
            let color = owned.texture(
                backend,
                TextureDesc::new("color", resolution, TextureFormat::Rgba8Unorm),
            )?;
            let mut maps = Vec::with_capacity(IMAGE_TEXTURE_COUNT);
            for i in 0..IMAGE_TEXTURE_COUNT {
                maps.push(owned.texture(
                    backend,
                    TextureDesc::new(format!("map {}", i), resolution, TextureFormat::Rgba32Float),
                )?);
            }
            let projection = owned.texture(
                backend,
                TextureDesc::new("plane projection", resolution, TextureFormat::Rgba8Unorm),
            )?;

            // Large enough for a full float map or any static texture
            let histograms = distance_histogram_size();
            let pbo_size = staging_size(resolution.width, resolution.height, 16)
                .max(staging_size(QTM_TEXTURE_SIZE, QTM_TEXTURE_SIZE, 4))
                .max(staging_size(histograms.width, histograms.height, 16));
            let mut pbos = Vec::with_capacity(IMAGE_PBO_COUNT);
            for i in 0..IMAGE_PBO_COUNT {
                pbos.push(owned.buffer(
                    backend,
                    BufferDesc::new(format!("image pbo {}", i), pbo_size, BufferKind::PixelUnpack),
                )?);
            }

            Ok(CameraResources {
                resolution,
                depth,
                color,
                maps: maps
                    .try_into()
                    .map_err(|_| ResourceError::Backend("map texture count".to_string()))?,
                projection,
                pbos: pbos
                    .try_into()
                    .map_err(|_| ResourceError::Backend("pbo count".to_string()))?,
                owned: Owned::default(),
            })
        })?;
        camera.owned = owned;
        Ok(camera)
    }
}

/// Frame buffer and read-back buffer sized to the screen
#[derive(Debug)]
pub struct ScreenResources {
    pub resolution: Resolution,
    pub target: RenderTarget,
    /// Read-back buffer for the frame-buffer color attachment
    pub readback: BufferHandle,
    owned: Owned,
}

impl ScreenResources {
    fn create<B: GpuBackend>(backend: &mut B, resolution: Resolution) -> Result<Self, ResourceError> {
        let (mut screen, owned) = build_group(backend, "screen", |backend, owned| {
            let color = owned.texture(
                backend,
                TextureDesc::new("fbo color", resolution, TextureFormat::Rgba8Unorm),
            )?;
            let depth = owned.texture(
                backend,
                TextureDesc::new("fbo depth", resolution, TextureFormat::Depth32),
            )?;
            let readback = owned.buffer(
                backend,
                BufferDesc::new(
                    "fbo readback",
                    staging_size(resolution.width, resolution.height, 4),
                    BufferKind::PixelPack,
                ),
            )?;
            Ok(ScreenResources {
                resolution,
                target: RenderTarget { color, depth },
                readback,
                owned: Owned::default(),
            })
        })?;
        screen.owned = owned;
        Ok(screen)
    }
}

/// All GPU resources used by the display modes
///
/// Render procedures obtain resources only through the accessors, which
/// fail with [`ResourceError::NotInitialized`] outside the
/// `initialize`..`teardown` window, so nothing is read before creation or
/// after destruction.
pub struct GpuResourceSet<B: GpuBackend> {
    backend: B,
    camera_resolution: Resolution,
    statics: Option<StaticResources>,
    camera: Option<CameraResources>,
    screen: Option<ScreenResources>,
    screen_generation: u64,
    next_pbo: usize,
}

impl<B: GpuBackend> GpuResourceSet<B> {
    /// Resource set for frames of `camera_resolution`; nothing is created yet
    pub fn new(backend: B, camera_resolution: Resolution) -> Self {
        Self {
            backend,
            camera_resolution,
            statics: None,
            camera: None,
            screen: None,
            screen_generation: 0,
            next_pbo: 0,
        }
    }

    fn check_size(&self, size: Resolution) -> Result<(), ResourceError> {
        let max = self.backend.max_texture_dimension();
        if size.is_empty() || size.width > max || size.height > max {
            return Err(ResourceError::InvalidSize(size));
        }
        Ok(())
    }

    /// Create every resource
    ///
    /// On failure nothing stays allocated and the set remains uninitialized.
    pub fn initialize(&mut self, screen: Resolution) -> Result<(), ResourceError> {
        if self.is_initialized() {
            debug!("Re-initializing GPU resources");
            self.teardown();
        }
        self.check_size(self.camera_resolution)?;
        self.check_size(screen)?;

        let statics = StaticResources::create(&mut self.backend)?;
        let camera = match CameraResources::create(&mut self.backend, self.camera_resolution) {
            Ok(camera) => camera,
            Err(e) => {
                statics.owned.release(&mut self.backend, "static");
                return Err(e);
            }
        };
        let screen_resources = match ScreenResources::create(&mut self.backend, screen) {
            Ok(screen) => screen,
            Err(e) => {
                camera.owned.release(&mut self.backend, "camera");
                statics.owned.release(&mut self.backend, "static");
                return Err(e);
            }
        };

        info!(
            backend = self.backend.name(),
            camera = %self.camera_resolution,
            screen = %screen,
            resources = statics.owned.len() + camera.owned.len() + screen_resources.owned.len(),
            "GPU resources initialized"
        );

        self.statics = Some(statics);
        self.camera = Some(camera);
        self.screen = Some(screen_resources);
        self.screen_generation += 1;
        Ok(())
    }

    /// Recreate the screen-sized resources at `screen`
    ///
    /// Static and camera resources are untouched. The previous frame buffer
    /// is destroyed before the new one is created; if creation fails the set
    /// has no screen resources until the next successful resize.
    pub fn resize(&mut self, screen: Resolution) -> Result<(), ResourceError> {
        if self.statics.is_none() {
            return Err(ResourceError::NotInitialized);
        }
        if self.screen.as_ref().map(|s| s.resolution) == Some(screen) {
            return Ok(());
        }
        self.check_size(screen)?;

        if let Some(old) = self.screen.take() {
            debug!(from = %old.resolution, to = %screen, "Resizing screen resources");
            old.owned.release(&mut self.backend, "screen");
        }
        self.screen = Some(ScreenResources::create(&mut self.backend, screen)?);
        self.screen_generation += 1;
        Ok(())
    }

    /// Release every resource; safe to call repeatedly or after a failed
    /// initialization
    pub fn teardown(&mut self) {
        let mut released = false;
        if let Some(screen) = self.screen.take() {
            screen.owned.release(&mut self.backend, "screen");
            released = true;
        }
        if let Some(camera) = self.camera.take() {
            camera.owned.release(&mut self.backend, "camera");
            released = true;
        }
        if let Some(statics) = self.statics.take() {
            statics.owned.release(&mut self.backend, "static");
            released = true;
        }
        if released {
            info!("GPU resources torn down");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.statics.is_some() && self.camera.is_some()
    }

    pub fn camera_resolution(&self) -> Resolution {
        self.camera_resolution
    }

    pub fn screen_resolution(&self) -> Option<Resolution> {
        self.screen.as_ref().map(|s| s.resolution)
    }

    /// Incremented every time the screen resources are recreated
    pub fn screen_generation(&self) -> u64 {
        self.screen_generation
    }

    pub fn statics(&self) -> Result<&StaticResources, ResourceError> {
        self.statics.as_ref().ok_or(ResourceError::NotInitialized)
    }

    pub fn camera(&self) -> Result<&CameraResources, ResourceError> {
        self.camera.as_ref().ok_or(ResourceError::NotInitialized)
    }

    pub fn screen(&self) -> Result<&ScreenResources, ResourceError> {
        self.screen.as_ref().ok_or(ResourceError::NotInitialized)
    }

    pub fn program(&self, kind: ProgramKind) -> Result<ProgramHandle, ResourceError> {
        self.statics()?
            .program(kind)
            .ok_or_else(|| ResourceError::Dangling(kind.label().to_string()))
    }

    /// Sizing check for data bound for a camera-resolution texture
    pub fn check_camera_size(&self, label: &str, actual: Resolution) -> Result<(), ResourceError> {
        if actual != self.camera_resolution {
            return Err(ResourceError::SizeMismatch {
                label: label.to_string(),
                expected: self.camera_resolution,
                actual,
            });
        }
        Ok(())
    }

    /// Upload `data` covering `region` of `texture` through the next staging buffer
    pub fn upload(
        &mut self,
        texture: TextureHandle,
        region: Resolution,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        let pbo = self.camera()?.pbos[self.next_pbo];
        self.next_pbo = (self.next_pbo + 1) % IMAGE_PBO_COUNT;
        self.backend.upload_texture(pbo, texture, region, data)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: GpuBackend> Drop for GpuResourceSet<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessBackend;

    const CAMERA: Resolution = Resolution::new(64, 48);
    const SCREEN: Resolution = Resolution::new(128, 96);

    /// Programs + quad/qtm buffers + qtm and histogram textures
    const STATIC_COUNT: usize = ProgramKind::ALL.len() + 6;
    /// depth, color, maps, projection, pbos
    const CAMERA_COUNT: usize = 3 + IMAGE_TEXTURE_COUNT + IMAGE_PBO_COUNT;
    const SCREEN_COUNT: usize = 3;

    fn initialized() -> GpuResourceSet<HeadlessBackend> {
        let mut set = GpuResourceSet::new(HeadlessBackend::new(), CAMERA);
        set.initialize(SCREEN).unwrap();
        set
    }

    #[test]
    fn test_not_initialized_before_initialize() {
        let set = GpuResourceSet::new(HeadlessBackend::new(), CAMERA);
        assert!(!set.is_initialized());
        assert!(matches!(set.camera(), Err(ResourceError::NotInitialized)));
        assert!(matches!(
            set.program(ProgramKind::Depth),
            Err(ResourceError::NotInitialized)
        ));
    }

    #[test]
    fn test_initialize_creates_all_groups() {
        let set = initialized();
        assert_eq!(
            set.backend().live_resources(),
            STATIC_COUNT + CAMERA_COUNT + SCREEN_COUNT
        );
        assert_eq!(set.camera().unwrap().resolution, CAMERA);
        assert_eq!(set.screen_resolution(), Some(SCREEN));
        for kind in ProgramKind::ALL {
            let handle = set.program(kind).unwrap();
            assert_eq!(set.backend().program_kind(handle), Some(kind));
        }
        let depth = set.camera().unwrap().depth;
        assert_eq!(set.backend().texture_desc(depth).unwrap().size, CAMERA);
    }

    #[test]
    fn test_partial_failure_leaves_nothing_allocated() {
        for fail_at in [0, 5, STATIC_COUNT as u32 + 2, (STATIC_COUNT + CAMERA_COUNT) as u32 + 1] {
            let mut backend = HeadlessBackend::new();
            backend.fail_creation_after(fail_at);
            let mut set = GpuResourceSet::new(backend, CAMERA);

            assert!(matches!(
                set.initialize(SCREEN),
                Err(ResourceError::CreationFailed { .. })
            ));
            assert!(!set.is_initialized());
            assert_eq!(set.backend().live_resources(), 0, "failure at {}", fail_at);
            set.teardown();
            set.teardown();
        }
    }

    #[test]
    fn test_resize_replaces_only_screen_resources() {
        let mut set = initialized();
        let old_target = set.screen().unwrap().target;
        let depth = set.camera().unwrap().depth;
        let quad = set.statics().unwrap().quad;
        let generation = set.screen_generation();

        let new_size = Resolution::new(200, 100);
        set.resize(new_size).unwrap();

        let backend = set.backend();
        assert!(!backend.texture_live(old_target.color));
        assert!(!backend.texture_live(old_target.depth));
        let target = set.screen().unwrap().target;
        assert_eq!(backend.texture_desc(target.color).unwrap().size, new_size);
        assert_eq!(backend.texture_desc(target.depth).unwrap().size, new_size);
        assert!(backend.texture_live(depth));
        assert_eq!(set.statics().unwrap().quad, quad);
        assert_eq!(set.screen_generation(), generation + 1);
        assert_eq!(
            backend.live_resources(),
            STATIC_COUNT + CAMERA_COUNT + SCREEN_COUNT
        );
    }

    #[test]
    fn test_resize_same_size_is_noop() {
        let mut set = initialized();
        let generation = set.screen_generation();
        set.resize(SCREEN).unwrap();
        assert_eq!(set.screen_generation(), generation);
    }

    #[test]
    fn test_resize_rejects_invalid_size() {
        let mut set = initialized();
        assert_eq!(
            set.resize(Resolution::new(0, 10)),
            Err(ResourceError::InvalidSize(Resolution::new(0, 10)))
        );
        // Previous frame buffer is still usable
        assert_eq!(set.screen_resolution(), Some(SCREEN));
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let mut set = initialized();
        set.teardown();
        assert_eq!(set.backend().live_resources(), 0);
        set.teardown();
        assert!(matches!(set.screen(), Err(ResourceError::NotInitialized)));
        assert!(matches!(
            set.resize(SCREEN),
            Err(ResourceError::NotInitialized)
        ));
    }

    #[test]
    fn test_camera_size_check() {
        let set = initialized();
        assert!(set.check_camera_size("depth", CAMERA).is_ok());
        assert_eq!(
            set.check_camera_size("depth", Resolution::new(32, 24)),
            Err(ResourceError::SizeMismatch {
                label: "depth".to_string(),
                expected: CAMERA,
                actual: Resolution::new(32, 24),
            })
        );
    }

    #[test]
    fn test_oversized_camera_rejected() {
        let mut set = GpuResourceSet::new(
            HeadlessBackend::with_max_dimension(32),
            Resolution::new(64, 48),
        );
        assert_eq!(
            set.initialize(Resolution::new(16, 16)),
            Err(ResourceError::InvalidSize(Resolution::new(64, 48)))
        );
        assert_eq!(set.backend().live_resources(), 0);
    }
}
