// SPDX-License-Identifier: GPL-3.0-only

//! GPU access for the render loop
//!
//! Rendering goes through the [`GpuBackend`] seam. [`WgpuBackend`] drives an
//! offscreen wgpu device (no window surface; the presented frame is read
//! back), [`HeadlessBackend`] keeps everything on the CPU.

pub mod backend;
pub mod headless;
pub mod resources;
pub mod wgpu_backend;

pub use backend::{
    BufferDesc, BufferHandle, BufferKind, GpuBackend, MeshDraw, MeshParams, MeshTopology,
    ProgramHandle, ProgramKind, QuadDraw, QuadParams, RenderTarget, TextureDesc, TextureFormat,
    TextureHandle, Viewport,
};
pub use headless::{HeadlessBackend, RecordedDraw};
pub use resources::{CameraResources, GpuResourceSet, ScreenResources, StaticResources};
pub use wgpu_backend::WgpuBackend;

use crate::errors::ResourceError;
use std::sync::Arc;
use tracing::{debug, info};

/// Adapter chosen for offscreen rendering
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    pub adapter_name: String,
    pub backend: wgpu::Backend,
    /// Upper bound for any texture side the resource set may request
    pub max_texture_dimension: u32,
}

/// Open an offscreen device and queue
///
/// Prefers a discrete adapter and falls back to a software adapter when no
/// hardware one is found. No surface is requested; frames are read back.
pub async fn create_render_device(
    label: &str,
) -> Result<(Arc<wgpu::Device>, Arc<wgpu::Queue>, GpuDeviceInfo), ResourceError> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::VULKAN,
        ..Default::default()
    });

    let mut adapter = None;
    for force_fallback_adapter in [false, true] {
        match instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter,
            })
            .await
        {
            Ok(found) => {
                adapter = Some(found);
                break;
            }
            Err(e) => debug!(force_fallback_adapter, error = %e, "No adapter"),
        }
    }
    let adapter = adapter
        .ok_or_else(|| ResourceError::Backend("no Vulkan adapter available".to_string()))?;

    let adapter_info = adapter.get_info();
    let limits = adapter.limits();
    info!(
        adapter = %adapter_info.name,
        backend = ?adapter_info.backend,
        max_texture_dimension = limits.max_texture_dimension_2d,
        "Opening render device"
    );

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        })
        .await
        .map_err(|e| ResourceError::Backend(format!("device request failed: {}", e)))?;

    let info = GpuDeviceInfo {
        adapter_name: adapter_info.name,
        backend: adapter_info.backend,
        max_texture_dimension: limits.max_texture_dimension_2d,
    };
    Ok((Arc::new(device), Arc::new(queue), info))
}

/// Copy row pitch: `unpadded` rounded up to `COPY_BYTES_PER_ROW_ALIGNMENT`
#[inline]
pub fn padded_bytes_per_row(unpadded: u32) -> u32 {
    unpadded.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
}

/// Bytes of a staging or read-back buffer for a `width` x `height` image
pub fn staging_size(width: u32, height: u32, bytes_per_pixel: u32) -> u64 {
    u64::from(padded_bytes_per_row(width * bytes_per_pixel)) * u64::from(height)
}

/// Map the first `size` bytes of a `MAP_READ` buffer and copy them out
pub async fn read_buffer_async(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
    size: u64,
) -> Result<Vec<u8>, ResourceError> {
    let slice = buffer.slice(..size);
    let (tx, rx) = futures::channel::oneshot::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });

    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| ResourceError::Backend(format!("device poll failed: {}", e)))?;

    match rx.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(ResourceError::Backend(format!("buffer map failed: {}", e))),
        Err(_) => return Err(ResourceError::Backend("buffer map cancelled".to_string())),
    }

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_padding() {
        assert_eq!(padded_bytes_per_row(640 * 4), 2560);
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(257), 512);
        assert_eq!(staging_size(10, 3, 4), 768);
        assert_eq!(staging_size(64, 48, 16), 1024 * 48);
    }

    #[tokio::test]
    async fn test_render_device_limits() {
        // Needs a Vulkan adapter; passes trivially without one
        match create_render_device("test device").await {
            Ok((_device, _queue, info)) => {
                assert!(!info.adapter_name.is_empty());
                assert!(info.max_texture_dimension >= 2048);
            }
            Err(e) => println!("Skipping test (no GPU): {}", e),
        }
    }
}
