// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic RGBD device
//!
//! Ray-casts a small procedural scene on a capture thread at a fixed frame
//! rate. Used when no depth camera is attached and by the test suite.

use super::frame_loop::{CaptureLoopController, LoopAction};
use super::{FrameListener, RgbdDevice};
use crate::constants::depth;
use crate::errors::DeviceError;
use crate::frame::{Intrinsics, Resolution, RgbdFrame};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Procedural scenes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticScene {
    /// Floor, back wall and a sphere orbiting in front of the wall
    Room,
    /// Depth increasing linearly from the left edge to the right edge
    Ramp,
}

const WALL_DISTANCE_M: f32 = 3.5;
const FLOOR_HEIGHT_M: f32 = 1.0;
const SPHERE_RADIUS_M: f32 = 0.35;

/// Render one frame of `scene` at time `t` seconds
pub fn render_scene(
    scene: SyntheticScene,
    resolution: Resolution,
    intrinsics: &Intrinsics,
    t: f32,
) -> (Vec<u8>, Vec<u16>) {
    let pixels = resolution.pixel_count();
    let mut color = Vec::with_capacity(pixels * 3);
    let mut depth_mm = Vec::with_capacity(pixels);

    let sphere = [
        0.4 * t.sin(),
        0.25 + 0.1 * (2.0 * t).sin(),
        2.2 + 0.4 * t.cos(),
    ];

    for y in 0..resolution.height {
        for x in 0..resolution.width {
            let (z, rgb) = match scene {
                SyntheticScene::Ramp => {
                    let u = x as f32 / resolution.width.max(2).saturating_sub(1) as f32;
                    let z = 0.5 + u * 3.5;
                    let shade = (u * 255.0) as u8;
                    (Some(z), [shade, 64, 255 - shade])
                }
                SyntheticScene::Room => cast_room(intrinsics, x as f32, y as f32, sphere),
            };

            let mm = z
                .map(|z| (z * 1000.0).round())
                .filter(|mm| *mm > 0.0 && *mm <= depth::MAX_VALID_MM as f32)
                .map(|mm| mm as u16)
                .unwrap_or(depth::INVALID_MM);

            depth_mm.push(mm);
            color.extend_from_slice(&rgb);
        }
    }

    (color, depth_mm)
}

/// Cast the ray through pixel (x, y); returns depth (camera z) and color
fn cast_room(intr: &Intrinsics, x: f32, y: f32, sphere: [f32; 3]) -> (Option<f32>, [u8; 3]) {
    // Ray direction with unit z, so the ray parameter equals camera depth
    let d = [(x - intr.cx) / intr.fx, (y - intr.cy) / intr.fy, 1.0];

    let wall = checker(d[0] * WALL_DISTANCE_M, d[1] * WALL_DISTANCE_M, [150, 150, 160]);
    let mut best = (WALL_DISTANCE_M, wall);

    // Floor below the camera (camera y axis points down)
    if d[1] > 0.0 {
        let z = FLOOR_HEIGHT_M / d[1];
        if z < best.0 {
            best = (z, checker(d[0] * z, z, [90, 140, 90]));
        }
    }

    let a = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
    let b = -2.0 * (d[0] * sphere[0] + d[1] * sphere[1] + d[2] * sphere[2]);
    let c = sphere[0] * sphere[0] + sphere[1] * sphere[1] + sphere[2] * sphere[2]
        - SPHERE_RADIUS_M * SPHERE_RADIUS_M;
    let disc = b * b - 4.0 * a * c;
    if disc >= 0.0 {
        let z = (-b - disc.sqrt()) / (2.0 * a);
        if z > 0.0 && z < best.0 {
            // Lambert shading against a light at the camera
            let p = [d[0] * z, d[1] * z, z];
            let n = [
                (p[0] - sphere[0]) / SPHERE_RADIUS_M,
                (p[1] - sphere[1]) / SPHERE_RADIUS_M,
                (p[2] - sphere[2]) / SPHERE_RADIUS_M,
            ];
            let len = a.sqrt();
            let lambert = (-(n[0] * d[0] + n[1] * d[1] + n[2] * d[2]) / len).clamp(0.15, 1.0);
            best = (z, [(220.0 * lambert) as u8, (60.0 * lambert) as u8, (50.0 * lambert) as u8]);
        }
    }

    (Some(best.0), best.1)
}

fn checker(u: f32, v: f32, base: [u8; 3]) -> [u8; 3] {
    let on = ((u * 4.0).floor() as i32 + (v * 4.0).floor() as i32).rem_euclid(2) == 0;
    if on {
        base
    } else {
        [base[0] / 2, base[1] / 2, base[2] / 2]
    }
}

/// Device that renders a [`SyntheticScene`] on a capture thread
pub struct SyntheticDevice {
    scene: SyntheticScene,
    resolution: Resolution,
    intrinsics: Intrinsics,
    frame_interval: Duration,
    listeners: Vec<Arc<dyn FrameListener>>,
    controller: Option<CaptureLoopController>,
}

impl SyntheticDevice {
    pub fn new(scene: SyntheticScene, resolution: Resolution, fps: u32) -> Self {
        Self {
            scene,
            resolution,
            intrinsics: Intrinsics::kinect(resolution),
            frame_interval: Duration::from_secs(1) / fps.max(1),
            listeners: Vec::new(),
            controller: None,
        }
    }
}

impl RgbdDevice for SyntheticDevice {
    fn name(&self) -> &str {
        match self.scene {
            SyntheticScene::Room => "Synthetic room",
            SyntheticScene::Ramp => "Synthetic ramp",
        }
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    fn add_listener(&mut self, listener: Arc<dyn FrameListener>) {
        self.listeners.push(listener);
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        if self.is_streaming() {
            return Err(DeviceError::AlreadyStreaming);
        }
        if self.resolution.is_empty() {
            return Err(DeviceError::StartFailed(format!(
                "invalid resolution {}",
                self.resolution
            )));
        }

        let scene = self.scene;
        let resolution = self.resolution;
        let intrinsics = self.intrinsics;
        let interval = self.frame_interval;
        let listeners = self.listeners.clone();

        info!(
            device = self.name(),
            resolution = %resolution,
            interval_ms = interval.as_millis() as u64,
            "Starting synthetic device"
        );

        let controller = CaptureLoopController::spawn("synthetic-capture", interval, move |tick| {
            let (color, depth) =
                render_scene(scene, resolution, &intrinsics, tick.elapsed.as_secs_f32());
            match RgbdFrame::new(resolution, intrinsics, color, depth, tick.timestamp) {
                Ok(frame) => {
                    let frame = Arc::new(frame);
                    for listener in &listeners {
                        listener.on_new_frame(Arc::clone(&frame));
                    }
                }
                Err(e) => debug!(error = %e, "Synthetic frame rejected"),
            }
            LoopAction::Continue
        });

        self.controller = Some(controller);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut controller) = self.controller.take() {
            info!(device = self.name(), "Stopping synthetic device");
            controller.stop();
        }
    }

    fn is_streaming(&self) -> bool {
        self.controller
            .as_ref()
            .map(|c| c.is_running())
            .unwrap_or(false)
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
