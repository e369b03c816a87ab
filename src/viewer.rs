// SPDX-License-Identifier: GPL-3.0-only

//! Render Loop
//!
//! [`MeshViewer`] composes the frame slot, the GPU resource set, the display
//! state, the pipeline options and the camera. Each [`MeshViewer::tick`]
//! runs one pass of
//!
//! ```text
//! FRAME_CHECK -> (SUBMIT_TO_TRACKER)? -> RENDER -> PRESENT
//! ```
//!
//! A tick never waits for the device. Without a fresher frame the active
//! mode redraws from the data already submitted. While paused the slot keeps
//! filling but nothing is submitted to the tracker.

use crate::backends::{RgbdDevice, validate_device};
use crate::constants::{DEFAULT_CAMERA_HEIGHT, DEFAULT_CAMERA_WIDTH};
use crate::constants::{DEFAULT_SCREEN_HEIGHT, DEFAULT_SCREEN_WIDTH};
use crate::errors::{RenderError, ResourceError, ViewerResult};
use crate::frame::{FrameIntake, FramePtr, FrameSlot, Resolution, Timestamp};
use crate::gpu::{GpuBackend, GpuResourceSet};
use crate::input::{Controls, InputHandler, InputOutcome, KeyBindings, MouseButton};
use crate::render::{Camera, DisplayMode, DisplayState, FpsCounter, RenderContext, procedure_for};
use crate::tracker::{MeshTracker, PipelineOptions};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Extra drawing run after the active mode's procedure, before PRESENT
pub type PostRenderHook<B> =
    Box<dyn FnMut(&mut RenderContext<'_, B>) -> Result<(), RenderError>>;

/// Startup settings for a [`MeshViewer`]
#[derive(Debug, Clone)]
pub struct ViewerSettings {
    pub camera_resolution: Resolution,
    pub screen_resolution: Resolution,
    pub mode: DisplayMode,
    pub options: PipelineOptions,
    pub key_bindings: KeyBindings,
    pub clear_color: [f32; 4],
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            camera_resolution: Resolution::new(DEFAULT_CAMERA_WIDTH, DEFAULT_CAMERA_HEIGHT),
            screen_resolution: Resolution::new(DEFAULT_SCREEN_WIDTH, DEFAULT_SCREEN_HEIGHT),
            mode: DisplayMode::default(),
            options: PipelineOptions::default(),
            key_bindings: KeyBindings::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// What one tick did
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TickReport {
    /// Timestamp of the frame handed to the tracker this tick
    pub submitted: Option<Timestamp>,
    /// A frame was recorded and submitted to the backend
    pub rendered: bool,
    /// Failure of the active procedure (or of the frame itself); the loop
    /// continues with the next tick
    pub render_error: Option<RenderError>,
    /// Set when the FPS window elapsed this tick
    pub fps: Option<f32>,
}

/// Running counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub ticks: u64,
    pub submitted: u64,
    pub render_errors: u64,
}

/// The fixed-tick driver tying device, tracker and renderer together
pub struct MeshViewer<B: GpuBackend, T: MeshTracker> {
    slot: Arc<FrameSlot>,
    intake: Arc<FrameIntake>,
    resources: GpuResourceSet<B>,
    tracker: T,
    device: Option<Box<dyn RgbdDevice>>,
    display: DisplayState,
    options: PipelineOptions,
    camera: Camera,
    input: InputHandler,
    fps: FpsCounter,
    current_frame: Option<FramePtr>,
    hooks: Vec<PostRenderHook<B>>,
    clear_color: [f32; 4],
    stats: LoopStats,
}

impl<B: GpuBackend, T: MeshTracker> MeshViewer<B, T> {
    /// Create the viewer and all GPU resources
    ///
    /// Fails if the resource set cannot be initialized; nothing stays
    /// allocated in that case.
    pub fn new(backend: B, mut tracker: T, settings: ViewerSettings) -> ViewerResult<Self> {
        settings.key_bindings.validate()?;

        let slot = Arc::new(FrameSlot::new());
        let intake = Arc::new(FrameIntake::new(
            Arc::clone(&slot),
            settings.camera_resolution,
        ));
        let mut resources = GpuResourceSet::new(backend, settings.camera_resolution);
        resources.initialize(settings.screen_resolution)?;
        let options = settings.options.clamped();
        tracker.set_options(&options);

        info!(
            camera = %settings.camera_resolution,
            screen = %settings.screen_resolution,
            mode = %settings.mode,
            "Viewer created"
        );

        Ok(Self {
            slot,
            intake,
            resources,
            tracker,
            device: None,
            display: DisplayState::new(settings.mode),
            options,
            camera: Camera::default(),
            input: InputHandler::from_bindings(&settings.key_bindings),
            fps: FpsCounter::default(),
            current_frame: None,
            hooks: Vec::new(),
            clear_color: settings.clear_color,
            stats: LoopStats::default(),
        })
    }

    /// Register the frame intake with `device` and start it
    ///
    /// A device whose resolution differs from the configured camera
    /// resolution is a configuration error.
    pub fn attach_device(&mut self, mut device: Box<dyn RgbdDevice>) -> ViewerResult<()> {
        validate_device(device.as_ref(), self.resources.camera_resolution())?;
        device.add_listener(Arc::clone(&self.intake) as _);
        device.start()?;
        info!(device = device.name(), "Device attached");
        self.device = Some(device);
        Ok(())
    }

    /// Register extra drawing run after every render procedure
    pub fn add_post_render_hook(&mut self, hook: PostRenderHook<B>) {
        self.hooks.push(hook);
    }

    /// Run one FRAME_CHECK / SUBMIT / RENDER / PRESENT pass
    pub fn tick(&mut self, now: Instant) -> TickReport {
        self.stats.ticks += 1;
        let submitted = self.submit_fresh_frame();

        let (rendered, render_error) = match self.render() {
            Ok(error) => (true, error),
            Err(e) => (false, Some(RenderError::Resource(e))),
        };
        if render_error.is_some() {
            self.stats.render_errors += 1;
        }

        let fps = self.fps.frame(now);
        if let Some(fps) = fps {
            trace!(fps, "FPS window elapsed");
        }

        TickReport {
            submitted,
            rendered,
            render_error,
            fps,
        }
    }

    /// FRAME_CHECK and SUBMIT_TO_TRACKER
    fn submit_fresh_frame(&mut self) -> Option<Timestamp> {
        if self.display.paused {
            return None;
        }
        let frame = self.slot.try_take_if_fresher()?;
        let timestamp = frame.timestamp;
        self.tracker.submit_frame(Arc::clone(&frame));
        self.current_frame = Some(frame);
        self.stats.submitted += 1;
        trace!(timestamp, "Frame submitted to tracker");
        Some(timestamp)
    }

    /// RENDER: returns the procedure's error, or a resource error that kept
    /// the frame from being recorded at all
    fn render(&mut self) -> Result<Option<RenderError>, ResourceError> {
        let target = self.resources.screen()?.target;
        self.resources
            .backend_mut()
            .begin_frame(target, self.clear_color)?;

        let mode = self.display.mode();
        let procedure = procedure_for::<B>(mode);
        let mut ctx = RenderContext {
            resources: &mut self.resources,
            frame: self.current_frame.as_deref(),
            tracker: &self.tracker,
            options: &self.options,
            camera: &self.camera,
            display: &self.display,
        };

        let error = procedure(&mut ctx).err();
        if let Some(e) = &error {
            debug!(mode = %mode, error = %e, "Render procedure skipped");
        }
        for hook in &mut self.hooks {
            if let Err(e) = hook(&mut ctx) {
                debug!(mode = %mode, error = %e, "Post-render hook failed");
            }
        }

        self.resources.backend_mut().end_frame()?;
        Ok(error)
    }

    /// Read the presented frame back as tightly packed RGBA8
    pub fn read_frame(&mut self) -> Result<(Resolution, Vec<u8>), ResourceError> {
        let screen = self.resources.screen()?;
        let (resolution, color, readback) =
            (screen.resolution, screen.target.color, screen.readback);
        let pixels = self
            .resources
            .backend_mut()
            .read_texture(color, readback)?;
        Ok((resolution, pixels))
    }

    /// Window/terminal size changed; only the screen resources are rebuilt
    pub fn reshape(&mut self, screen: Resolution) -> Result<(), ResourceError> {
        self.resources.resize(screen)
    }

    pub fn handle_key(&mut self, key: char) -> InputOutcome {
        let outcome = self.input.key(
            key,
            Controls {
                display: &mut self.display,
                options: &mut self.options,
                camera: &mut self.camera,
                plane_count: self.tracker.plane_count(),
            },
        );
        if outcome == InputOutcome::OptionsChanged {
            self.tracker.set_options(&self.options);
        }
        outcome
    }

    pub fn mouse_down(&mut self, button: MouseButton, x: f32, y: f32) {
        self.input.mouse_down(button, x, y);
    }

    pub fn mouse_drag(&mut self, x: f32, y: f32) -> InputOutcome {
        self.input.mouse_drag(x, y, &mut self.camera)
    }

    pub fn mouse_up(&mut self) {
        self.input.mouse_up();
    }

    pub fn mouse_scroll(&mut self, steps: f32, zoom: bool) -> InputOutcome {
        self.input.scroll(steps, zoom, &mut self.camera)
    }

    /// Release GPU resources, then stop the device. Idempotent.
    pub fn shutdown(&mut self) {
        self.resources.teardown();
        if let Some(mut device) = self.device.take() {
            device.stop();
            info!(device = device.name(), "Device stopped");
        }
    }

    pub fn slot(&self) -> &Arc<FrameSlot> {
        &self.slot
    }

    /// Listener that feeds the slot; register it with a device
    pub fn intake(&self) -> &Arc<FrameIntake> {
        &self.intake
    }

    pub fn resources(&self) -> &GpuResourceSet<B> {
        &self.resources
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Frame most recently submitted to the tracker
    pub fn current_frame(&self) -> Option<&FramePtr> {
        self.current_frame.as_ref()
    }

    pub fn fps(&self) -> f32 {
        self.fps.fps()
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device.as_deref().map(|d| d.name())
    }
}

impl<B: GpuBackend, T: MeshTracker> Drop for MeshViewer<B, T> {
    fn drop(&mut self) {
        if self.device.is_some() || self.resources.is_initialized() {
            warn!("Viewer dropped without shutdown, cleaning up");
        }
        self.shutdown();
    }
}
