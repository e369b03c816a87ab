// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the render loop driven by the CPU backend

use rgbd_viewer::backends::{FrameListener, SyntheticDevice, SyntheticScene};
use rgbd_viewer::errors::RenderError;
use rgbd_viewer::frame::{FramePtr, Intrinsics, Resolution, RgbdFrame};
use rgbd_viewer::gpu::{HeadlessBackend, ProgramKind};
use rgbd_viewer::render::DisplayMode;
use rgbd_viewer::tracker::{
    DepthTracker, DistanceHistogram, FloatMap, LabelMap, MeshTracker, NormalHistogram,
    PipelineOptions, PlaneProjection, QuadTreeMesh,
};
use rgbd_viewer::viewer::{MeshViewer, ViewerSettings};
use std::sync::Arc;
use std::time::Instant;

const CAMERA: Resolution = Resolution {
    width: 64,
    height: 48,
};
const SCREEN: Resolution = Resolution {
    width: 80,
    height: 60,
};

/// Depth tracker that also counts submissions and reports one plane mesh
struct RecordingTracker {
    inner: DepthTracker,
    submitted: Vec<u64>,
    meshes: Vec<QuadTreeMesh>,
}

impl RecordingTracker {
    fn new() -> Self {
        Self {
            inner: DepthTracker::new(PipelineOptions::default()),
            submitted: Vec::new(),
            meshes: vec![QuadTreeMesh {
                vertices: vec![
                    [0.0, 0.0, 1.0, 0.0],
                    [0.1, 0.0, 1.0, 0.0],
                    [0.0, 0.1, 1.0, 0.0],
                    [0.1, 0.1, 1.0, 0.0],
                ],
                indices: vec![0, 1, 2, 2, 1, 3],
                texture: None,
            }],
        }
    }
}

impl MeshTracker for RecordingTracker {
    fn submit_frame(&mut self, frame: FramePtr) {
        self.submitted.push(frame.timestamp);
        self.inner.submit_frame(frame);
    }

    fn set_options(&mut self, options: &PipelineOptions) {
        self.inner.set_options(options);
    }

    fn rgb_map(&self, level: usize) -> Option<&FloatMap> {
        self.inner.rgb_map(level)
    }

    fn vertex_map(&self, level: usize) -> Option<&FloatMap> {
        self.inner.vertex_map(level)
    }

    fn normal_map(&self, level: usize) -> Option<&FloatMap> {
        self.inner.normal_map(level)
    }

    fn normal_histogram(&self) -> Option<&NormalHistogram> {
        self.inner.normal_histogram()
    }

    fn distance_histograms(&self) -> &[DistanceHistogram] {
        self.inner.distance_histograms()
    }

    fn normal_segments(&self) -> Option<&LabelMap> {
        self.inner.normal_segments()
    }

    fn final_segments(&self) -> Option<&LabelMap> {
        self.inner.final_segments()
    }

    fn distance_segments(&self) -> Option<&FloatMap> {
        self.inner.distance_segments()
    }

    fn plane_projection(&self, plane: usize) -> Option<&PlaneProjection> {
        self.inner.plane_projection(plane)
    }

    fn quadtree_meshes(&self) -> &[QuadTreeMesh] {
        &self.meshes
    }

    fn plane_count(&self) -> usize {
        self.meshes.len()
    }
}

fn viewer(mode: DisplayMode) -> MeshViewer<HeadlessBackend, RecordingTracker> {
    viewer_with_camera(mode, CAMERA)
}

fn viewer_with_camera(
    mode: DisplayMode,
    camera: Resolution,
) -> MeshViewer<HeadlessBackend, RecordingTracker> {
    let settings = ViewerSettings {
        camera_resolution: camera,
        screen_resolution: SCREEN,
        mode,
        ..ViewerSettings::default()
    };
    MeshViewer::new(HeadlessBackend::new(), RecordingTracker::new(), settings)
        .expect("viewer")
}

fn frame(resolution: Resolution, timestamp: u64, depth_mm: u16) -> FramePtr {
    let pixels = resolution.pixel_count();
    Arc::new(
        RgbdFrame::new(
            resolution,
            Intrinsics::kinect(resolution),
            vec![128; pixels * 3],
            vec![depth_mm; pixels],
            timestamp,
        )
        .expect("frame"),
    )
}

fn deliver(viewer: &MeshViewer<HeadlessBackend, RecordingTracker>, frame: FramePtr) {
    viewer.intake().on_new_frame(frame);
}

fn select(viewer: &mut MeshViewer<HeadlessBackend, RecordingTracker>, key: char) {
    viewer.handle_key(key);
}

#[test]
fn test_single_frame_in_depth_mode() {
    let mut viewer = viewer(DisplayMode::Depth);
    deliver(&viewer, frame(CAMERA, 100, 1500));

    let report = viewer.tick(Instant::now());
    assert_eq!(report.submitted, Some(100));
    assert!(report.rendered);
    assert_eq!(report.render_error, None);
    assert_eq!(viewer.tracker().submitted, vec![100]);
    assert_eq!(viewer.slot().last_submitted_time(), Some(100));

    let depth = viewer.resources().camera().unwrap().depth;
    let data = viewer.resources().backend().texture_data(depth).unwrap();
    let first: f32 = bytemuck::pod_read_unaligned(&data[0..4]);
    assert!((first - 1.5).abs() < 1e-6);
    assert_eq!(
        viewer.resources().backend().last_frame_programs(),
        vec![ProgramKind::Depth]
    );
}

#[test]
fn test_back_to_back_frames_submit_only_newest() {
    let mut viewer = viewer(DisplayMode::Depth);
    deliver(&viewer, frame(CAMERA, 100, 1000));
    deliver(&viewer, frame(CAMERA, 105, 1000));

    assert_eq!(viewer.tick(Instant::now()).submitted, Some(105));
    assert_eq!(viewer.tick(Instant::now()).submitted, None);
    assert_eq!(viewer.tracker().submitted, vec![105]);
    assert_eq!(viewer.slot().stats().superseded, 1);
}

#[test]
fn test_no_fresh_frame_redraws_previous_data() {
    let mut viewer = viewer(DisplayMode::Depth);
    deliver(&viewer, frame(CAMERA, 100, 1000));
    viewer.tick(Instant::now());

    let report = viewer.tick(Instant::now());
    assert_eq!(report.submitted, None);
    assert!(report.rendered);
    assert_eq!(report.render_error, None);
    assert_eq!(viewer.tracker().submitted.len(), 1);
}

#[test]
fn test_pause_holds_frame_until_unpaused() {
    let mut viewer = viewer(DisplayMode::Depth);
    select(&mut viewer, ' ');
    assert!(viewer.display().paused);

    deliver(&viewer, frame(CAMERA, 200, 1000));
    let report = viewer.tick(Instant::now());
    assert_eq!(report.submitted, None);
    assert!(report.rendered);
    assert!(viewer.tracker().submitted.is_empty());
    assert!(viewer.slot().has_fresher());

    deliver(&viewer, frame(CAMERA, 210, 1000));
    select(&mut viewer, ' ');
    assert!(!viewer.display().paused);

    assert_eq!(viewer.tick(Instant::now()).submitted, Some(210));
    assert_eq!(viewer.tracker().submitted, vec![210]);
}

#[test]
fn test_pause_then_resume_submits_held_frame() {
    let mut viewer = viewer(DisplayMode::Depth);
    deliver(&viewer, frame(CAMERA, 200, 1000));
    select(&mut viewer, ' ');

    let paused = viewer.tick(Instant::now());
    assert_eq!(paused.submitted, None);
    assert_eq!(viewer.slot().last_submitted_time(), None);

    select(&mut viewer, ' ');
    let resumed = viewer.tick(Instant::now());
    assert_eq!(resumed.submitted, Some(200));
    assert_eq!(viewer.slot().last_submitted_time(), Some(200));
    assert_eq!(viewer.tracker().submitted, vec![200]);
}

#[test]
fn test_histogram_compare_on_small_camera() {
    // Narrower than the distance histogram's bin count
    let camera = Resolution::new(160, 120);
    let mut viewer = viewer_with_camera(DisplayMode::HistogramCompare, camera);
    deliver(&viewer, frame(camera, 100, 1500));

    let report = viewer.tick(Instant::now());
    assert_eq!(report.submitted, Some(100));
    assert_eq!(report.render_error, None);
    assert!(!viewer.tracker().distance_histograms().is_empty());
    let programs = viewer.resources().backend().last_frame_programs();
    assert!(programs.contains(&ProgramKind::Histogram));
    assert!(programs.contains(&ProgramKind::BarHistogram));
}

#[test]
fn test_mode_switch_keeps_resources() {
    let mut viewer = viewer(DisplayMode::Depth);
    deliver(&viewer, frame(CAMERA, 100, 1000));
    viewer.tick(Instant::now());

    let depth = viewer.resources().camera().unwrap().depth;
    let generation = viewer.resources().screen_generation();
    let live = viewer.resources().backend().live_resources();

    // '9' selects the quadtree view
    select(&mut viewer, '9');
    assert_eq!(viewer.display().mode(), DisplayMode::Quadtree);
    let report = viewer.tick(Instant::now());
    assert_eq!(report.render_error, None);

    let backend = viewer.resources().backend();
    assert!(backend.texture_live(depth));
    assert_eq!(backend.live_resources(), live);
    assert_eq!(viewer.resources().screen_generation(), generation);
    // Single mesh is the selected plane
    assert_eq!(
        backend.last_frame_programs(),
        vec![ProgramKind::QtmHighlightGreen]
    );
}

#[test]
fn test_reshape_rebuilds_only_screen_group() {
    let mut viewer = viewer(DisplayMode::Depth);
    let camera = viewer.resources().camera().unwrap().depth;
    let generation = viewer.resources().screen_generation();

    for (w, h) in [(40, 30), (160, 90), (1, 1)] {
        let screen = Resolution::new(w, h);
        viewer.reshape(screen).unwrap();
        assert_eq!(viewer.resources().screen_resolution(), Some(screen));
        let (size, pixels) = viewer.read_frame().unwrap();
        assert_eq!(size, screen);
        assert_eq!(pixels.len(), screen.pixel_count() * 4);
    }

    assert_eq!(viewer.resources().screen_generation(), generation + 3);
    assert!(viewer.resources().backend().texture_live(camera));
}

#[test]
fn test_mismatched_frame_is_reported_and_skipped() {
    let mut viewer = viewer(DisplayMode::Depth);
    deliver(&viewer, frame(CAMERA, 100, 1000));
    viewer.tick(Instant::now());

    let depth = viewer.resources().camera().unwrap().depth;
    let uploads = viewer.resources().backend().texture_uploads(depth);

    // Bypass the intake, which would drop it
    let wrong = Resolution::new(32, 24);
    viewer.slot().publish(frame(wrong, 110, 1000), 110);
    let report = viewer.tick(Instant::now());

    assert_eq!(report.submitted, Some(110));
    assert!(report.rendered);
    assert_eq!(
        report.render_error,
        Some(RenderError::DimensionMismatch {
            texture: CAMERA,
            source: wrong,
        })
    );
    assert_eq!(viewer.resources().backend().texture_uploads(depth), uploads);
    assert_eq!(viewer.stats().render_errors, 1);

    // Loop continues
    deliver(&viewer, frame(CAMERA, 120, 1000));
    assert_eq!(viewer.tick(Instant::now()).render_error, None);
}

#[test]
fn test_intake_drops_wrong_resolution() {
    let mut viewer = viewer(DisplayMode::Depth);
    deliver(&viewer, frame(Resolution::new(32, 24), 100, 1000));
    assert_eq!(viewer.intake().rejected(), 1);
    assert_eq!(viewer.tick(Instant::now()).submitted, None);
}

#[test]
fn test_every_mode_renders_without_frames() {
    let mut viewer = viewer(DisplayMode::Overlay);
    for mode in DisplayMode::ALL {
        let key = viewer_key(mode);
        select(&mut viewer, key);
        assert_eq!(viewer.display().mode(), mode);
        let report = viewer.tick(Instant::now());
        assert!(report.rendered, "{} did not render", mode);
    }
}

fn viewer_key(mode: DisplayMode) -> char {
    let index = DisplayMode::ALL
        .iter()
        .position(|m| *m == mode)
        .unwrap_or(0);
    // '1'..'9' then '0'
    char::from_digit(((index + 1) % 10) as u32, 10).unwrap()
}

#[test]
fn test_synthetic_device_end_to_end() {
    let mut viewer = viewer(DisplayMode::Overlay);
    viewer
        .attach_device(Box::new(SyntheticDevice::new(SyntheticScene::Room, CAMERA, 60)))
        .unwrap();

    let deadline = Instant::now() + std::time::Duration::from_secs(5);
    while viewer.stats().submitted < 2 && Instant::now() < deadline {
        viewer.tick(Instant::now());
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    assert!(viewer.stats().submitted >= 2);

    let submitted = &viewer.tracker().submitted;
    assert!(submitted.windows(2).all(|w| w[0] < w[1]));

    viewer.shutdown();
    assert_eq!(viewer.resources().backend().live_resources(), 0);
}
