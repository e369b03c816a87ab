// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands that run without the terminal surface
//!
//! - Listing frame sources
//! - Printing the effective configuration
//! - Running the render loop headless for a fixed number of ticks

use rgbd_viewer::backends::{DeviceKind, open_device};
use rgbd_viewer::config::Config;
use rgbd_viewer::gpu::{GpuBackend, HeadlessBackend, WgpuBackend};
use rgbd_viewer::tracker::DepthTracker;
use rgbd_viewer::viewer::MeshViewer;
use std::time::{Duration, Instant};

/// List all selectable frame sources
pub fn list_devices(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("Available devices:");
    println!();
    for kind in DeviceKind::ALL {
        let marker = if kind == config.device { "*" } else { " " };
        println!("  {} {:<16} {}", marker, kind.id(), kind.description());
    }
    println!();
    println!(
        "Configured: {} at {} @ {} fps",
        config.device, config.camera_resolution, config.device_fps
    );
    Ok(())
}

/// Print the effective configuration as JSON
pub fn print_config(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = Config::default_path() {
        eprintln!("# {}", path.display());
    }
    println!("{}", config.to_json()?);
    Ok(())
}

/// Run `ticks` render loop iterations without presenting
pub fn run_headless(config: &Config, ticks: u64, gpu: bool) -> Result<(), Box<dyn std::error::Error>> {
    if gpu {
        let backend = pollster::block_on(WgpuBackend::new())?;
        println!("GPU: {}", backend.name());
        drive(backend, config, ticks)
    } else {
        drive(HeadlessBackend::new(), config, ticks)
    }
}

fn drive<B: GpuBackend>(
    backend: B,
    config: &Config,
    ticks: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let tracker = DepthTracker::new(config.pipeline);
    let mut viewer = MeshViewer::new(backend, tracker, config.viewer_settings())?;
    viewer.attach_device(open_device(
        config.device,
        config.camera_resolution,
        config.device_fps,
    ))?;

    println!(
        "Running {} ticks in {} mode from {}...",
        ticks,
        viewer.display().mode(),
        viewer.device_name().unwrap_or("no device")
    );

    let interval = Duration::from_secs(1) / config.target_fps.max(1);
    let start = Instant::now();
    let mut last_error = None;

    for _ in 0..ticks {
        let tick_start = Instant::now();
        let report = viewer.tick(tick_start);
        if let Some(e) = report.render_error {
            last_error = Some(e);
        }
        if let Some(remaining) = interval.checked_sub(tick_start.elapsed()) {
            std::thread::sleep(remaining);
        }
    }

    let elapsed = start.elapsed();
    let stats = viewer.stats();
    let slot = viewer.slot().stats();
    let rejected = viewer.intake().rejected();
    viewer.shutdown();

    println!();
    println!("Ticks:          {}", stats.ticks);
    println!("Submitted:      {}", stats.submitted);
    println!("Render errors:  {}", stats.render_errors);
    println!(
        "Frames:         {} published, {} superseded, {} stale, {} rejected",
        slot.published, slot.superseded, slot.stale, rejected
    );
    println!(
        "Average rate:   {:.1} ticks/s",
        stats.ticks as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    if let Some(e) = last_error {
        println!("Last error:     {}", e);
    }

    Ok(())
}
