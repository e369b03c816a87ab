// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use rgbd_viewer::Config;
use rgbd_viewer::backends::DeviceKind;
use rgbd_viewer::errors::ConfigError;
use rgbd_viewer::input::InputAction;
use rgbd_viewer::render::DisplayMode;
use std::path::PathBuf;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("rgbd-viewer-test-{}", std::process::id()))
        .join(name)
}

#[test]
fn test_config_default() {
    let config = Config::default();
    assert_eq!(config.device, DeviceKind::SyntheticRoom);
    assert_eq!(config.initial_mode, DisplayMode::Overlay);
    assert!(config.validate().is_ok());
}

#[test]
fn test_missing_file_yields_defaults() {
    let config = Config::load(Some(&temp_path("does-not-exist.json"))).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_save_and_load() {
    let path = temp_path("saved.json");
    let mut config = Config::default();
    config.device = DeviceKind::SyntheticRamp;
    config.initial_mode = DisplayMode::HistogramCompare;
    config.pipeline.max_depth = 2.5;
    config
        .key_bindings
        .0
        .insert("x".to_string(), InputAction::SelectMode(DisplayMode::Quadtree));

    config.save(&path).unwrap();
    let loaded = Config::load(Some(&path)).unwrap();
    assert_eq!(loaded, config);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_invalid_file_is_parse_error() {
    let path = temp_path("broken.json");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, r#"{ "device": "kinect-v9" }"#).unwrap();

    assert!(matches!(
        Config::load(Some(&path)),
        Err(ConfigError::Parse(_))
    ));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_multi_character_binding_rejected() {
    let json = r#"{ "key_bindings": { "ctrl": "quit" } }"#;
    assert!(matches!(Config::from_json(json), Err(ConfigError::Parse(_))));
}

#[test]
fn test_viewer_settings_follow_config() {
    let mut config = Config::default();
    config.initial_mode = DisplayMode::NmapDebug;
    let settings = config.viewer_settings();
    assert_eq!(settings.mode, DisplayMode::NmapDebug);
    assert_eq!(settings.camera_resolution, config.camera_resolution);
    assert_eq!(settings.options, config.pipeline);
}

#[test]
fn test_out_of_range_pipeline_options_are_clamped() {
    use rgbd_viewer::constants::pipeline::{
        DEPTH_SIGMA_RANGE, MAX_DEPTH_RANGE_M, SPATIAL_SIGMA_RANGE,
    };

    let config = Config::from_json(
        r#"{ "pipeline": { "spatial_sigma": 0.0, "depth_sigma": 5.0, "max_depth": 0.0 } }"#,
    )
    .unwrap();
    assert_eq!(config.pipeline.spatial_sigma, SPATIAL_SIGMA_RANGE.0);
    assert_eq!(config.pipeline.depth_sigma, DEPTH_SIGMA_RANGE.1);
    assert_eq!(config.pipeline.max_depth, MAX_DEPTH_RANGE_M.0);
}

#[test]
fn test_viewer_settings_clamp_options() {
    let mut config = Config::default();
    config.pipeline.spatial_sigma = 0.0;
    config.pipeline.max_depth = f32::INFINITY;

    let options = config.viewer_settings().options;
    assert!(options.spatial_sigma > 0.0);
    assert!(options.max_depth.is_finite() && options.max_depth > 0.0);
    assert_eq!(options.depth_sigma, config.pipeline.depth_sigma);
}
