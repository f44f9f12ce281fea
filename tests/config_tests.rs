// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for configuration module

use emulated_camera::ProcessorConfig;
use emulated_camera::constants::{PIPELINE_DEPTH, SUPPORTED_FRAME_DURATION_RANGE_NS};
use emulated_camera::errors::AppError;
use std::path::PathBuf;
use std::time::Duration;

fn temp_config(name: &str, contents: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("emulated-camera-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.json");
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_config_default() {
    let config = ProcessorConfig::default();

    assert_eq!(config.pipeline_depth, PIPELINE_DEPTH);
    assert_eq!(config.max_frame_duration(), Duration::from_secs(30));
    assert_eq!(
        config.min_frame_duration_ns, SUPPORTED_FRAME_DURATION_RANGE_NS.0,
        "Sensor cadence should default to the fastest supported frame"
    );
    assert!(config.validate().is_ok());
}

#[test]
fn test_fence_timeout_in_milliseconds() {
    let config = ProcessorConfig::default();
    assert_eq!(config.fence_timeout_ms(), 30_000);
}

#[test]
fn test_validate_rejects_zero_depth() {
    let config = ProcessorConfig {
        pipeline_depth: 0,
        ..Default::default()
    };
    assert!(matches!(config.validate(), Err(AppError::Config(_))));
}

#[test]
fn test_validate_rejects_inverted_durations() {
    let config = ProcessorConfig {
        min_frame_duration_ns: 2_000,
        max_frame_duration_ns: 1_000,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_partial_file_uses_defaults() {
    // Missing fields fall back to their defaults
    let path = temp_config("partial", r#"{ "pipeline_depth": 8 }"#);
    let config = ProcessorConfig::load(&path).unwrap();

    assert_eq!(config.pipeline_depth, 8);
    assert_eq!(config.camera_id, 0);
    assert_eq!(
        config.max_frame_duration_ns,
        ProcessorConfig::default().max_frame_duration_ns
    );
}

#[test]
fn test_invalid_file_falls_back_to_default() {
    let path = temp_config("invalid", r#"{ "pipeline_depth": 0 }"#);

    assert!(ProcessorConfig::load(&path).is_err());
    assert_eq!(
        ProcessorConfig::load_or_default(Some(&path)),
        ProcessorConfig::default()
    );
}

#[test]
fn test_missing_file_uses_default() {
    let path = std::env::temp_dir().join("emulated-camera-does-not-exist.json");
    assert_eq!(
        ProcessorConfig::load_or_default(Some(&path)),
        ProcessorConfig::default()
    );
}

#[test]
fn test_default_path_location() {
    if let Some(path) = ProcessorConfig::default_path() {
        assert!(path.ends_with("emulated-camera/config.json"));
    }
}
