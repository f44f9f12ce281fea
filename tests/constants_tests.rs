// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for constants module

use emulated_camera::constants::*;
use std::time::Duration;

#[test]
fn test_align_to() {
    assert_eq!(align_to(66, 2), Some(66));
    assert_eq!(align_to(65, 2), Some(66));
    assert_eq!(align_to(132, 16), Some(144));
    assert_eq!(align_to(144, 16), Some(144));
    assert_eq!(align_to(0, 16), Some(0));
    assert_eq!(align_to(u32::MAX, 2), None);
}

#[test]
fn test_frame_duration_bounds() {
    // Admission, fence and vsync waits are bounded by 30 s
    assert_eq!(MAX_FRAME_DURATION, Duration::from_secs(30));
    assert!(MIN_FRAME_DURATION < MAX_FRAME_DURATION);
    assert_eq!(
        MIN_FRAME_DURATION.as_nanos() as u64,
        SUPPORTED_FRAME_DURATION_RANGE_NS.0
    );
}

#[test]
fn test_defaults_within_supported_ranges() {
    let (min_iso, max_iso) = SUPPORTED_SENSITIVITY_RANGE;
    assert!((min_iso..=max_iso).contains(&DEFAULT_SENSITIVITY));

    let (min_exp, max_exp) = SUPPORTED_EXPOSURE_TIME_RANGE_NS;
    assert!((min_exp..=max_exp).contains(&DEFAULT_EXPOSURE_TIME_NS));
    assert!(
        DEFAULT_EXPOSURE_TIME_NS <= DEFAULT_FRAME_DURATION_NS,
        "Default exposure should fit in the default frame"
    );
}

#[test]
fn test_pipeline_depth() {
    assert_eq!(PIPELINE_DEPTH, 4);
    assert_eq!(PARTIAL_RESULT_COUNT, 1);
}
