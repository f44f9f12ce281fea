// SPDX-License-Identifier: GPL-3.0-only

//! Device-wide constants of the emulated sensor

use std::time::Duration;

/// Number of requests that may be pending in the admission queue
pub const PIPELINE_DEPTH: usize = 4;

/// Supported frame duration range in nanoseconds (~1/30 s to 30 s)
pub const SUPPORTED_FRAME_DURATION_RANGE_NS: (u64, u64) = (33_331_760, 30_000_000_000);

/// Supported exposure time range in nanoseconds (1 us to 30 s)
pub const SUPPORTED_EXPOSURE_TIME_RANGE_NS: (u64, u64) = (1_000, 30_000_000_000);

/// Supported ISO sensitivity range
pub const SUPPORTED_SENSITIVITY_RANGE: (i32, i32) = (100, 1600);

pub const DEFAULT_SENSITIVITY: i32 = 100;
pub const DEFAULT_EXPOSURE_TIME_NS: u64 = 15_000_000;
pub const DEFAULT_FRAME_DURATION_NS: u64 = 33_000_000;

/// Only a single partial result per frame is produced
pub const PARTIAL_RESULT_COUNT: u32 = 1;

/// Producer usage applied to every configured stream (CPU writes often)
pub const USAGE_SW_WRITE_OFTEN: u64 = 0x0000_0030;

/// Maximum supported frame duration; bounds admission waits, fence waits and vsync waits
pub const MAX_FRAME_DURATION: Duration =
    Duration::from_nanos(SUPPORTED_FRAME_DURATION_RANGE_NS.1);

/// Fastest cadence of the simulated sensor
pub const MIN_FRAME_DURATION: Duration =
    Duration::from_nanos(SUPPORTED_FRAME_DURATION_RANGE_NS.0);

/// Round `value` up to the next multiple of `alignment`, `None` on overflow
pub const fn align_to(value: u32, alignment: u32) -> Option<u32> {
    let delta = value % alignment;
    if delta == 0 {
        Some(value)
    } else {
        value.checked_add(alignment - delta)
    }
}
