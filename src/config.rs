// SPDX-License-Identifier: GPL-3.0-only

//! Processor configuration
//!
//! Loaded from `$XDG_CONFIG_HOME/emulated-camera/config.json` when present.
//! Every field has a default so partial files are accepted.

use crate::constants::{PIPELINE_DEPTH, SUPPORTED_FRAME_DURATION_RANGE_NS};
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Runtime parameters of the request processor and simulated sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Camera id reported in per-frame results
    pub camera_id: u32,
    /// Capacity of the admission queue
    pub pipeline_depth: usize,
    /// Upper bound for admission, fence and vsync waits (nanoseconds)
    pub max_frame_duration_ns: u64,
    /// Tick period of the simulated sensor (nanoseconds)
    pub min_frame_duration_ns: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            camera_id: 0,
            pipeline_depth: PIPELINE_DEPTH,
            max_frame_duration_ns: SUPPORTED_FRAME_DURATION_RANGE_NS.1,
            min_frame_duration_ns: SUPPORTED_FRAME_DURATION_RANGE_NS.0,
        }
    }
}

impl ProcessorConfig {
    /// Maximum frame duration as a `Duration`
    pub fn max_frame_duration(&self) -> Duration {
        Duration::from_nanos(self.max_frame_duration_ns)
    }

    /// Simulated sensor tick period as a `Duration`
    pub fn min_frame_duration(&self) -> Duration {
        Duration::from_nanos(self.min_frame_duration_ns)
    }

    /// Fence wait bound, converted to whole milliseconds
    pub fn fence_timeout_ms(&self) -> u64 {
        self.max_frame_duration_ns / 1_000_000
    }

    /// Reject values the processor cannot run with
    pub fn validate(&self) -> AppResult<()> {
        if self.pipeline_depth == 0 {
            return Err(AppError::Config(
                "pipeline_depth must be non-zero".to_string(),
            ));
        }
        if self.min_frame_duration_ns == 0 || self.max_frame_duration_ns == 0 {
            return Err(AppError::Config(
                "frame durations must be non-zero".to_string(),
            ));
        }
        if self.min_frame_duration_ns > self.max_frame_duration_ns {
            return Err(AppError::Config(format!(
                "min_frame_duration_ns ({}) exceeds max_frame_duration_ns ({})",
                self.min_frame_duration_ns, self.max_frame_duration_ns
            )));
        }
        Ok(())
    }

    /// Default location of the configuration file
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("emulated-camera").join("config.json"))
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        debug!(path = %path.display(), ?config, "Loaded processor config");
        Ok(config)
    }

    /// Load from `path` (or the default location), falling back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(p) => p,
            None => return Self::default(),
        };

        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Self::default();
        }

        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid config, using defaults");
                Self::default()
            }
        }
    }
}
