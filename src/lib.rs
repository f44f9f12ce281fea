// SPDX-License-Identifier: GPL-3.0-only

//! Emulated camera device
//!
//! Request processing for a simulated camera: capture requests are admitted
//! into a bounded queue, their buffers are locked and fence-synchronized, and
//! a worker hands one frame per vertical sync to a sensor engine.
//!
//! - [`backends`]: the emulated camera pipeline
//! - [`config`]: processor configuration
//! - [`constants`]: sensor limits and defaults
//! - [`errors`]: error types

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;

pub use backends::emulated::{CameraSession, RequestProcessor};
pub use config::ProcessorConfig;
pub use errors::{AppError, ProcessorError};
