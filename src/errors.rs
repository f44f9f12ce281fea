// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the emulated camera pipeline

use std::fmt;

/// Result type alias for request processing operations
pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// Errors raised while admitting, preparing or dispatching capture requests
///
/// Only `InvalidArgument` and `Timeout` are ever returned synchronously from
/// request admission. Buffer-local failures narrow the buffer set of a request
/// and are reported to the client as asynchronous error notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// Unknown pipeline/stream id or otherwise malformed input
    InvalidArgument(String),
    /// The admission queue stayed full for longer than the maximum frame duration
    Timeout,
    /// A client buffer could not be locked for CPU access
    LockFailed(String),
    /// The acquire fence attached to a buffer could not be imported
    FenceImportError,
    /// Pixel format / dataspace combination without a known layout
    Unsupported(String),
    /// Operation not valid in the current state (e.g. no settings seen yet)
    InvalidState(String),
    /// The sensor engine reported a failure
    Sensor(String),
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            ProcessorError::Timeout => write!(f, "Timed out waiting for a pending request slot"),
            ProcessorError::LockFailed(msg) => write!(f, "Failed to lock buffer: {}", msg),
            ProcessorError::FenceImportError => write!(f, "Failed to import acquire fence"),
            ProcessorError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            ProcessorError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            ProcessorError::Sensor(msg) => write!(f, "Sensor error: {}", msg),
        }
    }
}

impl std::error::Error for ProcessorError {}

/// Failure modes of a native fence wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceError {
    /// The fence did not signal within the timeout
    TimedOut,
    /// The producer signaled an error on the fence
    Failed,
}

impl fmt::Display for FenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FenceError::TimedOut => write!(f, "Fence wait timed out"),
            FenceError::Failed => write!(f, "Fence signaled an error"),
        }
    }
}

impl std::error::Error for FenceError {}

/// Top-level error for the binary and configuration layer
#[derive(Debug)]
pub enum AppError {
    /// Request processing errors
    Processor(ProcessorError),
    /// Configuration errors
    Config(String),
    /// Filesystem errors
    Io(std::io::Error),
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Processor(e) => write!(f, "Processor error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Processor(e) => Some(e),
            AppError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ProcessorError> for AppError {
    fn from(err: ProcessorError) -> Self {
        AppError::Processor(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}
