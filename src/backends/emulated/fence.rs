// SPDX-License-Identifier: GPL-3.0-only

//! Acquire fences and the fence wait stage
//!
//! A [`Fence`] is signaled by the producer of a buffer once the buffer contents
//! may be accessed. Before the sensor touches a buffer, [`acquire_fences`]
//! waits on every imported fence and drops buffers whose fence failed or did not
//! signal in time.

use super::importer::BufferImporter;
use super::types::Buffers;
use crate::errors::FenceError;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Pending,
    Signaled,
    Failed,
    Closed,
}

/// Producer-side synchronization object
#[derive(Debug)]
pub struct Fence {
    state: Mutex<FenceState>,
    cond: Condvar,
}

/// Client-owned fence handle as attached to a stream buffer
pub type FenceHandle = Arc<Fence>;

impl Default for Fence {
    fn default() -> Self {
        Self::new()
    }
}

impl Fence {
    /// A fence that has not signaled yet
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FenceState::Pending),
            cond: Condvar::new(),
        }
    }

    /// A fence that is already signaled
    pub fn signaled() -> Self {
        Self {
            state: Mutex::new(FenceState::Signaled),
            cond: Condvar::new(),
        }
    }

    pub fn signal(&self) {
        self.set_state(FenceState::Signaled);
    }

    /// Signal an error to all waiters
    pub fn fail(&self) {
        self.set_state(FenceState::Failed);
    }

    /// Invalidate the descriptor; importing a closed fence fails
    pub fn close(&self) {
        self.set_state(FenceState::Closed);
    }

    pub fn is_closed(&self) -> bool {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) == FenceState::Closed
    }

    fn set_state(&self, new_state: FenceState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = new_state;
        self.cond.notify_all();
    }

    /// Block until the fence leaves the pending state or `timeout` elapses
    pub fn wait(&self, timeout: Duration) -> Result<(), FenceError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (state, _) = self
            .cond
            .wait_timeout_while(state, timeout, |s| *s == FenceState::Pending)
            .unwrap_or_else(|e| e.into_inner());

        match *state {
            FenceState::Signaled => Ok(()),
            FenceState::Pending => Err(FenceError::TimedOut),
            FenceState::Failed | FenceState::Closed => Err(FenceError::Failed),
        }
    }
}

/// Internal descriptor produced by importing a client fence
#[derive(Debug, Clone)]
pub struct AcquireFence(FenceHandle);

impl AcquireFence {
    pub fn new(fence: FenceHandle) -> Self {
        Self(fence)
    }

    pub fn wait(&self, timeout: Duration) -> Result<(), FenceError> {
        self.0.wait(timeout)
    }
}

/// Wait on the acquire fence of every buffer and keep only the usable ones
///
/// Buffers without a fence are kept as-is. A failed or timed out wait drops
/// the buffer (releasing its lock) without aborting the rest of the set.
/// `None` or an empty set yields `None`.
pub fn acquire_fences(
    buffers: Option<Buffers>,
    importer: &dyn BufferImporter,
    timeout_ms: u64,
) -> Option<Buffers> {
    let buffers = buffers.filter(|b| !b.is_empty())?;

    let mut acquired = Vec::with_capacity(buffers.len());
    for buffer in buffers {
        let status = match buffer.acquire_fence.as_ref() {
            Some(fence) => importer.wait_fence(fence, timeout_ms),
            None => Ok(()),
        };

        match status {
            Ok(()) => acquired.push(buffer),
            Err(e) => {
                error!(
                    frame_number = buffer.frame_number,
                    stream_id = buffer.stream_buffer.stream_id,
                    error = %e,
                    "Fence sync failed"
                );
            }
        }
    }

    debug!(acquired = acquired.len(), "Fence wait finished");
    Some(acquired)
}
