// SPDX-License-Identifier: GPL-3.0-only
//! Named background threads driven by a tick closure
//!
//! Both the request worker and the simulated sensor run as a [`Worker`]: a
//! thread that calls its tick closure until the closure returns
//! [`TickAction::Exit`] or a stop is requested. Dropping the worker stops and
//! joins the thread.

use crate::errors::{ProcessorError, ProcessorResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Returned by a tick closure to control the thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    Continue,
    Exit,
}

/// Handle to a running worker thread
pub struct Worker {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl Worker {
    /// Spawn a worker without per-thread state
    pub fn spawn<F>(name: &str, mut tick: F) -> ProcessorResult<Self>
    where
        F: FnMut() -> TickAction + Send + 'static,
    {
        Self::spawn_with_state(name, || Ok(()), move |_: &mut ()| tick())
    }

    /// Spawn a worker whose tick closure owns state built on the thread
    ///
    /// If `init` fails the thread exits before the first tick.
    pub fn spawn_with_state<S, I, F>(name: &str, init: I, mut tick: F) -> ProcessorResult<Self>
    where
        S: 'static,
        I: FnOnce() -> ProcessorResult<S> + Send + 'static,
        F: FnMut(&mut S) -> TickAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        info!(name = %name, "Starting worker thread");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = match init() {
                    Ok(state) => state,
                    Err(e) => {
                        warn!(name = %thread_name, error = %e, "Worker initialization failed");
                        return;
                    }
                };

                while !thread_stop.load(Ordering::SeqCst) {
                    if tick(&mut state) == TickAction::Exit {
                        debug!(name = %thread_name, "Worker requested exit");
                        break;
                    }
                }

                info!(name = %thread_name, "Worker thread exiting");
            })
            .map_err(|e| {
                ProcessorError::InvalidState(format!("failed to spawn {} thread: {}", name, e))
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Ask the thread to exit after its current tick, without waiting
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting worker stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Request a stop and join the thread
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.thread().id() == thread::current().id() {
                warn!(name = %self.name, "Worker cannot join itself");
                return;
            }
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Worker thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Worker thread finished");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}
