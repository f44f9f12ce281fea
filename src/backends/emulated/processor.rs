// SPDX-License-Identifier: GPL-3.0-only

//! Request processor: admission queue and request worker
//!
//! Callers admit batches of capture requests into a bounded FIFO. A single
//! worker thread pops one request per sensor vertical sync, waits on its
//! buffer fences and hands the prepared frame to the [`SensorEngine`].
//!
//! Admission resolves (locks) the client buffers while holding the queue lock.
//! The worker only holds the queue lock to pop; fence waits and sensor
//! dispatch run outside it, so a slow producer fence never stalls admission.
//! A separate dispatch lock lets [`RequestProcessor::flush`] wait for a frame
//! that is being prepared before it flushes the sensor. Flush then holds the
//! queue lock across the sensor flush and the drain.

use super::acquisition::{FrameContext, create_sensor_buffers};
use super::fence::acquire_fences;
use super::importer::BufferImporter;
use super::notify::PipelineCallback;
use super::request_state::{CaptureSettings, RequestState, StaticCharacteristics};
use super::sensor::SensorEngine;
use super::types::{
    Buffers, CaptureRequest, ErrorCode, NotifyMessage, Pipeline, RequestTemplate,
};
use super::worker::{TickAction, Worker};
use crate::config::ProcessorConfig;
use crate::errors::{ProcessorError, ProcessorResult};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use tracing::{debug, error, info, warn};

/// A request waiting in the admission queue
struct PendingRequest {
    frame_number: u32,
    pipeline_id: u32,
    callback: Arc<dyn PipelineCallback>,
    settings: Option<CaptureSettings>,
    input_buffers: Option<Buffers>,
    output_buffers: Option<Buffers>,
}

impl PendingRequest {
    fn notify_error(&self, error_code: ErrorCode) {
        self.callback.notify(
            self.pipeline_id,
            NotifyMessage::error(self.frame_number, error_code),
        );
    }
}

struct ProcessorState {
    pending: VecDeque<PendingRequest>,
    request_state: Box<dyn RequestState>,
}

struct ProcessorShared {
    state: Mutex<ProcessorState>,
    slot_freed: Condvar,
    /// Held by the worker from pop to dispatch and by flush
    dispatch: Mutex<()>,
    sensor: Arc<dyn SensorEngine>,
    importer: Arc<dyn BufferImporter>,
    config: ProcessorConfig,
}

/// State owned by the worker thread
#[derive(Default)]
struct WorkerState {
    /// Settings of the most recent request that carried any
    last_settings: Option<CaptureSettings>,
}

impl ProcessorShared {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, ProcessorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tick(&self, worker: &mut WorkerState) -> TickAction {
        {
            let _dispatch = self.dispatch.lock().unwrap_or_else(|e| e.into_inner());
            let request = self.lock_state().pending.pop_front();
            if let Some(request) = request {
                self.slot_freed.notify_one();
                self.dispatch(request, worker);
            }
        }

        if !self.sensor.wait_for_vsync(self.config.max_frame_duration()) {
            debug!("Vertical sync wait returned without a new frame");
        }
        TickAction::Continue
    }

    /// Prepare one request and hand it to the sensor
    fn dispatch(&self, request: PendingRequest, worker: &mut WorkerState) {
        let PendingRequest {
            frame_number,
            pipeline_id,
            callback,
            settings,
            input_buffers,
            output_buffers,
        } = request;

        let settings = match settings {
            Some(settings) => {
                worker.last_settings = Some(settings.clone());
                Ok(settings)
            }
            None => worker.last_settings.clone().ok_or_else(|| {
                ProcessorError::InvalidState("no settings were ever supplied".into())
            }),
        };
        let prepared = settings.and_then(|settings| {
            let sensor_settings = self.lock_state().request_state.sensor_settings(&settings)?;
            Ok((settings, sensor_settings))
        });

        let timeout_ms = self.config.fence_timeout_ms();
        let outputs = acquire_fences(output_buffers, self.importer.as_ref(), timeout_ms)
            .filter(|buffers| !buffers.is_empty());

        match (prepared, outputs) {
            (Ok((settings, sensor_settings)), Some(outputs)) => {
                let result = self
                    .lock_state()
                    .request_state
                    .initialize_result(pipeline_id, frame_number, &settings);
                let inputs = acquire_fences(input_buffers, self.importer.as_ref(), timeout_ms);

                debug!(
                    frame_number,
                    pipeline_id,
                    outputs = outputs.len(),
                    inputs = inputs.as_ref().map_or(0, Vec::len),
                    "Dispatching request to sensor"
                );
                self.sensor
                    .set_current_request(sensor_settings, result, inputs, outputs);
            }
            (Err(e), _) => {
                warn!(frame_number, pipeline_id, error = %e, "Failed to resolve request settings");
                callback.notify(
                    pipeline_id,
                    NotifyMessage::error(frame_number, ErrorCode::Result),
                );
            }
            (Ok(_), None) => {
                warn!(frame_number, pipeline_id, "No output buffers left after fence wait");
                callback.notify(
                    pipeline_id,
                    NotifyMessage::error(frame_number, ErrorCode::Result),
                );
            }
        }
    }
}

/// Bounded admission queue feeding a single request worker
pub struct RequestProcessor {
    shared: Arc<ProcessorShared>,
    worker: Option<Worker>,
}

impl RequestProcessor {
    /// Create the processor and start its worker thread
    pub fn new(
        config: ProcessorConfig,
        sensor: Arc<dyn SensorEngine>,
        importer: Arc<dyn BufferImporter>,
        request_state: Box<dyn RequestState>,
    ) -> ProcessorResult<Self> {
        if config.pipeline_depth == 0 {
            return Err(ProcessorError::InvalidArgument(
                "pipeline depth must be non-zero".into(),
            ));
        }

        let shared = Arc::new(ProcessorShared {
            state: Mutex::new(ProcessorState {
                pending: VecDeque::with_capacity(config.pipeline_depth),
                request_state,
            }),
            slot_freed: Condvar::new(),
            dispatch: Mutex::new(()),
            sensor,
            importer,
            config,
        });

        let worker_shared = Arc::clone(&shared);
        let worker = match Worker::spawn_with_state(
            "emulated-request-worker",
            || Ok(WorkerState::default()),
            move |state| worker_shared.tick(state),
        ) {
            Ok(worker) => worker,
            Err(e) => {
                error!(error = %e, "Failed to start request worker");
                if let Err(shutdown) = shared.sensor.shut_down() {
                    warn!(error = %shutdown, "Sensor shutdown failed");
                }
                return Err(e);
            }
        };

        info!(
            pipeline_depth = shared.config.pipeline_depth,
            "Request processor started"
        );
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Initialize the settings model from static characteristics
    pub fn initialize(&self, characteristics: StaticCharacteristics) -> ProcessorResult<()> {
        self.shared
            .lock_state()
            .request_state
            .initialize(characteristics)
    }

    pub fn get_default_request(&self, template: RequestTemplate) -> ProcessorResult<CaptureSettings> {
        self.shared
            .lock_state()
            .request_state
            .default_request(template)
    }

    /// Admit a batch of requests sharing `frame_number`
    ///
    /// `pipelines` is indexed by pipeline id. The whole batch is admitted under
    /// one lock; when the queue is full the call waits up to the maximum frame
    /// duration for the worker to free a slot. Items admitted before a failing
    /// item stay queued.
    pub fn process_requests(
        &self,
        frame_number: u32,
        requests: &[CaptureRequest],
        pipelines: &[Pipeline],
    ) -> ProcessorResult<()> {
        let shared = &self.shared;
        let mut state = shared.lock_state();

        for request in requests {
            let Some(pipeline) = pipelines.get(request.pipeline_id as usize) else {
                error!(
                    frame_number,
                    pipeline_id = request.pipeline_id,
                    pipelines = pipelines.len(),
                    "Pipeline id out of range"
                );
                return Err(ProcessorError::InvalidArgument(format!(
                    "pipeline id {} out of range",
                    request.pipeline_id
                )));
            };
            if request.output_buffers.is_empty() {
                error!(frame_number, pipeline_id = pipeline.id, "Request without output buffers");
                return Err(ProcessorError::InvalidArgument(
                    "request carries no output buffers".into(),
                ));
            }

            let depth = shared.config.pipeline_depth;
            let (guard, wait) = shared
                .slot_freed
                .wait_timeout_while(state, shared.config.max_frame_duration(), |s| {
                    s.pending.len() >= depth
                })
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
            if wait.timed_out() {
                error!(frame_number, pipeline_id = pipeline.id, "Timed out waiting for a pending request slot");
                return Err(ProcessorError::Timeout);
            }

            let frame = FrameContext {
                frame_number,
                pipeline_id: pipeline.id,
                camera_id: pipeline.physical_camera_id,
                callback: Arc::clone(&pipeline.callback),
            };
            let output_buffers = create_sensor_buffers(
                &frame,
                &request.output_buffers,
                &pipeline.streams,
                &shared.importer,
                shared.sensor.as_ref(),
            );
            let input_buffers = create_sensor_buffers(
                &frame,
                &request.input_buffers,
                &pipeline.streams,
                &shared.importer,
                shared.sensor.as_ref(),
            );

            state.pending.push_back(PendingRequest {
                frame_number,
                pipeline_id: pipeline.id,
                callback: frame.callback,
                settings: request.settings.clone(),
                input_buffers,
                output_buffers,
            });
            debug!(frame_number, pipeline_id = pipeline.id, queued = state.pending.len(), "Request admitted");
        }

        Ok(())
    }

    /// Fail every queued request
    ///
    /// The sensor is flushed first. Each queued request then receives a request
    /// error in admission order. The queue lock is held from the sensor flush
    /// through the drain, so admissions wait until the flush completes.
    /// Returns the sensor's flush status.
    pub fn flush(&self) -> ProcessorResult<()> {
        let shared = &self.shared;
        let _dispatch = shared.dispatch.lock().unwrap_or_else(|e| e.into_inner());
        let mut state = shared.lock_state();

        let status = shared.sensor.flush();
        if let Err(e) = &status {
            warn!(error = %e, "Sensor flush failed");
        }

        let drained: Vec<PendingRequest> = state.pending.drain(..).collect();
        drop(state);
        shared.slot_freed.notify_all();

        info!(requests = drained.len(), "Flushing pending requests");
        for request in &drained {
            request.notify_error(ErrorCode::Request);
        }

        status
    }

    /// Number of requests waiting for the worker
    pub fn queue_len(&self) -> usize {
        self.shared.lock_state().pending.len()
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(Worker::is_running)
    }

    /// Stop the worker after its current tick and shut the sensor down
    pub fn stop(&mut self) -> ProcessorResult<()> {
        let Some(mut worker) = self.worker.take() else {
            return Ok(());
        };

        worker.stop();
        info!("Request worker stopped");
        self.shared.sensor.shut_down()
    }
}

impl Drop for RequestProcessor {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Sensor shutdown failed");
        }
    }
}
