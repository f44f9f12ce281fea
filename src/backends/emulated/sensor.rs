// SPDX-License-Identifier: GPL-3.0-only

//! Sensor engine interface and a simulated sensor
//!
//! The request processor hands one prepared frame at a time to a
//! [`SensorEngine`] and then waits for the next vertical sync. The sensor owns
//! the buffers from that point on and reports shutter, result and error
//! notifications through the buffers' pipeline callback.

use super::types::{
    BufferStatus, Buffers, ErrorCode, NotifyMessage, PipelineResult, PixelFormat, Plane,
    SensorSettings,
};
use super::worker::{TickAction, Worker};
use crate::errors::{ProcessorError, ProcessorResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Frame producer consuming prepared requests
pub trait SensorEngine: Send + Sync {
    /// Queue the frame to be captured on the next vertical sync
    ///
    /// Replaces a frame that was queued but not captured yet.
    fn set_current_request(
        &self,
        settings: SensorSettings,
        result: PipelineResult,
        input_buffers: Option<Buffers>,
        output_buffers: Buffers,
    );

    /// Block until the next vertical sync; `false` if `timeout` elapsed first
    fn wait_for_vsync(&self, timeout: Duration) -> bool;

    /// Drop the queued frame, reporting it to its client
    fn flush(&self) -> ProcessorResult<()>;

    /// Stop producing frames
    fn shut_down(&self) -> ProcessorResult<()>;

    /// Format the sensor actually uses for an input stream of `format`
    fn override_format(&self, format: PixelFormat) -> PixelFormat {
        canonical_input_format(format)
    }
}

/// Opaque input layouts are consumed as planar YCbCr
pub fn canonical_input_format(format: PixelFormat) -> PixelFormat {
    match format {
        PixelFormat::ImplementationDefined => PixelFormat::YCbCr420,
        other => other,
    }
}

/// A frame waiting for the next vertical sync
struct SensorJob {
    settings: SensorSettings,
    result: PipelineResult,
    input_buffers: Option<Buffers>,
    output_buffers: Buffers,
}

#[derive(Default)]
struct SyncState {
    vsync_count: u64,
    shutting_down: bool,
}

struct SensorShared {
    current: Mutex<Option<SensorJob>>,
    sync: Mutex<SyncState>,
    vsync: Condvar,
    epoch: Instant,
    frame_period: Duration,
    frames_captured: AtomicU64,
}

impl SensorShared {
    fn tick(&self) -> TickAction {
        let (job, period) = {
            let mut sync = self.sync.lock().unwrap_or_else(|e| e.into_inner());
            if sync.shutting_down {
                return TickAction::Exit;
            }
            let job = self
                .current
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            sync.vsync_count = sync.vsync_count.wrapping_add(1);
            self.vsync.notify_all();

            let period = job
                .as_ref()
                .map(|j| Duration::from_nanos(j.settings.frame_duration_ns))
                .map_or(self.frame_period, |d| d.max(self.frame_period));
            (job, period)
        };

        if let Some(job) = job {
            self.capture(job);
        }

        // Sleep until the next frame boundary or shutdown
        let sync = self.sync.lock().unwrap_or_else(|e| e.into_inner());
        let (sync, _) = self
            .vsync
            .wait_timeout_while(sync, period, |s| !s.shutting_down)
            .unwrap_or_else(|e| e.into_inner());

        if sync.shutting_down {
            TickAction::Exit
        } else {
            TickAction::Continue
        }
    }

    fn capture(&self, job: SensorJob) {
        let SensorJob {
            settings,
            mut result,
            input_buffers,
            mut output_buffers,
        } = job;

        let timestamp_ns = self.epoch.elapsed().as_nanos() as u64;
        let Some(callback) = output_buffers.first().map(|b| Arc::clone(&b.callback)) else {
            warn!(frame_number = result.frame_number, "Frame without output buffers dropped");
            return;
        };

        callback.notify(
            result.pipeline_id,
            NotifyMessage::Shutter {
                frame_number: result.frame_number,
                timestamp_ns,
            },
        );

        let shade = (result.frame_number % 256) as u8;
        for buffer in output_buffers.iter_mut() {
            match &buffer.plane {
                Plane::Single { img, .. } => img.fill(shade),
                Plane::YCbCr { y, cb, cr, .. } => {
                    y.fill(shade);
                    cb.fill(128);
                    cr.fill(128);
                }
            }
            buffer.mark_ok();
        }

        result.output_buffers = output_buffers
            .iter()
            .map(|b| b.stream_buffer.clone())
            .collect();
        result.input_buffers = input_buffers
            .iter()
            .flatten()
            .map(|b| {
                let mut stream_buffer = b.stream_buffer.clone();
                stream_buffer.status = BufferStatus::Ok;
                stream_buffer
            })
            .collect();

        // Release the CPU locks before handing the result back
        drop(output_buffers);
        drop(input_buffers);

        self.frames_captured.fetch_add(1, Ordering::Relaxed);
        debug!(
            frame_number = result.frame_number,
            exposure_ns = settings.exposure_time_ns,
            sensitivity = settings.sensitivity,
            "Frame captured"
        );
        callback.process_result(result);
    }
}

/// Software sensor that fills output buffers with a flat pattern
///
/// A background thread emits one vertical sync per frame period, stretched to
/// the frame duration of the frame being captured when that is longer.
pub struct SimulatedSensor {
    shared: Arc<SensorShared>,
    worker: Mutex<Option<Worker>>,
}

impl SimulatedSensor {
    pub fn new(frame_period: Duration) -> ProcessorResult<Self> {
        let shared = Arc::new(SensorShared {
            current: Mutex::new(None),
            sync: Mutex::new(SyncState::default()),
            vsync: Condvar::new(),
            epoch: Instant::now(),
            frame_period,
            frames_captured: AtomicU64::new(0),
        });

        let tick_shared = Arc::clone(&shared);
        let worker = Worker::spawn("emulated-sensor", move || tick_shared.tick())?;

        info!(period_ms = frame_period.as_millis() as u64, "Simulated sensor started");
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Number of frames delivered so far
    pub fn frames_captured(&self) -> u64 {
        self.shared.frames_captured.load(Ordering::Relaxed)
    }
}

impl SensorEngine for SimulatedSensor {
    fn set_current_request(
        &self,
        settings: SensorSettings,
        result: PipelineResult,
        input_buffers: Option<Buffers>,
        output_buffers: Buffers,
    ) {
        let job = SensorJob {
            settings,
            result,
            input_buffers,
            output_buffers,
        };

        let replaced = self
            .shared
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(job);

        if let Some(old) = replaced {
            warn!(
                frame_number = old.result.frame_number,
                "Queued frame replaced before capture"
            );
            if let Some(buffer) = old.output_buffers.first() {
                buffer.callback.notify(
                    old.result.pipeline_id,
                    NotifyMessage::error(old.result.frame_number, ErrorCode::Request),
                );
            }
        }
    }

    fn wait_for_vsync(&self, timeout: Duration) -> bool {
        let sync = self.shared.sync.lock().unwrap_or_else(|e| e.into_inner());
        if sync.shutting_down {
            return false;
        }

        let start = sync.vsync_count;
        let (sync, wait) = self
            .shared
            .vsync
            .wait_timeout_while(sync, timeout, |s| {
                s.vsync_count == start && !s.shutting_down
            })
            .unwrap_or_else(|e| e.into_inner());

        !wait.timed_out() && !sync.shutting_down
    }

    fn flush(&self) -> ProcessorResult<()> {
        let pending = self
            .shared
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(job) = pending {
            debug!(frame_number = job.result.frame_number, "Flushing queued frame");
            if let Some(buffer) = job.output_buffers.first() {
                buffer.callback.notify(
                    job.result.pipeline_id,
                    NotifyMessage::error(job.result.frame_number, ErrorCode::Request),
                );
            }
        }

        Ok(())
    }

    fn shut_down(&self) -> ProcessorResult<()> {
        {
            let mut sync = self.shared.sync.lock().unwrap_or_else(|e| e.into_inner());
            sync.shutting_down = true;
            self.shared.vsync.notify_all();
        }

        let worker = self
            .worker
            .lock()
            .map_err(|_| ProcessorError::Sensor("sensor worker lock poisoned".into()))?
            .take();

        if let Some(mut worker) = worker {
            worker.stop();
            info!(frames = self.frames_captured(), "Simulated sensor shut down");
        }

        self.flush()
    }
}

impl Drop for SimulatedSensor {
    fn drop(&mut self) {
        if let Err(e) = self.shut_down() {
            warn!(error = %e, "Sensor shutdown failed");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Sensor that discards every frame
    pub struct NullSensor;

    impl SensorEngine for NullSensor {
        fn set_current_request(
            &self,
            _settings: SensorSettings,
            _result: PipelineResult,
            _input_buffers: Option<Buffers>,
            _output_buffers: Buffers,
        ) {
        }

        fn wait_for_vsync(&self, _timeout: Duration) -> bool {
            true
        }

        fn flush(&self) -> ProcessorResult<()> {
            Ok(())
        }

        fn shut_down(&self) -> ProcessorResult<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::emulated::importer::{BufferHandle, BufferImporter, HeapBufferImporter};
    use crate::backends::emulated::notify::{ChannelCallback, PipelineEvent};
    use crate::backends::emulated::request_state::CaptureSettings;
    use crate::backends::emulated::types::{Dataspace, SensorBuffer, StreamBuffer};
    use std::sync::mpsc::Receiver;

    fn settings() -> SensorSettings {
        SensorSettings {
            exposure_time_ns: 1_000_000,
            frame_duration_ns: 2_000_000,
            sensitivity: 100,
        }
    }

    fn result(frame_number: u32) -> PipelineResult {
        PipelineResult {
            camera_id: 0,
            pipeline_id: 1,
            frame_number,
            result_metadata: CaptureSettings::default(),
            pipeline_depth: 4,
            output_buffers: Vec::new(),
            input_buffers: Vec::new(),
            partial_result: 1,
        }
    }

    fn output(frame_number: u32) -> (SensorBuffer, BufferHandle, Receiver<PipelineEvent>) {
        let importer: Arc<dyn BufferImporter> = Arc::new(HeapBufferImporter::new());
        let handle = BufferHandle::allocate(16);
        let img = importer.lock(&handle, 0, 16).unwrap();
        let (callback, rx) = ChannelCallback::new();

        let buffer = SensorBuffer {
            frame_number,
            pipeline_id: 1,
            camera_id: 0,
            width: 2,
            height: 2,
            format: PixelFormat::Rgba8888,
            dataspace: Dataspace::Unknown,
            is_input: false,
            plane: Plane::Single {
                img,
                stride: 8,
                buffer_size: 16,
            },
            stream_buffer: StreamBuffer::new(0, handle.clone()),
            acquire_fence: None,
            callback,
            importer,
        };
        (buffer, handle, rx)
    }

    #[test]
    fn test_override_format_maps_opaque_input() {
        assert_eq!(
            canonical_input_format(PixelFormat::ImplementationDefined),
            PixelFormat::YCbCr420
        );
        assert_eq!(canonical_input_format(PixelFormat::Raw16), PixelFormat::Raw16);
    }

    #[test]
    fn test_captured_frame_is_delivered() {
        let sensor = SimulatedSensor::new(Duration::from_millis(2)).unwrap();
        let (buffer, handle, rx) = output(3);

        sensor.set_current_request(settings(), result(3), None, vec![buffer]);
        assert!(sensor.wait_for_vsync(Duration::from_secs(2)));

        let mut got_shutter = false;
        let delivered = loop {
            match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
                PipelineEvent::Notify {
                    message: NotifyMessage::Shutter { frame_number, .. },
                    ..
                } => {
                    assert_eq!(frame_number, 3);
                    got_shutter = true;
                }
                PipelineEvent::Result(result) => break result,
                other => panic!("unexpected event {:?}", other),
            }
        };

        assert!(got_shutter);
        assert_eq!(delivered.frame_number, 3);
        assert_eq!(delivered.output_buffers.len(), 1);
        assert_eq!(delivered.output_buffers[0].status, BufferStatus::Ok);
        assert!(handle.contents().iter().all(|&b| b == 3));
        assert!(!handle.is_locked());
        assert_eq!(sensor.frames_captured(), 1);
    }

    #[test]
    fn test_flush_fails_queued_frame() {
        let sensor = SimulatedSensor::new(Duration::from_millis(2)).unwrap();
        // Stop the tick thread so the frame stays queued
        sensor.worker.lock().unwrap().take().unwrap().stop();

        let (buffer, handle, rx) = output(9);
        sensor.set_current_request(settings(), result(9), None, vec![buffer]);
        sensor.flush().unwrap();

        match rx.try_recv().unwrap() {
            PipelineEvent::Notify { message, .. } => {
                assert_eq!(message, NotifyMessage::error(9, ErrorCode::Request));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(!handle.is_locked());
    }

    #[test]
    fn test_vsync_wait_fails_after_shutdown() {
        let sensor = SimulatedSensor::new(Duration::from_millis(2)).unwrap();
        sensor.shut_down().unwrap();
        assert!(!sensor.wait_for_vsync(Duration::from_millis(50)));
        sensor.shut_down().unwrap();
    }
}
