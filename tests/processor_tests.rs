// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the request processor
//!
//! The fake sensor below parks the worker in every vertical sync wait until the
//! test grants a tick, which makes each worker iteration deterministic.

use emulated_camera::backends::emulated::{
    BufferHandle, Buffers, CaptureRequest, CaptureSettings, ChannelCallback, Dataspace,
    EmulatedRequestState, ErrorCode, Fence, HeapBufferImporter, NotifyMessage, Pipeline,
    PipelineEvent, PipelineResult, PixelFormat, RequestProcessor, RequestTemplate, SensorEngine,
    SensorSettings, StaticCharacteristics, StreamBuffer, StreamDescriptor,
};
use emulated_camera::errors::{ProcessorError, ProcessorResult};
use emulated_camera::ProcessorConfig;
use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Dispatch {
    frame_number: u32,
    settings: SensorSettings,
    outputs: usize,
}

#[derive(Default)]
struct FakeState {
    parks: u64,
    grants: u64,
    released: bool,
    shut_down: bool,
    flushes: u32,
    /// While set, `flush` blocks after recording itself
    hold_flush: bool,
    dispatched: Vec<Dispatch>,
}

/// Sensor whose vertical syncs are driven by the test
#[derive(Default)]
struct FakeSensor {
    state: Mutex<FakeState>,
    cond: Condvar,
}

impl FakeSensor {
    fn parks(&self) -> u64 {
        self.state.lock().unwrap().parks
    }

    /// Wait until the worker has parked more than `parks` times
    fn wait_parked(&self, parks: u64) {
        let state = self.state.lock().unwrap();
        let (state, wait) = self
            .cond
            .wait_timeout_while(state, STEP_TIMEOUT, |s| s.parks <= parks)
            .unwrap();
        assert!(!wait.timed_out(), "worker never parked (parks = {})", state.parks);
    }

    /// Let the worker run exactly one more tick
    fn step(&self) {
        let parks = self.parks();
        {
            let mut state = self.state.lock().unwrap();
            state.grants += 1;
            self.cond.notify_all();
        }
        self.wait_parked(parks);
    }

    /// Stop parking the worker
    fn release(&self) {
        self.state.lock().unwrap().released = true;
        self.cond.notify_all();
    }

    /// Wait until `flush` has been entered `flushes` times
    fn wait_flushed(&self, flushes: u32) {
        let state = self.state.lock().unwrap();
        let (_state, wait) = self
            .cond
            .wait_timeout_while(state, STEP_TIMEOUT, |s| s.flushes < flushes)
            .unwrap();
        assert!(!wait.timed_out(), "sensor flush never started");
    }

    fn set_hold_flush(&self, hold: bool) {
        self.state.lock().unwrap().hold_flush = hold;
        self.cond.notify_all();
    }

    fn dispatched_frames(&self) -> Vec<u32> {
        let state = self.state.lock().unwrap();
        state.dispatched.iter().map(|d| d.frame_number).collect()
    }
}

impl SensorEngine for FakeSensor {
    fn set_current_request(
        &self,
        settings: SensorSettings,
        result: PipelineResult,
        _input_buffers: Option<Buffers>,
        output_buffers: Buffers,
    ) {
        self.state.lock().unwrap().dispatched.push(Dispatch {
            frame_number: result.frame_number,
            settings,
            outputs: output_buffers.len(),
        });
    }

    // The timeout is ignored so the worker never advances on its own
    fn wait_for_vsync(&self, _timeout: Duration) -> bool {
        let mut state = self.state.lock().unwrap();
        state.parks += 1;
        self.cond.notify_all();

        let mut state = self
            .cond
            .wait_while(state, |s| s.grants == 0 && !s.released)
            .unwrap();
        if state.grants > 0 {
            state.grants -= 1;
        }
        true
    }

    fn flush(&self) -> ProcessorResult<()> {
        let mut state = self.state.lock().unwrap();
        state.flushes += 1;
        self.cond.notify_all();
        drop(self.cond.wait_while(state, |s| s.hold_flush).unwrap());
        Ok(())
    }

    fn shut_down(&self) -> ProcessorResult<()> {
        let mut state = self.state.lock().unwrap();
        state.shut_down = true;
        state.released = true;
        self.cond.notify_all();
        Ok(())
    }
}

struct Harness {
    sensor: Arc<FakeSensor>,
    processor: RequestProcessor,
    events: Receiver<PipelineEvent>,
    pipelines: Vec<Pipeline>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        // Unpark the worker so the processor can join it
        self.sensor.release();
    }
}

fn stream(id: u32) -> StreamDescriptor {
    StreamDescriptor {
        id,
        width: 8,
        height: 8,
        format: PixelFormat::Rgba8888,
        dataspace: Dataspace::Unknown,
        buffer_size: 0,
        producer_usage: 0,
        is_input: false,
    }
}

fn harness(pipeline_depth: usize, max_frame_duration: Duration) -> Harness {
    let sensor = Arc::new(FakeSensor::default());
    let config = ProcessorConfig {
        pipeline_depth,
        max_frame_duration_ns: max_frame_duration.as_nanos() as u64,
        ..Default::default()
    };

    let processor = RequestProcessor::new(
        config,
        sensor.clone(),
        Arc::new(HeapBufferImporter::new()),
        Box::new(EmulatedRequestState::new(0)),
    )
    .unwrap();
    processor
        .initialize(StaticCharacteristics::default())
        .unwrap();

    // First tick finds an empty queue and parks
    sensor.wait_parked(0);

    let (callback, events) = ChannelCallback::new();
    let pipelines = vec![Pipeline {
        id: 0,
        physical_camera_id: 0,
        callback,
        streams: HashMap::from([(0, stream(0)), (1, stream(1))]),
    }];

    Harness {
        sensor,
        processor,
        events,
        pipelines,
    }
}

fn output() -> StreamBuffer {
    // 8x8 RGBA: stride 32, size 256
    StreamBuffer::new(0, BufferHandle::allocate(256))
}

fn request(settings: Option<CaptureSettings>) -> CaptureRequest {
    CaptureRequest {
        pipeline_id: 0,
        settings,
        input_buffers: Vec::new(),
        output_buffers: vec![output()],
    }
}

impl Harness {
    fn preview(&self) -> CaptureSettings {
        self.processor
            .get_default_request(RequestTemplate::Preview)
            .unwrap()
    }

    fn manual(&self, sensitivity: i32) -> CaptureSettings {
        let mut settings = self
            .processor
            .get_default_request(RequestTemplate::Manual)
            .unwrap();
        settings.sensitivity = Some(sensitivity);
        settings
    }

    fn submit(&self, frame_number: u32, requests: &[CaptureRequest]) -> ProcessorResult<()> {
        self.processor
            .process_requests(frame_number, requests, &self.pipelines)
    }

    fn next_message(&self) -> (u32, NotifyMessage) {
        match self.events.recv_timeout(STEP_TIMEOUT).unwrap() {
            PipelineEvent::Notify {
                pipeline_id,
                message,
            } => (pipeline_id, message),
            other => panic!("unexpected event {:?}", other),
        }
    }
}

#[test]
fn test_batch_below_capacity_is_admitted() {
    let h = harness(4, STEP_TIMEOUT);
    let settings = h.preview();

    h.submit(1, &[request(Some(settings)), request(None)])
        .unwrap();
    assert_eq!(h.processor.queue_len(), 2);

    h.submit(2, &[request(None)]).unwrap();
    assert_eq!(
        h.processor.queue_len(),
        3,
        "Queue should grow by exactly the batch size"
    );
}

#[test]
fn test_out_of_range_pipeline_is_rejected() {
    let h = harness(4, STEP_TIMEOUT);
    let mut bad = request(None);
    bad.pipeline_id = 3;

    let err = h.submit(1, &[bad]).unwrap_err();
    assert!(matches!(err, ProcessorError::InvalidArgument(_)));
    assert_eq!(h.processor.queue_len(), 0);
}

#[test]
fn test_batch_stops_at_out_of_range_pipeline() {
    let h = harness(4, STEP_TIMEOUT);
    let mut bad = request(None);
    bad.pipeline_id = 3;

    let err = h
        .submit(1, &[request(Some(h.preview())), bad, request(None)])
        .unwrap_err();
    assert!(matches!(err, ProcessorError::InvalidArgument(_)));
    assert_eq!(
        h.processor.queue_len(),
        1,
        "Items before the failing one stay queued, later ones are not admitted"
    );
}

#[test]
fn test_request_without_outputs_is_rejected() {
    let h = harness(4, STEP_TIMEOUT);
    let mut empty = request(None);
    empty.output_buffers.clear();

    assert!(matches!(
        h.submit(1, &[empty]),
        Err(ProcessorError::InvalidArgument(_))
    ));
    assert_eq!(h.processor.queue_len(), 0);
}

#[test]
fn test_full_queue_times_out() {
    let bound = Duration::from_millis(150);
    let h = harness(2, bound);
    let settings = h.preview();

    h.submit(1, &[request(Some(settings.clone())), request(None)])
        .unwrap();

    let start = Instant::now();
    let err = h.submit(2, &[request(None)]).unwrap_err();
    assert_eq!(err, ProcessorError::Timeout);
    assert!(start.elapsed() >= bound);
    assert_eq!(h.processor.queue_len(), 2, "Queue should be unchanged");
}

#[test]
fn test_batch_timeout_keeps_admitted_prefix() {
    let bound = Duration::from_millis(150);
    let h = harness(3, bound);
    h.submit(1, &[request(Some(h.preview())), request(None)])
        .unwrap();

    // The worker stays parked, so the second item never finds a slot
    let err = h.submit(2, &[request(None), request(None)]).unwrap_err();
    assert_eq!(err, ProcessorError::Timeout);
    assert_eq!(h.processor.queue_len(), 3);
}

#[test]
fn test_full_queue_admits_after_worker_pop() {
    let h = harness(2, STEP_TIMEOUT);
    let settings = h.preview();
    h.submit(1, &[request(Some(settings)), request(None)])
        .unwrap();

    let sensor = Arc::clone(&h.sensor);
    let ticker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        sensor.step();
    });

    h.submit(2, &[request(None)]).unwrap();
    ticker.join().unwrap();

    assert_eq!(h.processor.queue_len(), 2);
    assert_eq!(h.sensor.dispatched_frames(), vec![1]);
}

#[test]
fn test_omitted_settings_repeat_last_settings() {
    let h = harness(4, STEP_TIMEOUT);

    h.submit(1, &[request(Some(h.manual(400)))]).unwrap();
    h.submit(2, &[request(None)]).unwrap();
    h.submit(3, &[request(Some(h.manual(800)))]).unwrap();
    h.submit(4, &[request(None)]).unwrap();

    for _ in 0..4 {
        h.sensor.step();
    }

    let state = h.sensor.state.lock().unwrap();
    let frames: Vec<u32> = state.dispatched.iter().map(|d| d.frame_number).collect();
    let iso: Vec<i32> = state.dispatched.iter().map(|d| d.settings.sensitivity).collect();
    assert_eq!(frames, vec![1, 2, 3, 4]);
    assert_eq!(iso, vec![400, 400, 800, 800]);
    assert!(h.events.try_recv().is_err(), "No errors expected");
}

#[test]
fn test_first_request_without_settings_reports_result_error() {
    let h = harness(4, STEP_TIMEOUT);

    h.submit(7, &[request(None)]).unwrap();
    h.sensor.step();

    let (pipeline_id, message) = h.next_message();
    assert_eq!(pipeline_id, 0);
    assert_eq!(message, NotifyMessage::error(7, ErrorCode::Result));
    assert!(h.sensor.dispatched_frames().is_empty());

    // The worker keeps running
    h.submit(8, &[request(Some(h.preview()))]).unwrap();
    h.sensor.step();
    assert_eq!(h.sensor.dispatched_frames(), vec![8]);
}

#[test]
fn test_flush_fails_pending_requests_in_order() {
    let h = harness(4, STEP_TIMEOUT);
    let settings = h.preview();

    h.submit(10, &[request(Some(settings))]).unwrap();
    h.submit(11, &[request(None)]).unwrap();
    h.submit(12, &[request(None)]).unwrap();

    h.processor.flush().unwrap();
    assert_eq!(h.processor.queue_len(), 0);

    for expected in [10, 11, 12] {
        let (_, message) = h.next_message();
        assert_eq!(message, NotifyMessage::error(expected, ErrorCode::Request));
    }
    assert!(h.events.try_recv().is_err());
    assert_eq!(h.sensor.state.lock().unwrap().flushes, 1);

    // Flushing an empty queue is a no-op
    h.processor.flush().unwrap();
    assert!(h.events.try_recv().is_err());
}

#[test]
fn test_admission_waits_for_flush_to_drain() {
    let h = harness(4, STEP_TIMEOUT);
    h.submit(10, &[request(Some(h.preview()))]).unwrap();
    h.sensor.set_hold_flush(true);

    let processor = &h.processor;
    let pipelines = &h.pipelines;
    thread::scope(|s| {
        let flusher = s.spawn(|| processor.flush());
        h.sensor.wait_flushed(1);

        let submitter = s.spawn(|| processor.process_requests(11, &[request(None)], pipelines));
        thread::sleep(Duration::from_millis(50));
        h.sensor.set_hold_flush(false);

        flusher.join().unwrap().unwrap();
        submitter.join().unwrap().unwrap();
    });

    // Only the request queued before the flush is failed
    let (_, message) = h.next_message();
    assert_eq!(message, NotifyMessage::error(10, ErrorCode::Request));
    assert!(h.events.try_recv().is_err());
    assert_eq!(h.processor.queue_len(), 1);
}

#[test]
fn test_unsignaled_fence_yields_result_error() {
    let h = harness(4, Duration::from_millis(100));
    let handle = BufferHandle::allocate(256);
    let fence = Arc::new(Fence::new());

    let mut req = request(Some(h.preview()));
    req.output_buffers = vec![StreamBuffer::new(0, handle.clone()).with_fence(fence)];
    h.submit(21, &[req]).unwrap();
    assert!(handle.is_locked());

    h.sensor.step();

    let (_, message) = h.next_message();
    assert_eq!(message, NotifyMessage::error(21, ErrorCode::Result));
    assert!(h.sensor.dispatched_frames().is_empty());
    assert!(!handle.is_locked(), "Dropped buffer should be unlocked");
}

#[test]
fn test_fence_timeout_only_drops_affected_buffer() {
    let h = harness(4, Duration::from_millis(100));

    let mut req = request(Some(h.preview()));
    req.output_buffers = vec![
        StreamBuffer::new(0, BufferHandle::allocate(256)).with_fence(Arc::new(Fence::new())),
        StreamBuffer::new(1, BufferHandle::allocate(256)).with_fence(Arc::new(Fence::signaled())),
    ];
    h.submit(30, &[req]).unwrap();
    h.sensor.step();

    let state = h.sensor.state.lock().unwrap();
    assert_eq!(state.dispatched.len(), 1);
    assert_eq!(state.dispatched[0].frame_number, 30);
    assert_eq!(state.dispatched[0].outputs, 1);
}

#[test]
fn test_unresolvable_buffers_yield_result_error() {
    let h = harness(4, STEP_TIMEOUT);

    // Unknown stream and an allocation too small to lock
    let mut req = request(Some(h.preview()));
    req.output_buffers = vec![
        StreamBuffer::new(9, BufferHandle::allocate(256)),
        StreamBuffer::new(0, BufferHandle::allocate(16)),
    ];
    h.submit(40, &[req]).unwrap();
    assert_eq!(h.processor.queue_len(), 1);

    h.sensor.step();

    let (_, message) = h.next_message();
    assert_eq!(message, NotifyMessage::error(40, ErrorCode::Result));
    assert!(h.sensor.dispatched_frames().is_empty());
}

#[test]
fn test_stop_shuts_down_sensor() {
    let mut h = harness(4, STEP_TIMEOUT);
    assert!(h.processor.is_running());

    h.sensor.release();
    h.processor.stop().unwrap();

    assert!(!h.processor.is_running());
    assert!(h.sensor.state.lock().unwrap().shut_down);
}
