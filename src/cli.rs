// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for the emulated camera
//!
//! - Running a capture session against the simulated sensor
//! - Printing default request templates
//! - Resolving buffer geometry

use emulated_camera::backends::emulated::geometry::{self, buffer_geometry};
use emulated_camera::backends::emulated::importer::ycbcr420_allocation_size;
use emulated_camera::backends::emulated::{
    BufferHandle, CameraSession, CaptureRequest, ChannelCallback, Dataspace, EmulatedRequestState,
    ErrorMessage, HeapBufferImporter, NotifyMessage, PipelineEvent, PixelFormat, RequestState,
    RequestTemplate, SimulatedSensor, StaticCharacteristics, StreamBuffer, StreamDescriptor,
};
use emulated_camera::config::ProcessorConfig;
use emulated_camera::errors::AppError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

const PREVIEW_WIDTH: u32 = 320;
const PREVIEW_HEIGHT: u32 = 240;

/// How long to wait for outstanding frames once all requests are submitted
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn load_characteristics(path: Option<&Path>) -> Result<StaticCharacteristics, AppError> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        }
        None => Ok(StaticCharacteristics::default()),
    }
}

fn preview_streams() -> Vec<StreamDescriptor> {
    let stream = |id, format| StreamDescriptor {
        id,
        width: PREVIEW_WIDTH,
        height: PREVIEW_HEIGHT,
        format,
        dataspace: Dataspace::Unknown,
        buffer_size: 0,
        producer_usage: 0,
        is_input: false,
    };
    vec![stream(0, PixelFormat::Rgba8888), stream(1, PixelFormat::YCbCr420)]
}

/// Allocate one buffer per stream, sized for the stream's layout
fn allocate_buffers(session: &CameraSession, pipeline_id: u32) -> Result<Vec<StreamBuffer>, AppError> {
    let streams = session.configured_streams(pipeline_id)?;
    let mut ids: Vec<u32> = streams.keys().copied().collect();
    ids.sort_unstable();

    ids.into_iter()
        .filter_map(|id| streams.get(&id))
        .map(|stream| {
            let len = if stream.format.is_planar() {
                ycbcr420_allocation_size(stream.width, stream.height)
            } else {
                buffer_geometry(stream)?.size as usize
            };
            Ok::<_, AppError>(StreamBuffer::new(stream.id, BufferHandle::allocate(len)))
        })
        .collect()
}

#[derive(Default)]
struct CaptureStats {
    results: u32,
    errors: u32,
}

impl CaptureStats {
    fn finished(&self) -> u32 {
        self.results + self.errors
    }

    fn record(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::Notify {
                message: NotifyMessage::Shutter {
                    frame_number,
                    timestamp_ns,
                },
                ..
            } => {
                println!("  frame {:>4}  shutter at {} ns", frame_number, timestamp_ns);
            }
            PipelineEvent::Notify {
                message:
                    NotifyMessage::Error(ErrorMessage {
                        frame_number,
                        error_code,
                        ..
                    }),
                ..
            } => {
                println!("  frame {:>4}  {:?} error", frame_number, error_code);
                self.errors += 1;
            }
            PipelineEvent::Result(result) => {
                let metadata = &result.result_metadata;
                println!(
                    "  frame {:>4}  {} buffer(s), exposure {} ns, iso {}",
                    result.frame_number,
                    result.output_buffers.len(),
                    metadata.exposure_time_ns.unwrap_or_default(),
                    metadata.sensitivity.unwrap_or_default(),
                );
                self.results += 1;
            }
        }
    }

    fn drain(&mut self, events: &Receiver<PipelineEvent>) {
        while let Ok(event) = events.try_recv() {
            self.record(event);
        }
    }
}

/// Run a capture session against the simulated sensor
pub fn run_capture(
    frames: u32,
    config_path: Option<PathBuf>,
    characteristics_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ProcessorConfig::load_or_default(config_path.as_deref());
    let characteristics = load_characteristics(characteristics_path.as_deref())?;

    let sensor = Arc::new(SimulatedSensor::new(config.min_frame_duration())?);
    let request_state = Box::new(EmulatedRequestState::new(config.camera_id));
    let mut session = CameraSession::new(
        config.clone(),
        characteristics,
        sensor.clone(),
        Arc::new(HeapBufferImporter::new()),
        request_state,
    )?;

    let (callback, events) = ChannelCallback::new();
    let pipeline_id = session.configure_pipeline(config.camera_id, callback, preview_streams())?;
    session.build_pipelines()?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })?;

    let settings = session.construct_default_request_settings(RequestTemplate::Preview)?;
    println!(
        "Capturing {} frame(s) at {}x{} (Ctrl+C to stop)",
        frames, PREVIEW_WIDTH, PREVIEW_HEIGHT
    );

    let mut stats = CaptureStats::default();
    let mut submitted = 0;
    for frame_number in 0..frames {
        if stop.load(Ordering::SeqCst) {
            println!("Interrupted, flushing pending requests");
            session.flush()?;
            break;
        }

        let request = CaptureRequest {
            pipeline_id,
            // Later requests repeat the last settings
            settings: (frame_number == 0).then(|| settings.clone()),
            input_buffers: Vec::new(),
            output_buffers: allocate_buffers(&session, pipeline_id)?,
        };
        session.submit_requests(frame_number, &[request])?;
        submitted += 1;
        stats.drain(&events);
    }

    while stats.finished() < submitted {
        match events.recv_timeout(DRAIN_TIMEOUT) {
            Ok(event) => stats.record(event),
            Err(RecvTimeoutError::Timeout) => {
                eprintln!("Timed out waiting for {} frame(s)", submitted - stats.finished());
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    println!();
    println!(
        "Submitted {}, completed {}, failed {}, sensor frames {}",
        submitted,
        stats.results,
        stats.errors,
        sensor.frames_captured()
    );

    session.close()?;
    Ok(())
}

/// Print each default request template as JSON
pub fn print_templates(characteristics_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let characteristics = load_characteristics(characteristics_path.as_deref())?;
    let mut request_state = EmulatedRequestState::new(0);
    request_state.initialize(characteristics)?;

    for template in RequestTemplate::ALL {
        match request_state.default_request(template) {
            Ok(settings) => {
                println!("{:?}:", template);
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
            Err(e) => println!("{:?}: unavailable ({})", template, e),
        }
    }

    Ok(())
}

/// Print the stride and size of a single-plane stream
pub fn print_geometry(
    format: PixelFormat,
    width: u32,
    height: u32,
    dataspace: Dataspace,
    buffer_size: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let geometry = geometry::resolve(format, dataspace, width, height, buffer_size)?;

    println!("Format:   {} ({:?})", format, dataspace);
    println!("Size:     {}x{}", width, height);
    println!("Stride:   {} bytes", geometry.stride);
    println!("Buffer:   {} bytes", geometry.size);

    Ok(())
}
