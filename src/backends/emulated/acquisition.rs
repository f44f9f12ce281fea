// SPDX-License-Identifier: GPL-3.0-only

//! Buffer acquisition: turn client stream buffers into sensor buffers
//!
//! Each buffer is locked for CPU access with the geometry of its stream and its
//! acquire fence, if any, is imported. Buffers that cannot be resolved are left
//! out of the returned set instead of failing the whole request.

use super::geometry::buffer_geometry;
use super::importer::BufferImporter;
use super::notify::PipelineCallback;
use super::sensor::SensorEngine;
use super::types::{
    Buffers, PixelFormat, Plane, Rect, SensorBuffer, StreamBuffer, StreamDescriptor,
};
use crate::errors::{ProcessorError, ProcessorResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};

/// Identity of the frame a buffer belongs to
#[derive(Clone)]
pub struct FrameContext {
    pub frame_number: u32,
    pub pipeline_id: u32,
    pub camera_id: u32,
    pub callback: Arc<dyn PipelineCallback>,
}

/// Lock a client buffer with the layout of `stream`
fn lock_sensor_buffer(
    stream: &StreamDescriptor,
    importer: &dyn BufferImporter,
    stream_buffer: &StreamBuffer,
) -> ProcessorResult<Plane> {
    let handle = &stream_buffer.buffer;

    if stream.format == PixelFormat::YCbCr420 {
        let rect = Rect {
            left: 0,
            top: 0,
            width: stream.width,
            height: stream.height,
        };
        let layout = importer
            .lock_ycbcr(handle, stream.producer_usage, rect)
            .ok_or_else(|| {
                error!(stream_id = stream.id, "Failed to lock output buffer");
                ProcessorError::LockFailed(format!("stream {} planar lock", stream.id))
            })?;

        return Ok(Plane::YCbCr {
            y: layout.y,
            cb: layout.cb,
            cr: layout.cr,
            y_stride: layout.y_stride,
            cbcr_stride: layout.c_stride,
            cbcr_step: layout.chroma_step,
        });
    }

    let geometry = buffer_geometry(stream).inspect_err(|_| {
        error!(stream_id = stream.id, format = %stream.format, "Unsupported pixel format");
    })?;

    let img = importer
        .lock(handle, stream.producer_usage, geometry.size)
        .ok_or_else(|| {
            error!(stream_id = stream.id, "Failed to lock output buffer");
            ProcessorError::LockFailed(format!("stream {} lock of {} bytes", stream.id, geometry.size))
        })?;

    Ok(Plane::Single {
        img,
        stride: geometry.stride,
        buffer_size: geometry.size,
    })
}

/// Resolve one client buffer into a sensor buffer
///
/// Input streams are first mapped onto the format the sensor consumes. The
/// resulting buffer keeps an `Error` status; only the sensor marks it OK.
pub fn create_sensor_buffer(
    frame: &FrameContext,
    stream: &StreamDescriptor,
    stream_buffer: StreamBuffer,
    importer: &Arc<dyn BufferImporter>,
    sensor: &dyn SensorEngine,
) -> ProcessorResult<SensorBuffer> {
    let mut stream = stream.clone();
    if stream.is_input {
        stream.format = sensor.override_format(stream.format);
    }

    let plane = lock_sensor_buffer(&stream, importer.as_ref(), &stream_buffer)?;

    let mut buffer = SensorBuffer {
        frame_number: frame.frame_number,
        pipeline_id: frame.pipeline_id,
        camera_id: frame.camera_id,
        width: stream.width,
        height: stream.height,
        format: stream.format,
        dataspace: stream.dataspace,
        is_input: stream.is_input,
        plane,
        stream_buffer,
        acquire_fence: None,
        callback: Arc::clone(&frame.callback),
        importer: Arc::clone(importer),
    };
    buffer.stream_buffer.status = Default::default();

    // Dropping `buffer` on this path releases the lock taken above
    if let Some(fence) = buffer.stream_buffer.acquire_fence.as_ref() {
        match importer.import_fence(fence) {
            Some(imported) => buffer.acquire_fence = Some(imported),
            None => {
                error!(
                    frame_number = frame.frame_number,
                    stream_id = stream.id,
                    "Failed importing acquire fence"
                );
                return Err(ProcessorError::FenceImportError);
            }
        }
    }

    Ok(buffer)
}

/// Resolve a list of client buffers
///
/// Returns `None` for an empty list. Buffers referencing unknown streams or
/// failing to resolve are omitted from the result.
pub fn create_sensor_buffers(
    frame: &FrameContext,
    buffers: &[StreamBuffer],
    streams: &HashMap<u32, StreamDescriptor>,
    importer: &Arc<dyn BufferImporter>,
    sensor: &dyn SensorEngine,
) -> Option<Buffers> {
    if buffers.is_empty() {
        return None;
    }

    let mut sensor_buffers = Vec::with_capacity(buffers.len());
    for stream_buffer in buffers {
        let Some(stream) = streams.get(&stream_buffer.stream_id) else {
            warn!(
                frame_number = frame.frame_number,
                stream_id = stream_buffer.stream_id,
                "Buffer for unknown stream skipped"
            );
            continue;
        };

        match create_sensor_buffer(frame, stream, stream_buffer.clone(), importer, sensor) {
            Ok(buffer) => sensor_buffers.push(buffer),
            Err(e) => {
                warn!(
                    frame_number = frame.frame_number,
                    stream_id = stream.id,
                    error = %e,
                    "Buffer dropped from request"
                );
            }
        }
    }

    Some(sensor_buffers)
}
