// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for the emulated camera pipeline

use super::fence::{AcquireFence, FenceHandle};
use super::importer::{BufferHandle, BufferImporter, MappedRegion};
use super::notify::PipelineCallback;
use super::request_state::CaptureSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Pixel formats understood by the emulated sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Packed 24-bit RGB (3 bytes per pixel)
    Rgb888,
    /// Packed 32-bit RGBA (4 bytes per pixel)
    Rgba8888,
    /// 16-bit single channel, used for depth maps
    Y16,
    /// Opaque byte blob (JPEG output)
    Blob,
    /// 16-bit Bayer raw sensor data
    Raw16,
    /// Flexible planar YCbCr 4:2:0
    YCbCr420,
    /// Gralloc-chosen layout; only meaningful for input streams
    ImplementationDefined,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 7] = [
        PixelFormat::Rgb888,
        PixelFormat::Rgba8888,
        PixelFormat::Y16,
        PixelFormat::Blob,
        PixelFormat::Raw16,
        PixelFormat::YCbCr420,
        PixelFormat::ImplementationDefined,
    ];

    /// Planar formats are locked as three separate planes
    pub fn is_planar(&self) -> bool {
        matches!(self, Self::YCbCr420)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Rgb888 => "rgb888",
            Self::Rgba8888 => "rgba8888",
            Self::Y16 => "y16",
            Self::Blob => "blob",
            Self::Raw16 => "raw16",
            Self::YCbCr420 => "ycbcr420",
            Self::ImplementationDefined => "implementation-defined",
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.name() == lower)
            .ok_or_else(|| format!("unknown pixel format '{}'", s))
    }
}

/// Color space / interpretation tag attached to a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Dataspace {
    #[default]
    Unknown,
    /// Depth measurements (Y16 depth maps)
    Depth,
    /// JPEG File Interchange Format
    Jfif,
    Srgb,
}

impl std::str::FromStr for Dataspace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unknown" => Ok(Self::Unknown),
            "depth" => Ok(Self::Depth),
            "jfif" => Ok(Self::Jfif),
            "srgb" => Ok(Self::Srgb),
            _ => Err(format!("unknown dataspace '{}'", s)),
        }
    }
}

/// A configured stream of a pipeline
///
/// Immutable for the lifetime of a pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub id: u32,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub dataspace: Dataspace,
    /// Declared buffer size, only used by blob streams
    pub buffer_size: u32,
    pub producer_usage: u64,
    pub is_input: bool,
}

/// Rectangle handed to planar locks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Completion status carried back to the client with each buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferStatus {
    Ok,
    #[default]
    Error,
}

/// A client buffer attached to a capture request
#[derive(Debug, Clone)]
pub struct StreamBuffer {
    pub stream_id: u32,
    pub buffer: BufferHandle,
    /// Producer fence that must signal before the buffer may be touched
    pub acquire_fence: Option<FenceHandle>,
    pub status: BufferStatus,
}

impl StreamBuffer {
    pub fn new(stream_id: u32, buffer: BufferHandle) -> Self {
        Self {
            stream_id,
            buffer,
            acquire_fence: None,
            status: BufferStatus::Error,
        }
    }

    pub fn with_fence(mut self, fence: FenceHandle) -> Self {
        self.acquire_fence = Some(fence);
        self
    }
}

/// Error codes carried by error notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The device is in an unrecoverable state
    Device,
    /// The whole request failed, no result metadata or buffers will follow
    Request,
    /// Result metadata for the frame will not be produced
    Result,
    /// A single buffer failed
    Buffer,
}

/// Error notification payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorMessage {
    pub frame_number: u32,
    /// `None` when the error is not tied to a particular stream
    pub error_stream_id: Option<u32>,
    pub error_code: ErrorCode,
}

/// Message delivered through a pipeline's notification callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyMessage {
    Error(ErrorMessage),
    Shutter { frame_number: u32, timestamp_ns: u64 },
}

impl NotifyMessage {
    /// Error not tied to a stream
    pub fn error(frame_number: u32, error_code: ErrorCode) -> Self {
        NotifyMessage::Error(ErrorMessage {
            frame_number,
            error_stream_id: None,
            error_code,
        })
    }
}

/// Default request templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestTemplate {
    Preview,
    StillCapture,
    VideoRecord,
    VideoSnapshot,
    ZeroShutterLag,
    Manual,
}

impl RequestTemplate {
    pub const ALL: [RequestTemplate; 6] = [
        RequestTemplate::Preview,
        RequestTemplate::StillCapture,
        RequestTemplate::VideoRecord,
        RequestTemplate::VideoSnapshot,
        RequestTemplate::ZeroShutterLag,
        RequestTemplate::Manual,
    ];

    pub fn index(&self) -> usize {
        match self {
            Self::Preview => 0,
            Self::StillCapture => 1,
            Self::VideoRecord => 2,
            Self::VideoSnapshot => 3,
            Self::ZeroShutterLag => 4,
            Self::Manual => 5,
        }
    }
}

/// A configured set of streams sharing one callback
#[derive(Clone)]
pub struct Pipeline {
    pub id: u32,
    pub physical_camera_id: u32,
    pub callback: Arc<dyn PipelineCallback>,
    /// stream id -> stream
    pub streams: HashMap<u32, StreamDescriptor>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("physical_camera_id", &self.physical_camera_id)
            .field("streams", &self.streams)
            .finish_non_exhaustive()
    }
}

/// One capture request targeting a single pipeline
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub pipeline_id: u32,
    /// `None` repeats the settings of the last request that carried any
    pub settings: Option<CaptureSettings>,
    pub input_buffers: Vec<StreamBuffer>,
    pub output_buffers: Vec<StreamBuffer>,
}

/// Parameters consumed by the sensor for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSettings {
    pub exposure_time_ns: u64,
    pub frame_duration_ns: u64,
    pub sensitivity: i32,
}

/// Per-frame result record handed to the sensor and returned to the client
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub camera_id: u32,
    pub pipeline_id: u32,
    pub frame_number: u32,
    pub result_metadata: CaptureSettings,
    pub pipeline_depth: u8,
    pub output_buffers: Vec<StreamBuffer>,
    pub input_buffers: Vec<StreamBuffer>,
    pub partial_result: u32,
}

/// CPU-visible memory of a locked buffer
#[derive(Debug, Clone)]
pub enum Plane {
    /// Packed formats and blobs
    Single {
        img: MappedRegion,
        stride: u32,
        buffer_size: u32,
    },
    /// Planar YCbCr 4:2:0
    YCbCr {
        y: MappedRegion,
        cb: MappedRegion,
        cr: MappedRegion,
        y_stride: u32,
        cbcr_stride: u32,
        cbcr_step: u32,
    },
}

/// A client buffer resolved for the sensor: locked, sized and fence-imported
///
/// The status of the underlying stream buffer stays `Error` until the sensor
/// marks it as filled. Dropping the buffer releases the CPU lock.
pub struct SensorBuffer {
    pub frame_number: u32,
    pub pipeline_id: u32,
    pub camera_id: u32,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub dataspace: Dataspace,
    pub is_input: bool,
    pub plane: Plane,
    pub stream_buffer: StreamBuffer,
    pub acquire_fence: Option<AcquireFence>,
    pub callback: Arc<dyn PipelineCallback>,
    pub(crate) importer: Arc<dyn BufferImporter>,
}

impl SensorBuffer {
    /// Mark the buffer as successfully filled
    pub fn mark_ok(&mut self) {
        self.stream_buffer.status = BufferStatus::Ok;
    }

    pub fn status(&self) -> BufferStatus {
        self.stream_buffer.status
    }
}

impl Drop for SensorBuffer {
    fn drop(&mut self) {
        self.importer.unlock(&self.stream_buffer.buffer);
    }
}

impl std::fmt::Debug for SensorBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorBuffer")
            .field("frame_number", &self.frame_number)
            .field("pipeline_id", &self.pipeline_id)
            .field("stream_id", &self.stream_buffer.stream_id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("is_input", &self.is_input)
            .field("status", &self.stream_buffer.status)
            .finish_non_exhaustive()
    }
}

/// Ordered set of resolved buffers
pub type Buffers = Vec<SensorBuffer>;
