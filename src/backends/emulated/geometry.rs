// SPDX-License-Identifier: GPL-3.0-only

//! Buffer geometry for single-plane formats
//!
//! Maps a stream's pixel format and dataspace to the row stride and total
//! byte size the sensor writes. Planar YCbCr buffers are not handled here,
//! their layout comes from the planar lock.
//!
//! The RGB, RGBA and RAW16 sizes are `stride * width`, not `stride * height`.
//! This matches the layout existing clients were built against; for non-square
//! streams the locked size therefore differs from the frame size.

use super::types::{Dataspace, PixelFormat, StreamDescriptor};
use crate::constants::align_to;
use crate::errors::{ProcessorError, ProcessorResult};

/// Row stride and total size of a single-plane buffer, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferGeometry {
    pub stride: u32,
    pub size: u32,
}

/// Resolve the geometry of a stream's buffers
pub fn buffer_geometry(stream: &StreamDescriptor) -> ProcessorResult<BufferGeometry> {
    resolve(
        stream.format,
        stream.dataspace,
        stream.width,
        stream.height,
        stream.buffer_size,
    )
}

/// Resolve geometry from raw stream parameters
///
/// Dimensions whose stride or size do not fit in `u32` are `Unsupported`.
pub fn resolve(
    format: PixelFormat,
    dataspace: Dataspace,
    width: u32,
    height: u32,
    buffer_size: u32,
) -> ProcessorResult<BufferGeometry> {
    let too_large = || {
        ProcessorError::Unsupported(format!(
            "{}x{} {} buffer exceeds the addressable size",
            width, height, format
        ))
    };
    // Stride of `bytes_per_pixel`, size of `stride * width`
    let packed = |bytes_per_pixel: u32| {
        let stride = width.checked_mul(bytes_per_pixel).ok_or_else(too_large)?;
        let size = stride.checked_mul(width).ok_or_else(too_large)?;
        Ok::<_, ProcessorError>(BufferGeometry { stride, size })
    };

    let geometry = match format {
        PixelFormat::Rgb888 => packed(3)?,
        PixelFormat::Rgba8888 => packed(4)?,
        PixelFormat::Y16 if dataspace == Dataspace::Depth => {
            let stride = align_to(width, 2)
                .and_then(|w| w.checked_mul(2))
                .and_then(|bytes| align_to(bytes, 16))
                .ok_or_else(too_large)?;
            let size = align_to(height, 2)
                .and_then(|h| stride.checked_mul(h))
                .ok_or_else(too_large)?;
            BufferGeometry { stride, size }
        }
        PixelFormat::Blob if dataspace == Dataspace::Jfif => BufferGeometry {
            stride: buffer_size,
            size: buffer_size,
        },
        PixelFormat::Raw16 => packed(2)?,
        _ => {
            return Err(ProcessorError::Unsupported(format!(
                "pixel format {} with dataspace {:?}",
                format, dataspace
            )));
        }
    };

    Ok(geometry)
}
