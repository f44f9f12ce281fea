// SPDX-License-Identifier: GPL-3.0-only

//! Buffer import: mapping client buffers into CPU-visible memory
//!
//! The [`BufferImporter`] trait is the seam to the native buffer allocator.
//! [`HeapBufferImporter`] backs buffers with heap memory so the pipeline can be
//! driven without a graphics allocator (CLI, tests).

use super::fence::{AcquireFence, FenceHandle};
use super::types::Rect;
use crate::errors::FenceError;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Backing storage of a client buffer
#[derive(Debug)]
pub struct GraphicBuffer {
    id: u64,
    memory: Mutex<Vec<u8>>,
    lock_count: AtomicU32,
}

/// Shared handle to a client buffer
#[derive(Debug, Clone)]
pub struct BufferHandle(Arc<GraphicBuffer>);

impl BufferHandle {
    /// Allocate a zeroed buffer of `len` bytes
    pub fn allocate(len: usize) -> Self {
        Self(Arc::new(GraphicBuffer {
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            memory: Mutex::new(vec![0; len]),
            lock_count: AtomicU32::new(0),
        }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn len(&self) -> usize {
        self.0.memory.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any CPU lock is outstanding on this buffer
    pub fn is_locked(&self) -> bool {
        self.0.lock_count.load(Ordering::Acquire) > 0
    }

    /// Copy of the current buffer contents
    pub fn contents(&self) -> Vec<u8> {
        self.0.memory.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// A byte range of a locked buffer
#[derive(Debug, Clone)]
pub struct MappedRegion {
    buffer: BufferHandle,
    offset: usize,
    len: usize,
}

impl MappedRegion {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Run `f` with mutable access to the mapped bytes
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut memory = self.buffer.0.memory.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut memory[self.offset..self.offset + self.len])
    }

    pub fn fill(&self, value: u8) {
        self.with_bytes_mut(|bytes| bytes.fill(value));
    }
}

/// Plane layout returned by a planar YCbCr lock
#[derive(Debug, Clone)]
pub struct YCbCrLayout {
    pub y: MappedRegion,
    pub cb: MappedRegion,
    pub cr: MappedRegion,
    pub y_stride: u32,
    pub c_stride: u32,
    pub chroma_step: u32,
}

/// Native buffer-import subsystem
pub trait BufferImporter: Send + Sync {
    /// Lock `size` bytes of a single-plane buffer; `None` on failure
    fn lock(&self, buffer: &BufferHandle, usage: u64, size: u32) -> Option<MappedRegion>;

    /// Lock the three planes of a YCbCr 4:2:0 buffer; `None` if any plane is missing
    fn lock_ycbcr(&self, buffer: &BufferHandle, usage: u64, rect: Rect) -> Option<YCbCrLayout>;

    /// Release one CPU lock
    fn unlock(&self, buffer: &BufferHandle);

    /// Duplicate a client fence into an internal descriptor
    fn import_fence(&self, fence: &FenceHandle) -> Option<AcquireFence>;

    /// Block until the fence signals or `timeout_ms` elapses
    fn wait_fence(&self, fence: &AcquireFence, timeout_ms: u64) -> Result<(), FenceError>;
}

/// Importer over heap-allocated [`BufferHandle`]s
#[derive(Debug, Default)]
pub struct HeapBufferImporter;

impl HeapBufferImporter {
    pub fn new() -> Self {
        Self
    }

    fn region(buffer: &BufferHandle, offset: usize, len: usize) -> MappedRegion {
        MappedRegion {
            buffer: buffer.clone(),
            offset,
            len,
        }
    }
}

impl BufferImporter for HeapBufferImporter {
    fn lock(&self, buffer: &BufferHandle, usage: u64, size: u32) -> Option<MappedRegion> {
        let available = buffer.len();
        if size == 0 || (size as usize) > available {
            warn!(
                buffer_id = buffer.id(),
                size, available, "Lock request exceeds buffer allocation"
            );
            return None;
        }

        buffer.0.lock_count.fetch_add(1, Ordering::AcqRel);
        debug!(buffer_id = buffer.id(), usage, size, "Locked buffer");
        Some(Self::region(buffer, 0, size as usize))
    }

    fn lock_ycbcr(&self, buffer: &BufferHandle, usage: u64, rect: Rect) -> Option<YCbCrLayout> {
        let y_stride = rect.width as usize;
        let c_stride = rect.width.div_ceil(2) as usize;
        let c_height = rect.height.div_ceil(2) as usize;
        let y_size = y_stride * rect.height as usize;
        let c_size = c_stride * c_height;

        if y_size == 0 || y_size + 2 * c_size > buffer.len() {
            warn!(
                buffer_id = buffer.id(),
                width = rect.width,
                height = rect.height,
                "Planar lock exceeds buffer allocation"
            );
            return None;
        }

        buffer.0.lock_count.fetch_add(1, Ordering::AcqRel);
        debug!(buffer_id = buffer.id(), usage, "Locked YCbCr buffer");
        Some(YCbCrLayout {
            y: Self::region(buffer, 0, y_size),
            cb: Self::region(buffer, y_size, c_size),
            cr: Self::region(buffer, y_size + c_size, c_size),
            y_stride: y_stride as u32,
            c_stride: c_stride as u32,
            chroma_step: 1,
        })
    }

    fn unlock(&self, buffer: &BufferHandle) {
        let _ = buffer
            .0
            .lock_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn import_fence(&self, fence: &FenceHandle) -> Option<AcquireFence> {
        if fence.is_closed() {
            return None;
        }
        Some(AcquireFence::new(Arc::clone(fence)))
    }

    fn wait_fence(&self, fence: &AcquireFence, timeout_ms: u64) -> Result<(), FenceError> {
        fence.wait(Duration::from_millis(timeout_ms))
    }
}

/// Buffer size that satisfies [`HeapBufferImporter::lock_ycbcr`] for a frame
pub fn ycbcr420_allocation_size(width: u32, height: u32) -> usize {
    let y = width as usize * height as usize;
    let c = width.div_ceil(2) as usize * height.div_ceil(2) as usize;
    y + 2 * c
}
