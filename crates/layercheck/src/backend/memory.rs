//! Host-resident device buffers with per-device allocation accounting.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Counts live allocations made by one device instance.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    outstanding: AtomicUsize,
    outstanding_bytes: AtomicUsize,
    total_allocations: AtomicUsize,
}

impl MemoryTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of buffers allocated and not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding_bytes.load(Ordering::SeqCst)
    }

    /// Number of buffers ever allocated.
    pub fn total_allocations(&self) -> usize {
        self.total_allocations.load(Ordering::SeqCst)
    }

    fn acquire(&self, bytes: usize) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        self.outstanding_bytes.fetch_add(bytes, Ordering::SeqCst);
        self.total_allocations.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self, bytes: usize) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        self.outstanding_bytes.fetch_sub(bytes, Ordering::SeqCst);
    }
}

struct DeviceBuffer {
    data: Mutex<Vec<u8>>,
    len: usize,
    tracker: Arc<MemoryTracker>,
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.tracker.release(self.len);
    }
}

/// Owned handle to one device allocation.
///
/// Clones share the allocation; the bytes are released when the last clone
/// is dropped, which lets queued commands keep a buffer alive until they run.
#[derive(Clone)]
pub struct BlobMemory {
    buffer: Arc<DeviceBuffer>,
}

impl BlobMemory {
    pub fn zeroed(bytes: usize, tracker: Arc<MemoryTracker>) -> Self {
        tracker.acquire(bytes);
        Self {
            buffer: Arc::new(DeviceBuffer {
                data: Mutex::new(vec![0u8; bytes]),
                len: bytes,
                tracker,
            }),
        }
    }

    pub fn byte_len(&self) -> usize {
        self.buffer.len
    }

    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self
            .buffer
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self
            .buffer
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl fmt::Debug for BlobMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobMemory")
            .field("bytes", &self.buffer.len)
            .finish()
    }
}
