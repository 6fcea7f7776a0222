//! Refcounted data buffers.
//!
//! A [`Buffer`] pairs shared backing storage with per-handle bookkeeping:
//! how many bytes are used, a capture timestamp, a line offset for partial
//! frames, and a sequence number. Cloning a buffer is cheap - storage is
//! shared, bookkeeping is copied.
//!
//! Pool-backed storage returns its slot to the owning pool when the last
//! handle drops; see [`SlotPool`](crate::pool::SlotPool).

use crate::clock::ClockTime;
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::sync::Arc;

/// Backing storage for a buffer.
///
/// Implementations hand out raw pointers; [`Buffer`] builds slices on top.
/// Storage that cannot be written (for example a read-only mapping)
/// returns `None` from `as_mut_ptr`.
pub trait BufferStorage: Send + Sync {
    /// Pointer to the first byte.
    fn as_ptr(&self) -> *const u8;

    /// Mutable pointer to the first byte, if the storage is writable.
    fn as_mut_ptr(&self) -> Option<*mut u8>;

    /// Capacity in bytes.
    fn len(&self) -> usize;

    /// Check for zero capacity.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Plain heap storage, zero-initialized at allocation.
pub struct HeapStorage {
    ptr: *mut u8,
    layout: Layout,
}

impl HeapStorage {
    /// Allocate `size` zeroed bytes with the given alignment.
    ///
    /// Returns `None` when the layout is invalid or the allocation fails.
    pub fn new(size: usize, align: usize) -> Option<Self> {
        let layout = Layout::from_size_align(size.max(1), align.max(1)).ok()?;
        // Zeroed so an unfilled buffer never leaks stale bytes.
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return None;
        }
        Some(Self { ptr, layout })
    }
}

impl BufferStorage for HeapStorage {
    fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    fn as_mut_ptr(&self) -> Option<*mut u8> {
        Some(self.ptr)
    }

    fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for HeapStorage {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

// The allocation is owned and only reachable through this storage.
unsafe impl Send for HeapStorage {}
unsafe impl Sync for HeapStorage {}

/// A refcounted data block flowing through the pipeline.
///
/// # Sharing
///
/// Clones share the backing storage. The producer fills the buffer while
/// it holds the only handle; downstream elements treat shared contents as
/// read-only unless they know they hold the sole reference
/// ([`Buffer::is_writable`]).
#[derive(Clone)]
pub struct Buffer {
    storage: Arc<dyn BufferStorage>,
    bytes_used: usize,
    timestamp: ClockTime,
    line_offset: u32,
    sequence: u64,
}

impl Buffer {
    /// Create a buffer over existing storage.
    ///
    /// Starts empty (`bytes_used == 0`) with an unset timestamp.
    pub fn new(storage: Arc<dyn BufferStorage>) -> Self {
        Self {
            storage,
            bytes_used: 0,
            timestamp: ClockTime::NONE,
            line_offset: 0,
            sequence: 0,
        }
    }

    /// Allocate a standalone heap-backed buffer.
    ///
    /// Pool-independent; useful for tests and one-off payloads. Returns
    /// `None` if the allocation fails.
    pub fn allocate(size: usize) -> Option<Self> {
        HeapStorage::new(size, 64).map(|s| Self::new(Arc::new(s)))
    }

    /// Get the storage capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Get the number of valid bytes.
    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    /// Set the number of valid bytes.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the storage capacity.
    pub fn set_bytes_used(&mut self, n: usize) {
        assert!(n <= self.capacity(), "bytes_used exceeds buffer capacity");
        self.bytes_used = n;
    }

    /// Get the capture timestamp.
    pub fn timestamp(&self) -> ClockTime {
        self.timestamp
    }

    /// Set the capture timestamp.
    pub fn set_timestamp(&mut self, t: ClockTime) {
        self.timestamp = t;
    }

    /// Get the line offset of this buffer within its frame.
    pub fn line_offset(&self) -> u32 {
        self.line_offset
    }

    /// Set the line offset.
    pub fn set_line_offset(&mut self, line: u32) {
        self.line_offset = line;
    }

    /// Get the sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Set the sequence number.
    pub fn set_sequence(&mut self, seq: u64) {
        self.sequence = seq;
    }

    /// Check whether this handle is the only reference to the storage.
    pub fn is_writable(&self) -> bool {
        Arc::strong_count(&self.storage) == 1
    }

    /// View the valid bytes.
    pub fn as_slice(&self) -> &[u8] {
        // The storage outlives the returned slice via &self.
        unsafe { std::slice::from_raw_parts(self.storage.as_ptr(), self.bytes_used) }
    }

    /// View the full capacity mutably, for filling.
    ///
    /// Returns `None` when the storage is not writable or the buffer is
    /// shared (another handle could be reading concurrently).
    pub fn fill_slice(&mut self) -> Option<&mut [u8]> {
        if !self.is_writable() {
            return None;
        }
        let ptr = self.storage.as_mut_ptr()?;
        // Sole handle + writable storage, checked above.
        Some(unsafe { std::slice::from_raw_parts_mut(ptr, self.storage.len()) })
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .field("bytes_used", &self.bytes_used)
            .field("timestamp", &self.timestamp)
            .field("line_offset", &self.line_offset)
            .field("sequence", &self.sequence)
            .finish()
    }
}
