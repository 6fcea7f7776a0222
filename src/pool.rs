//! Buffer pools.
//!
//! A [`BufferPool`] configures itself from a negotiated format structure,
//! starts, and hands out [`Buffer`]s. When a buffer's last handle drops,
//! its slot flows back to the pool for reuse.
//!
//! [`SlotPool`] is the built-in implementation: one zeroed heap block cut
//! into equally sized, aligned slots tracked by an atomic bitmap. The
//! trait's `configure`/`start`/`stop` defaults are permissive no-ops so a
//! minimal pool only supplies acquisition and release.

use crate::buffer::{Buffer, BufferStorage, HeapStorage};
use crate::error::{Error, Result};
use crate::slots::SlotBitmap;
use crate::structure::{Structure, fields};
use crate::value::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Sizing and alignment parameters for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Minimum number of buffers the pool guarantees.
    pub min_buffers: usize,
    /// Maximum number of buffers the pool will hold.
    pub max_buffers: usize,
    /// Slot alignment in bytes.
    pub align: usize,
    /// Slot size in bytes.
    pub size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_buffers: 2,
            max_buffers: 8,
            align: 64,
            size: 4096,
        }
    }
}

impl PoolConfig {
    /// Derive a slot size from a fixed format structure.
    ///
    /// An explicit block-size field wins; otherwise concrete frame
    /// dimensions size the slot conservatively (four bytes per pixel);
    /// otherwise the current size is kept.
    pub fn sized_for(mut self, structure: &Structure) -> Self {
        if let Some(Value::Uint(n)) = structure.get(fields::BLOCK_SIZE) {
            self.size = *n as usize;
            return self;
        }

        let dim = |field| match structure.get(field) {
            Some(Value::Uint(v)) => Some(*v as usize),
            Some(Value::Int(v)) if *v > 0 => Some(*v as usize),
            _ => None,
        };
        if let (Some(w), Some(h)) = (dim(fields::WIDTH), dim(fields::HEIGHT)) {
            self.size = w * h * 4;
        }
        self
    }
}

/// Identity of a pool slot, handed back on release.
///
/// The generation guards against a slot released after the pool was
/// stopped and restarted with fresh storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId {
    index: usize,
    generation: u64,
}

/// A source of refcounted buffers.
///
/// `configure`, `start`, and `stop` default to permissive no-ops;
/// `acquire` and `release` are the contract every pool must supply.
/// `release` is invoked from the last buffer handle's drop.
pub trait BufferPool: Send + Sync {
    /// Adapt the pool to a negotiated (fixed) format structure.
    fn configure(&self, structure: &Structure) -> Result<()> {
        let _ = structure;
        Ok(())
    }

    /// Allocate resources and begin handing out buffers.
    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Drop resources; outstanding buffers stay valid but their slots are
    /// not reused.
    fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Take a free buffer from the pool.
    fn acquire(&self) -> Result<Buffer>;

    /// Return a slot to the pool.
    fn release(&self, slot: SlotId);
}

static GENERATION: AtomicU64 = AtomicU64::new(1);

/// Storage and bookkeeping for one started pool session.
struct Active {
    storage: Arc<HeapStorage>,
    stride: usize,
    slot_size: usize,
    bitmap: SlotBitmap,
    generation: u64,
}

/// The built-in fixed-slot buffer pool.
///
/// # Example
///
/// ```rust
/// use riffle::pool::{BufferPool, PoolConfig, SlotPool};
///
/// let pool = SlotPool::with_config(PoolConfig {
///     max_buffers: 4,
///     size: 1024,
///     ..PoolConfig::default()
/// });
/// pool.start().unwrap();
///
/// let buffer = pool.acquire().unwrap();
/// assert_eq!(buffer.capacity(), 1024);
/// drop(buffer); // slot returns to the pool
/// ```
pub struct SlotPool {
    self_ref: Weak<SlotPool>,
    config: Mutex<PoolConfig>,
    active: Mutex<Option<Arc<Active>>>,
}

impl SlotPool {
    /// Create a pool with the default configuration.
    pub fn new() -> Arc<Self> {
        Self::with_config(PoolConfig::default())
    }

    /// Create a pool with an explicit configuration.
    pub fn with_config(config: PoolConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            self_ref: weak.clone(),
            config: Mutex::new(config),
            active: Mutex::new(None),
        })
    }

    /// Check whether the pool is currently started.
    pub fn is_started(&self) -> bool {
        self.active.lock().unwrap().is_some()
    }

    /// Count the free slots of a started pool.
    pub fn free_slots(&self) -> usize {
        match self.active.lock().unwrap().as_ref() {
            Some(active) => active.bitmap.free_count(),
            None => 0,
        }
    }

    /// Get the current configuration.
    pub fn config(&self) -> PoolConfig {
        *self.config.lock().unwrap()
    }

    /// Replace the configuration wholesale.
    ///
    /// Takes effect at the next `start`.
    pub fn set_config(&self, config: PoolConfig) {
        *self.config.lock().unwrap() = config;
    }

    fn current(&self) -> Option<Arc<Active>> {
        self.active.lock().unwrap().clone()
    }
}

impl BufferPool for SlotPool {
    fn configure(&self, structure: &Structure) -> Result<()> {
        let mut config = self.config.lock().unwrap();
        *config = config.sized_for(structure);
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let config = self.config();
        if config.size == 0 || config.max_buffers == 0 || config.min_buffers > config.max_buffers {
            return Err(Error::Allocation(format!(
                "invalid pool config: {:?}",
                config
            )));
        }

        let mut active = self.active.lock().unwrap();
        if active.is_some() {
            return Ok(());
        }

        let align = config.align.max(1);
        let stride = config.size.next_multiple_of(align);
        let storage = HeapStorage::new(stride * config.max_buffers, align)
            .ok_or_else(|| Error::Allocation("pool storage".into()))?;

        *active = Some(Arc::new(Active {
            storage: Arc::new(storage),
            stride,
            slot_size: config.size,
            bitmap: SlotBitmap::new(config.max_buffers),
            generation: GENERATION.fetch_add(1, Ordering::Relaxed),
        }));
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        // Outstanding PoolSlots keep the storage alive through their Arc;
        // their late releases are filtered out by the generation check.
        *self.active.lock().unwrap() = None;
        Ok(())
    }

    fn acquire(&self) -> Result<Buffer> {
        let active = self.current().ok_or(Error::PoolNotStarted)?;
        let index = active.bitmap.take().ok_or(Error::PoolExhausted)?;
        let slot = PoolSlot {
            pool: self.self_ref.clone(),
            active,
            index,
        };
        Ok(Buffer::new(Arc::new(slot)))
    }

    fn release(&self, slot: SlotId) {
        if let Some(active) = self.current() {
            if active.generation == slot.generation {
                active.bitmap.put(slot.index);
            }
        }
    }
}

/// One claimed slot; returns itself to the pool on drop.
struct PoolSlot {
    pool: Weak<SlotPool>,
    active: Arc<Active>,
    index: usize,
}

impl BufferStorage for PoolSlot {
    fn as_ptr(&self) -> *const u8 {
        // Stride-spaced slots never overlap within the allocation.
        unsafe { self.active.storage.as_ptr().add(self.index * self.active.stride) }
    }

    fn as_mut_ptr(&self) -> Option<*mut u8> {
        self.active
            .storage
            .as_mut_ptr()
            .map(|ptr| unsafe { ptr.add(self.index * self.active.stride) })
    }

    fn len(&self) -> usize {
        self.active.slot_size
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        match self.pool.upgrade() {
            Some(pool) => pool.release(SlotId {
                index: self.index,
                generation: self.active.generation,
            }),
            // Pool already gone; free the bit for consistency.
            None => self.active.bitmap.put(self.index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{Structure, media};

    fn small_pool(max_buffers: usize, size: usize) -> Arc<SlotPool> {
        SlotPool::with_config(PoolConfig {
            min_buffers: 1,
            max_buffers,
            align: 16,
            size,
        })
    }

    #[test]
    fn test_acquire_before_start_fails() {
        let pool = small_pool(2, 128);
        assert!(matches!(pool.acquire(), Err(Error::PoolNotStarted)));
    }

    #[test]
    fn test_acquire_release_recycles() {
        let pool = small_pool(2, 128);
        pool.start().unwrap();
        assert_eq!(pool.free_slots(), 2);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.free_slots(), 0);
        assert!(matches!(pool.acquire(), Err(Error::PoolExhausted)));

        drop(a);
        assert_eq!(pool.free_slots(), 1);
        let c = pool.acquire().unwrap();
        assert_eq!(c.capacity(), 128);
        drop(b);
        drop(c);
        assert_eq!(pool.free_slots(), 2);
    }

    #[test]
    fn test_clone_keeps_slot_until_last_drop() {
        let pool = small_pool(1, 64);
        pool.start().unwrap();

        let buffer = pool.acquire().unwrap();
        let clone = buffer.clone();
        drop(buffer);
        assert_eq!(pool.free_slots(), 0);
        drop(clone);
        assert_eq!(pool.free_slots(), 1);
    }

    #[test]
    fn test_configure_from_structure() {
        let pool = small_pool(2, 128);
        let structure = Structure::builder(media::VIDEO_RAW)
            .field(fields::WIDTH, 320u32)
            .field(fields::HEIGHT, 240u32)
            .build();
        pool.configure(&structure).unwrap();
        assert_eq!(pool.config().size, 320 * 240 * 4);

        let explicit = Structure::builder(media::BYTES)
            .field(fields::BLOCK_SIZE, 512u32)
            .build();
        pool.configure(&explicit).unwrap();
        assert_eq!(pool.config().size, 512);
    }

    #[test]
    fn test_stale_release_after_restart_is_ignored() {
        let pool = small_pool(2, 64);
        pool.start().unwrap();
        let buffer = pool.acquire().unwrap();

        pool.stop().unwrap();
        pool.start().unwrap();
        assert_eq!(pool.free_slots(), 2);

        // The old-generation slot must not free a new-generation bit.
        drop(buffer);
        assert_eq!(pool.free_slots(), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let pool = SlotPool::with_config(PoolConfig {
            min_buffers: 4,
            max_buffers: 2,
            ..PoolConfig::default()
        });
        assert!(matches!(pool.start(), Err(Error::Allocation(_))));
    }
}
