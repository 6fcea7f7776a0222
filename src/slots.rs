//! Lock-free slot index allocator.
//!
//! Backs both the buffer pool and the task pool: a fixed number of slots,
//! each either free or taken, tracked one bit per slot in atomic words.

use std::sync::atomic::{AtomicU64, Ordering};

const WORD_BITS: usize = u64::BITS as usize;

/// A fixed-capacity atomic bitmap handing out slot indices.
///
/// `take` scans for a clear bit and claims it with a CAS; `put` clears it
/// again. Both are thread-safe without locks.
pub struct SlotBitmap {
    words: Box<[AtomicU64]>,
    capacity: usize,
}

impl SlotBitmap {
    /// Create a bitmap with `capacity` free slots.
    pub fn new(capacity: usize) -> Self {
        let words = (0..capacity.div_ceil(WORD_BITS))
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { words, capacity }
    }

    /// Claim a free slot, returning its index.
    ///
    /// Returns `None` when every slot is taken. Indices are reused in
    /// lowest-first order.
    pub fn take(&self) -> Option<usize> {
        for (word_idx, word) in self.words.iter().enumerate() {
            loop {
                let current = word.load(Ordering::Relaxed);
                if current == u64::MAX {
                    break;
                }

                let bit = (!current).trailing_zeros() as usize;
                let index = word_idx * WORD_BITS + bit;
                if index >= self.capacity {
                    return None;
                }

                let claimed = current | (1u64 << bit);
                match word.compare_exchange_weak(
                    current,
                    claimed,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return Some(index),
                    Err(_) => continue,
                }
            }
        }
        None
    }

    /// Return a slot to the free set.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn put(&self, index: usize) {
        assert!(index < self.capacity, "slot index out of bounds");
        let mask = !(1u64 << (index % WORD_BITS));
        self.words[index / WORD_BITS].fetch_and(mask, Ordering::Release);
    }

    /// Check whether a slot is currently taken (a racy snapshot).
    pub fn in_use(&self, index: usize) -> bool {
        if index >= self.capacity {
            return false;
        }
        let bit = 1u64 << (index % WORD_BITS);
        self.words[index / WORD_BITS].load(Ordering::Relaxed) & bit != 0
    }

    /// Count the free slots (a racy snapshot).
    pub fn free_count(&self) -> usize {
        let taken: usize = self
            .words
            .iter()
            .enumerate()
            .map(|(i, word)| {
                let mut bits = word.load(Ordering::Relaxed);
                let valid = self.capacity - i * WORD_BITS;
                if valid < WORD_BITS {
                    bits &= (1u64 << valid) - 1;
                }
                bits.count_ones() as usize
            })
            .sum();
        self.capacity - taken
    }

    /// Get the total slot count.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_take_and_put() {
        let slots = SlotBitmap::new(5);
        assert_eq!(slots.free_count(), 5);

        assert_eq!(slots.take(), Some(0));
        assert_eq!(slots.take(), Some(1));
        assert!(slots.in_use(1));
        assert_eq!(slots.free_count(), 3);

        slots.put(0);
        assert!(!slots.in_use(0));
        // Lowest free index comes back first.
        assert_eq!(slots.take(), Some(0));
    }

    #[test]
    fn test_exhaustion() {
        let slots = SlotBitmap::new(2);
        assert!(slots.take().is_some());
        assert!(slots.take().is_some());
        assert!(slots.take().is_none());

        slots.put(1);
        assert_eq!(slots.take(), Some(1));
        assert!(slots.take().is_none());
    }

    #[test]
    fn test_unaligned_capacity() {
        let slots = SlotBitmap::new(70);
        for i in 0..70 {
            assert_eq!(slots.take(), Some(i));
        }
        assert!(slots.take().is_none());
        assert_eq!(slots.free_count(), 0);
    }

    #[test]
    fn test_concurrent_take() {
        let slots = Arc::new(SlotBitmap::new(64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let slots = Arc::clone(&slots);
                thread::spawn(move || (0..16).filter_map(|_| slots.take()).collect::<Vec<_>>())
            })
            .collect();

        let mut taken: Vec<usize> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        taken.sort_unstable();
        taken.dedup();
        // No slot was handed out twice.
        assert_eq!(taken.len(), 64);
    }

    #[test]
    #[should_panic(expected = "slot index out of bounds")]
    fn test_put_out_of_bounds() {
        SlotBitmap::new(4).put(4);
    }
}
