//! Streaming tasks on a fixed-size thread pool.
//!
//! Each actively streaming source pad owns one OS thread. Threads are
//! drawn from an injected [`TaskPool`] with a fixed number of slots;
//! exhaustion fails the task start instead of blocking. Tasks stop
//! cooperatively: [`Task::stop`] clears the running flag and joins, and a
//! loop blocked inside its iteration is only interrupted when that
//! iteration returns.

use crate::error::{Error, Result};
use crate::slots::SlotBitmap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// A fixed set of thread slots shared by streaming tasks.
///
/// Pass the pool to every element that starts tasks; there is no process
/// global.
pub struct TaskPool {
    slots: SlotBitmap,
    stack_size: usize,
}

impl TaskPool {
    /// Create a pool with `threads` slots and the default stack size.
    pub fn new(threads: usize) -> Arc<Self> {
        Self::with_stack_size(threads, DEFAULT_STACK_SIZE)
    }

    /// Create a pool with `threads` slots and an explicit per-thread
    /// stack size.
    pub fn with_stack_size(threads: usize, stack_size: usize) -> Arc<Self> {
        Arc::new(Self {
            slots: SlotBitmap::new(threads),
            stack_size,
        })
    }

    /// Get the number of currently free thread slots.
    pub fn available(&self) -> usize {
        self.slots.free_count()
    }

    /// Get the total number of thread slots.
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }
}

/// Returns the slot to the pool when the thread finishes.
struct SlotReservation {
    pool: Arc<TaskPool>,
    index: usize,
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        self.pool.slots.put(self.index);
    }
}

/// A cooperatively stopped streaming loop on its own thread.
///
/// The iteration callback runs repeatedly while the task is running;
/// returning `false` ends the loop from inside.
#[derive(Debug)]
pub struct Task {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Task {
    /// Spawn a task running `iterate` in a loop.
    ///
    /// Claims one pool slot for the lifetime of the thread; the slot is
    /// released when the loop ends. Fails with
    /// [`Error::TaskPoolExhausted`] when the pool has no free slot.
    pub fn spawn(
        pool: &Arc<TaskPool>,
        name: impl Into<String>,
        mut iterate: impl FnMut() -> bool + Send + 'static,
    ) -> Result<Task> {
        let index = pool.slots.take().ok_or(Error::TaskPoolExhausted)?;
        let reservation = SlotReservation {
            pool: Arc::clone(pool),
            index,
        };

        let running = Arc::new(AtomicBool::new(true));
        let loop_flag = Arc::clone(&running);
        let name = name.into();

        // If the spawn fails the closure is dropped unrun, and the
        // reservation it captured frees the slot again.
        let handle = std::thread::Builder::new()
            .name(name)
            .stack_size(pool.stack_size)
            .spawn(move || {
                let _reservation = reservation;
                while loop_flag.load(Ordering::Acquire) {
                    if !iterate() {
                        break;
                    }
                }
            })?;

        Ok(Task {
            running,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Check whether the task has been asked to keep running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the loop to stop and wait for the thread to finish.
    ///
    /// Safe to call more than once. When called from the task's own
    /// thread, the flag is cleared but the join is skipped.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            let _ = handle.join();
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.stop();
    }
}
