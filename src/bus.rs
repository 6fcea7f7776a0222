//! The application-facing message bus.
//!
//! Elements post [`Message`]s; the application pops them. Two consumption
//! paths exist:
//!
//! - **Synchronous listeners** run on the posting thread before the
//!   message is queued. A listener whose mask matches may *consume* the
//!   message, in which case it never reaches the FIFO.
//! - **The FIFO** holds everything no listener consumed, popped with
//!   blocking or non-blocking calls.
//!
//! [`Bus::pop_filtered`] is a *selective drain*: it discards every queued
//! message that does not match the mask while waiting for one that does.
//! The discarded messages are gone; use [`Bus::pop`] when every message
//! matters.

use crate::message::Message;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies a registered synchronous listener for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type ListenerFn = Box<dyn Fn(&Message) -> bool + Send>;

struct Listener {
    id: ListenerId,
    mask: u32,
    callback: ListenerFn,
}

/// A FIFO of messages with an optional synchronous pre-filter.
///
/// # Example
///
/// ```rust
/// use riffle::bus::Bus;
/// use riffle::message::{Message, mask};
///
/// let bus = Bus::new(16);
/// bus.post(Message::eos("src")).unwrap();
///
/// let msg = bus.try_pop().unwrap();
/// assert!(msg.matches(mask::EOS));
/// ```
pub struct Bus {
    tx: kanal::Sender<Message>,
    rx: kanal::Receiver<Message>,
    listeners: Mutex<Vec<Listener>>,
    next_listener: AtomicU64,
}

impl Bus {
    /// Create a bus whose FIFO holds up to `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = kanal::bounded(capacity);
        Self {
            tx,
            rx,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
        }
    }

    /// Post a message.
    ///
    /// The message is first offered to every synchronous listener whose
    /// mask matches; if any reports it consumed, the message is dropped.
    /// Otherwise it is appended to the FIFO. Returns [`Error::BusFull`]
    /// when the FIFO has no room.
    ///
    /// [`Error::BusFull`]: crate::error::Error::BusFull
    pub fn post(&self, message: Message) -> crate::error::Result<()> {
        {
            let listeners = self.listeners.lock().unwrap();
            let mut consumed = false;
            for listener in listeners.iter() {
                if message.matches(listener.mask) {
                    consumed |= (listener.callback)(&message);
                }
            }
            if consumed {
                tracing::trace!(source = message.source(), "message consumed by listener");
                return Ok(());
            }
        }

        match self.tx.try_send(message) {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(crate::error::Error::BusFull),
        }
    }

    /// Pop the next message, blocking until one arrives.
    pub fn pop(&self) -> Option<Message> {
        self.rx.recv().ok()
    }

    /// Pop the next message without blocking.
    pub fn try_pop(&self) -> Option<Message> {
        self.rx.try_recv().ok().flatten()
    }

    /// Block until a message matching `mask` arrives, *discarding* every
    /// non-matching message dequeued along the way.
    ///
    /// The discarded messages are destroyed, not requeued.
    pub fn pop_filtered(&self, mask: u32) -> Option<Message> {
        loop {
            let message = self.rx.recv().ok()?;
            if message.matches(mask) {
                return Some(message);
            }
            tracing::debug!(
                source = message.source(),
                seq = message.seq(),
                "discarding unmatched bus message"
            );
        }
    }

    /// Drain and destroy every queued message.
    pub fn flush(&self) {
        while self.try_pop().is_some() {}
    }

    /// Get the number of queued messages.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Check whether the FIFO is empty.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Register a synchronous listener for kinds matching `mask`.
    ///
    /// The callback runs on the posting thread. Returning `true` consumes
    /// the message.
    pub fn add_listener(
        &self,
        mask: u32,
        callback: impl Fn(&Message) -> bool + Send + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().unwrap().push(Listener {
            id,
            mask,
            callback: Box::new(callback),
        });
        id
    }

    /// Remove a previously registered listener.
    ///
    /// Unknown ids are ignored.
    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().unwrap().retain(|l| l.id != id);
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("queued", &self.len())
            .field("listeners", &self.listeners.lock().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::mask;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_fifo_order() {
        let bus = Bus::new(8);
        bus.post(Message::warning("a", "first")).unwrap();
        bus.post(Message::warning("b", "second")).unwrap();

        assert_eq!(bus.len(), 2);
        assert_eq!(bus.try_pop().unwrap().source(), "a");
        assert_eq!(bus.try_pop().unwrap().source(), "b");
        assert!(bus.try_pop().is_none());
    }

    #[test]
    fn test_consuming_listener_blocks_queueing() {
        let bus = Bus::new(8);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = Arc::clone(&seen);
        bus.add_listener(mask::EOS, move |_| {
            seen2.fetch_add(1, Ordering::Relaxed);
            true
        });

        bus.post(Message::eos("src")).unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 1);
        // Consumed: never observable via pop.
        assert!(bus.try_pop().is_none());

        // A non-matching kind is untouched by the listener.
        bus.post(Message::error("src", "boom")).unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 1);
        assert!(bus.try_pop().is_some());
    }

    #[test]
    fn test_observing_listener_lets_message_queue() {
        let bus = Bus::new(8);
        bus.add_listener(mask::ALL, |_| false);

        bus.post(Message::eos("src")).unwrap();
        assert!(bus.try_pop().is_some());
    }

    #[test]
    fn test_listener_removal() {
        let bus = Bus::new(8);
        let id = bus.add_listener(mask::ALL, |_| true);
        bus.remove_listener(id);

        bus.post(Message::eos("src")).unwrap();
        assert!(bus.try_pop().is_some());
    }

    #[test]
    fn test_pop_filtered_discards_unmatched() {
        let bus = Bus::new(8);
        bus.post(Message::warning("a", "skipped")).unwrap();
        bus.post(Message::warning("b", "skipped")).unwrap();
        bus.post(Message::eos("c")).unwrap();

        let msg = bus.pop_filtered(mask::EOS).unwrap();
        assert_eq!(msg.source(), "c");
        // The skipped warnings are gone for good.
        assert!(bus.try_pop().is_none());
    }

    #[test]
    fn test_flush_discards_everything() {
        let bus = Bus::new(8);
        bus.post(Message::eos("a")).unwrap();
        bus.post(Message::eos("b")).unwrap();
        bus.flush();
        assert!(bus.is_empty());
    }

    #[test]
    fn test_full_bus_rejects_post() {
        let bus = Bus::new(1);
        bus.post(Message::eos("a")).unwrap();
        assert!(matches!(
            bus.post(Message::eos("b")),
            Err(crate::error::Error::BusFull)
        ));
    }

    #[test]
    fn test_blocking_pop_wakes_on_post() {
        let bus = Arc::new(Bus::new(4));
        let bus2 = Arc::clone(&bus);
        let handle = std::thread::spawn(move || bus2.pop_filtered(mask::EOS));

        std::thread::sleep(std::time::Duration::from_millis(20));
        bus.post(Message::eos("late")).unwrap();

        let msg = handle.join().unwrap().unwrap();
        assert_eq!(msg.source(), "late");
    }
}
