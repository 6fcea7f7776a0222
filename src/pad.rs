//! Pads: the typed, directional connection points on elements.
//!
//! A pad has an immutable direction, current caps, and at most one peer.
//! Linking validates that the two pads' caps can intersect before the
//! symmetric peer association is made. Data and signaling both travel
//! through pads:
//!
//! - [`Pad::push`] hands a buffer to the peer, which dispatches it to its
//!   element's chain function on the calling thread.
//! - [`Pad::send_event`] delivers an event *to* this pad;
//!   [`Pad::push_event`] sends one to the peer.
//! - [`Pad::query`] asks this pad's element a question, answered in place.
//!
//! A streaming source pad additionally owns a [`Task`]: the thread that
//! runs its produce loop while the element is playing.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::Element;
use crate::element::ElementInner;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::object::{self, ObjectFlags};
use crate::query::Query;
use crate::task::{Task, TaskPool};
use std::sync::{Arc, Mutex, RwLock, Weak};

/// Pad flag bits.
pub mod flags {
    /// The pad must (re)negotiate caps before streaming.
    pub const NEGOTIATE: u32 = 1 << 0;
}

/// Direction of a pad, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadDirection {
    /// Produces data (links to a peer sink pad).
    Src,
    /// Consumes data (links to a peer src pad).
    Sink,
}

impl PadDirection {
    /// Get the opposite direction.
    pub fn opposite(self) -> Self {
        match self {
            PadDirection::Src => PadDirection::Sink,
            PadDirection::Sink => PadDirection::Src,
        }
    }
}

/// Whether a pad is always present or created dynamically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PadPresence {
    /// Pad is always present on the element.
    #[default]
    Always,
    /// Pad appears depending on the stream.
    Sometimes,
    /// Pad is created when requested.
    Request,
}

/// Scheduling mode of a pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PadMode {
    /// Not streaming.
    #[default]
    Inactive,
    /// Buffers are pushed through this pad.
    Push,
}

/// A connection point on an element.
pub struct Pad {
    name: String,
    direction: PadDirection,
    presence: PadPresence,
    mode: Mutex<PadMode>,
    flags: ObjectFlags,
    caps: RwLock<Arc<Caps>>,
    peer: RwLock<Weak<Pad>>,
    parent: RwLock<Weak<ElementInner>>,
    task: Mutex<Option<Task>>,
}

impl Pad {
    /// Start building a pad.
    pub fn builder(name: impl Into<String>, direction: PadDirection) -> PadBuilder {
        PadBuilder {
            name: name.into(),
            direction,
            presence: PadPresence::Always,
            caps: Arc::new(Caps::any()),
        }
    }

    /// Get the pad's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the pad's direction.
    pub fn direction(&self) -> PadDirection {
        self.direction
    }

    /// Get the pad's presence.
    pub fn presence(&self) -> PadPresence {
        self.presence
    }

    /// Get the pad's scheduling mode.
    pub fn mode(&self) -> PadMode {
        *self.mode.lock().unwrap()
    }

    /// Get the pad's current caps.
    pub fn caps(&self) -> Arc<Caps> {
        Arc::clone(&self.caps.read().unwrap())
    }

    /// Replace the pad's caps.
    ///
    /// Published caps are immutable; this swaps the shared handle rather
    /// than editing in place.
    pub fn set_caps(&self, caps: Arc<Caps>) {
        let mut slot = self.caps.write().unwrap();
        let old = object::replace(&mut slot, &caps);
        tracing::trace!(pad = self.name.as_str(), from = %old, to = %caps, "caps replaced");
    }

    /// Get the linked peer pad, if any.
    pub fn peer(&self) -> Option<Arc<Pad>> {
        self.peer.read().unwrap().upgrade()
    }

    /// Check whether the pad is linked.
    pub fn is_linked(&self) -> bool {
        self.peer().is_some()
    }

    pub(crate) fn set_peer(&self, peer: &Arc<Pad>) {
        *self.peer.write().unwrap() = Arc::downgrade(peer);
    }

    pub(crate) fn clear_peer(&self) {
        *self.peer.write().unwrap() = Weak::new();
    }

    /// Get the element this pad belongs to.
    pub fn element(&self) -> Option<Element> {
        self.parent
            .read()
            .unwrap()
            .upgrade()
            .map(Element::from_inner)
    }

    pub(crate) fn set_parent(&self, inner: &Arc<ElementInner>) {
        *self.parent.write().unwrap() = Arc::downgrade(inner);
    }

    /// Mark the pad as needing caps negotiation before streaming.
    pub fn mark_renegotiate(&self) {
        self.flags.set(flags::NEGOTIATE);
    }

    /// Check whether the pad needs caps negotiation.
    pub fn needs_negotiation(&self) -> bool {
        self.flags.contains(flags::NEGOTIATE)
    }

    /// Clear the negotiation mark after a successful handshake.
    pub fn negotiation_done(&self) {
        self.flags.clear(flags::NEGOTIATE);
    }

    // ------------------------------------------------------------------
    // Linking
    // ------------------------------------------------------------------

    /// Link a src pad to a sink pad.
    ///
    /// Fails unless both pads are unlinked and their caps can intersect.
    /// Each element's link hook may still reject the link, in which case
    /// the peer assignment is rolled back and both pads stay unlinked.
    pub fn link(src: &Arc<Pad>, sink: &Arc<Pad>) -> Result<()> {
        if src.direction != PadDirection::Src || sink.direction != PadDirection::Sink {
            return Err(Error::Link(format!(
                "`{}` -> `{}`: direction mismatch",
                src.name, sink.name
            )));
        }
        if src.is_linked() || sink.is_linked() {
            return Err(Error::Link(format!(
                "`{}` -> `{}`: a pad is already linked",
                src.name, sink.name
            )));
        }
        if !src.caps().can_intersect(&sink.caps()) {
            return Err(Error::Link(format!(
                "`{}` -> `{}`: caps do not intersect",
                src.name, sink.name
            )));
        }

        src.set_peer(sink);
        sink.set_peer(src);

        for (pad, peer) in [(src, sink), (sink, src)] {
            let accepted = match pad.element() {
                Some(element) => element.imp().link_pad(&element, pad, peer),
                None => Ok(()),
            };
            if let Err(e) = accepted {
                src.clear_peer();
                sink.clear_peer();
                return Err(e);
            }
        }

        tracing::debug!(src = src.name.as_str(), sink = sink.name.as_str(), "pads linked");
        Ok(())
    }

    /// Unlink this pad and its peer.
    pub fn unlink(&self) {
        if let Some(peer) = self.peer() {
            peer.clear_peer();
        }
        self.clear_peer();
    }

    // ------------------------------------------------------------------
    // Dataflow and signaling
    // ------------------------------------------------------------------

    /// Push a buffer to the peer.
    ///
    /// Runs the peer element's chain function on the calling thread; there
    /// is no queue between linked pads.
    pub fn push(&self, buffer: Buffer) -> Result<()> {
        let peer = self
            .peer()
            .ok_or_else(|| Error::NotLinked(self.name.clone()))?;
        peer.chain(buffer)
    }

    /// Deliver a buffer to this pad's element.
    pub fn chain(&self, buffer: Buffer) -> Result<()> {
        let element = self
            .element()
            .ok_or_else(|| Error::NotLinked(self.name.clone()))?;
        element.imp().chain(&element, self, buffer)
    }

    /// Deliver an event to this pad's element.
    ///
    /// Returns whether the event was handled.
    pub fn send_event(&self, event: Event) -> bool {
        match self.element() {
            Some(element) => element.imp().event(&element, self, event),
            None => false,
        }
    }

    /// Send an event to the peer.
    pub fn push_event(&self, event: Event) -> bool {
        match self.peer() {
            Some(peer) => peer.send_event(event),
            None => false,
        }
    }

    /// Ask this pad's element a query, answered in place.
    ///
    /// There is no fan-out for queries; the element either answers or the
    /// query fails.
    pub fn query(&self, query: &mut Query) -> bool {
        match self.element() {
            Some(element) => element.imp().query(&element, self, query),
            None => false,
        }
    }

    /// Ask the peer's element a query.
    pub fn peer_query(&self, query: &mut Query) -> bool {
        match self.peer() {
            Some(peer) => peer.query(query),
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Streaming task
    // ------------------------------------------------------------------

    /// Start this pad's streaming task.
    ///
    /// Fails when the pool is exhausted or a task is already running.
    pub fn start_task(
        &self,
        pool: &Arc<TaskPool>,
        iterate: impl FnMut() -> bool + Send + 'static,
    ) -> Result<()> {
        let mut slot = self.task.lock().unwrap();
        if slot.is_some() {
            return Err(Error::Unsupported("pad task already running"));
        }
        let task = Task::spawn(pool, format!("pad:{}", self.name), iterate)?;
        *slot = Some(task);
        *self.mode.lock().unwrap() = PadMode::Push;
        Ok(())
    }

    /// Stop and join this pad's streaming task, if any.
    pub fn stop_task(&self) {
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            task.stop();
        }
        *self.mode.lock().unwrap() = PadMode::Inactive;
    }
}

impl std::fmt::Debug for Pad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pad")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("linked", &self.is_linked())
            .field("mode", &self.mode())
            .finish()
    }
}

/// Chained construction for [`Pad`].
pub struct PadBuilder {
    name: String,
    direction: PadDirection,
    presence: PadPresence,
    caps: Arc<Caps>,
}

impl PadBuilder {
    /// Set the pad's presence.
    pub fn presence(mut self, presence: PadPresence) -> Self {
        self.presence = presence;
        self
    }

    /// Set the pad's initial caps.
    pub fn caps(mut self, caps: Arc<Caps>) -> Self {
        self.caps = caps;
        self
    }

    /// Finish the pad.
    pub fn build(self) -> Arc<Pad> {
        Arc::new(Pad {
            name: self.name,
            direction: self.direction,
            presence: self.presence,
            mode: Mutex::new(PadMode::Inactive),
            flags: ObjectFlags::new(),
            caps: RwLock::new(self.caps),
            peer: RwLock::new(Weak::new()),
            parent: RwLock::new(Weak::new()),
            task: Mutex::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{Structure, fields, media};
    use crate::value::{UintRange, Value};

    fn width_caps(min: u32, max: u32) -> Arc<Caps> {
        Arc::new(Caps::from_structure(
            Structure::builder(media::VIDEO_RAW)
                .field(fields::WIDTH, Value::UintRange(UintRange::new(min, max, 1)))
                .build(),
        ))
    }

    #[test]
    fn test_link_success_sets_both_peers() {
        let src = Pad::builder("src", PadDirection::Src)
            .caps(width_caps(640, 1920))
            .build();
        let sink = Pad::builder("sink", PadDirection::Sink)
            .caps(width_caps(0, 1280))
            .build();

        Pad::link(&src, &sink).unwrap();
        assert!(Arc::ptr_eq(&src.peer().unwrap(), &sink));
        assert!(Arc::ptr_eq(&sink.peer().unwrap(), &src));
    }

    #[test]
    fn test_link_rejects_disjoint_caps() {
        let src = Pad::builder("src", PadDirection::Src)
            .caps(width_caps(2000, 3000))
            .build();
        let sink = Pad::builder("sink", PadDirection::Sink)
            .caps(width_caps(0, 1280))
            .build();

        assert!(matches!(Pad::link(&src, &sink), Err(Error::Link(_))));
        assert!(!src.is_linked());
        assert!(!sink.is_linked());
    }

    #[test]
    fn test_link_rejects_wrong_direction() {
        let a = Pad::builder("a", PadDirection::Sink).build();
        let b = Pad::builder("b", PadDirection::Sink).build();
        assert!(matches!(Pad::link(&a, &b), Err(Error::Link(_))));
    }

    #[test]
    fn test_link_rejects_double_link() {
        let src = Pad::builder("src", PadDirection::Src).build();
        let sink = Pad::builder("sink", PadDirection::Sink).build();
        let other = Pad::builder("other", PadDirection::Sink).build();

        Pad::link(&src, &sink).unwrap();
        assert!(matches!(Pad::link(&src, &other), Err(Error::Link(_))));
        // The original link is untouched.
        assert!(Arc::ptr_eq(&src.peer().unwrap(), &sink));
    }

    #[test]
    fn test_unlink_clears_both_sides() {
        let src = Pad::builder("src", PadDirection::Src).build();
        let sink = Pad::builder("sink", PadDirection::Sink).build();
        Pad::link(&src, &sink).unwrap();

        src.unlink();
        assert!(!src.is_linked());
        assert!(!sink.is_linked());
    }

    #[test]
    fn test_push_on_unlinked_pad_fails() {
        let src = Pad::builder("src", PadDirection::Src).build();
        let buffer = Buffer::allocate(16).unwrap();
        assert!(matches!(src.push(buffer), Err(Error::NotLinked(_))));
    }

    #[test]
    fn test_negotiation_flag() {
        let pad = Pad::builder("src", PadDirection::Src).build();
        assert!(!pad.needs_negotiation());

        pad.mark_renegotiate();
        assert!(pad.needs_negotiation());

        pad.negotiation_done();
        assert!(!pad.needs_negotiation());
    }

    #[test]
    fn test_set_caps_replaces_shared_handle() {
        let pad = Pad::builder("src", PadDirection::Src).build();
        assert!(pad.caps().is_any());

        let caps = width_caps(640, 1920);
        pad.set_caps(Arc::clone(&caps));
        assert!(Arc::ptr_eq(&pad.caps(), &caps));
    }

    #[test]
    fn test_direction_opposite() {
        assert_eq!(PadDirection::Src.opposite(), PadDirection::Sink);
        assert_eq!(PadDirection::Sink.opposite(), PadDirection::Src);
    }
}
