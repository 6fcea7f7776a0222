//! The live source element.
//!
//! A source owns one always-present src pad and a buffer pool. While
//! playing, a dedicated task thread runs the produce loop:
//!
//! 1. If the pad is marked for negotiation, run the two-phase handshake
//!    (caps query, fixate, caps event, allocation query), then configure
//!    and start the pool from the fixed caps and clear the mark.
//! 2. Acquire a buffer, stamp it, optionally fill it, and push it to the
//!    peer. The push runs the whole downstream chain synchronously.
//!
//! A failed negotiation or push ends the loop and posts an error message
//! on the enclosing bus. With a non-zero `num-buffers` property the loop
//! sends EOS downstream after that many buffers and parks.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::clock;
use crate::element::{Element, ElementImpl};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::message::Message;
use crate::object::PropertyValue;
use crate::pad::{Pad, PadDirection};
use crate::pool::{BufferPool, SlotPool};
use crate::query::Query;
use crate::state::{StateChange, StateTransition};
use crate::task::TaskPool;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type FillFn = Box<dyn Fn(&mut Buffer) + Send + Sync>;

/// Factory for source elements.
pub struct Source;

impl Source {
    /// Start building a source element.
    pub fn builder(name: impl Into<String>) -> SourceBuilder {
        SourceBuilder {
            name: name.into(),
            caps: Arc::new(Caps::any()),
            task_pool: None,
            pool: None,
            num_buffers: 0,
            fill: None,
        }
    }
}

/// Chained construction for source elements.
pub struct SourceBuilder {
    name: String,
    caps: Arc<Caps>,
    task_pool: Option<Arc<TaskPool>>,
    pool: Option<Arc<SlotPool>>,
    num_buffers: u32,
    fill: Option<FillFn>,
}

impl SourceBuilder {
    /// Set the caps this source offers on its src pad.
    pub fn caps(mut self, caps: Arc<Caps>) -> Self {
        self.caps = caps;
        self
    }

    /// Share a task pool instead of the default one-slot pool.
    pub fn task_pool(mut self, pool: Arc<TaskPool>) -> Self {
        self.task_pool = Some(pool);
        self
    }

    /// Use an explicit buffer pool.
    pub fn pool(mut self, pool: Arc<SlotPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Stop after pushing `n` buffers (0 = unlimited).
    pub fn num_buffers(mut self, n: u32) -> Self {
        self.num_buffers = n;
        self
    }

    /// Fill each buffer before it is pushed.
    ///
    /// Without a fill callback, buffers carry their full (zeroed)
    /// capacity.
    pub fn fill(mut self, fill: impl Fn(&mut Buffer) + Send + Sync + 'static) -> Self {
        self.fill = Some(Box::new(fill));
        self
    }

    /// Finish the element.
    pub fn build(self) -> Element {
        let imp = Arc::new_cyclic(|weak| SourceImpl {
            self_ref: weak.clone(),
            task_pool: self.task_pool.unwrap_or_else(|| TaskPool::new(1)),
            pool: self.pool.unwrap_or_else(SlotPool::new),
            num_buffers: AtomicU32::new(self.num_buffers),
            fill: self.fill,
            pushed: AtomicU64::new(0),
        });
        let element = Element::new(self.name, imp);
        let pad = Pad::builder("src", PadDirection::Src)
            .caps(self.caps)
            .build();
        element.add_pad(pad).expect("new pad has no parent");
        element
    }
}

struct SourceImpl {
    self_ref: Weak<SourceImpl>,
    task_pool: Arc<TaskPool>,
    pool: Arc<SlotPool>,
    num_buffers: AtomicU32,
    fill: Option<FillFn>,
    pushed: AtomicU64,
}

impl SourceImpl {
    /// The once-per-session caps and allocation handshake.
    fn negotiate(&self, element: &Element, pad: &Pad) -> Result<Arc<Caps>> {
        tracing::debug!(element = element.name(), "negotiating caps");

        let mut query = Query::caps(pad.caps());
        if !pad.peer_query(&mut query) {
            return Err(Error::Negotiation("peer did not answer the caps query".into()));
        }
        let answer = query
            .caps_result()
            .cloned()
            .ok_or_else(|| Error::Negotiation("caps query returned no caps".into()))?;

        let fixed = Arc::new(
            answer
                .fixate()
                .ok_or_else(|| Error::Negotiation(format!("cannot fixate {}", answer)))?,
        );

        if !pad.push_event(Event::Caps(Arc::clone(&fixed))) {
            return Err(Error::Negotiation("peer rejected the caps event".into()));
        }
        pad.set_caps(Arc::clone(&fixed));

        let mut alloc = Query::allocation(Arc::clone(&fixed));
        if !pad.peer_query(&mut alloc) {
            return Err(Error::Negotiation(
                "peer did not answer the allocation query".into(),
            ));
        }
        self.decide_allocation(&alloc)?;

        tracing::debug!(element = element.name(), caps = %fixed, "caps negotiated");
        Ok(fixed)
    }

    /// Settle on an allocation from the peer's answer.
    fn decide_allocation(&self, query: &Query) -> Result<()> {
        if !query.is_accepted() {
            return Err(Error::Negotiation("allocation proposal rejected".into()));
        }
        if let Some(proposal) = query.proposed_pool() {
            // Adopt the peer's provisioning bounds, keep our own sizing.
            let mut config = self.pool.config();
            config.min_buffers = proposal.min_buffers;
            config.max_buffers = proposal.max_buffers;
            self.pool.set_config(config);
        }
        Ok(())
    }

    fn abort(&self, element: &Element, error: &Error) -> bool {
        tracing::error!(element = element.name(), error = %error, "streaming stopped");
        if let Some(bus) = element.bus() {
            let _ = bus.post(Message::error(element.name(), error.to_string()));
        }
        false
    }

    /// One iteration of the streaming loop.
    fn loop_once(&self, element: &Element, pad: &Pad) -> bool {
        if pad.needs_negotiation() {
            let fixed = match self.negotiate(element, pad) {
                Ok(fixed) => fixed,
                Err(e) => return self.abort(element, &e),
            };
            let Some(structure) = fixed.first() else {
                return self.abort(
                    element,
                    &Error::Negotiation("fixated caps have no structure".into()),
                );
            };
            if let Err(e) = self
                .pool
                .configure(structure)
                .and_then(|_| self.pool.start())
            {
                return self.abort(element, &e);
            }
            pad.negotiation_done();
            pad.push_event(Event::StreamStart {
                stream_id: format!("{}/src", element.name()),
            });
        }

        let limit = self.num_buffers.load(Ordering::Relaxed);
        if limit != 0 && self.pushed.load(Ordering::Relaxed) >= limit as u64 {
            tracing::debug!(element = element.name(), "buffer budget reached, sending eos");
            pad.push_event(Event::Eos);
            return false;
        }

        let mut buffer = match self.pool.acquire() {
            Ok(buffer) => buffer,
            Err(e) => return self.abort(element, &e),
        };
        buffer.set_sequence(self.pushed.fetch_add(1, Ordering::Relaxed));
        buffer.set_timestamp(clock::monotonic());
        match &self.fill {
            Some(fill) => fill(&mut buffer),
            None => {
                let capacity = buffer.capacity();
                buffer.set_bytes_used(capacity);
            }
        }

        match pad.push(buffer) {
            Ok(()) => true,
            Err(e) => self.abort(element, &e),
        }
    }
}

impl ElementImpl for SourceImpl {
    fn change_state(&self, element: &Element, transition: StateTransition) -> Result<StateChange> {
        match transition {
            StateTransition::ReadyToPaused => Ok(StateChange::Success),
            StateTransition::PausedToPlaying => {
                let pad = element
                    .src_pads()
                    .into_iter()
                    .next()
                    .ok_or(Error::Unsupported("source without a src pad"))?;
                pad.mark_renegotiate();
                self.pushed.store(0, Ordering::Relaxed);

                let imp = self.self_ref.clone();
                let element_ref = Arc::downgrade(element.inner());
                let pad_ref = Arc::downgrade(&pad);
                pad.start_task(&self.task_pool, move || {
                    let Some(imp) = imp.upgrade() else { return false };
                    let Some(inner) = element_ref.upgrade() else {
                        return false;
                    };
                    let Some(pad) = pad_ref.upgrade() else { return false };
                    imp.loop_once(&Element::from_inner(inner), &pad)
                })?;
                Ok(StateChange::Success)
            }
            StateTransition::PlayingToPaused => {
                for pad in element.src_pads() {
                    pad.stop_task();
                }
                Ok(StateChange::Success)
            }
            StateTransition::PausedToReady => {
                self.pool.stop()?;
                Ok(StateChange::Success)
            }
        }
    }

    fn set_property(&self, key: &str, value: PropertyValue) -> Result<()> {
        match key {
            "num-buffers" => {
                let n = value
                    .as_uint()
                    .ok_or_else(|| Error::PropertyType(key.to_string()))?;
                self.num_buffers.store(n, Ordering::Relaxed);
                Ok(())
            }
            _ => Err(Error::UnknownProperty(key.to_string())),
        }
    }

    fn get_property(&self, key: &str) -> Result<PropertyValue> {
        match key {
            "num-buffers" => Ok(PropertyValue::Uint(self.num_buffers.load(Ordering::Relaxed))),
            "pushed" => Ok(PropertyValue::Uint(
                self.pushed.load(Ordering::Relaxed) as u32,
            )),
            _ => Err(Error::UnknownProperty(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Properties;
    use crate::structure::{Structure, fields, media};
    use crate::value::{UintRange, Value};

    fn offer_caps() -> Arc<Caps> {
        Arc::new(Caps::from_structure(
            Structure::builder(media::VIDEO_RAW)
                .field(fields::WIDTH, Value::UintRange(UintRange::new(640, 1920, 1)))
                .build(),
        ))
    }

    #[test]
    fn test_builder_creates_src_pad() {
        let caps = offer_caps();
        let source = Source::builder("src").caps(Arc::clone(&caps)).build();

        let pads = source.src_pads();
        assert_eq!(pads.len(), 1);
        assert_eq!(pads[0].name(), "src");
        assert!(Arc::ptr_eq(&pads[0].caps(), &caps));
        assert!(source.sink_pads().is_empty());
    }

    #[test]
    fn test_num_buffers_property() {
        let source = Source::builder("src").num_buffers(5).build();
        assert_eq!(
            source.get_property("num-buffers").unwrap(),
            PropertyValue::Uint(5)
        );

        source
            .set_property("num-buffers", PropertyValue::Uint(9))
            .unwrap();
        assert_eq!(
            source.get_property("num-buffers").unwrap(),
            PropertyValue::Uint(9)
        );
    }

    #[test]
    fn test_property_type_checked() {
        let source = Source::builder("src").build();
        assert!(matches!(
            source.set_property("num-buffers", PropertyValue::Bool(true)),
            Err(Error::PropertyType(_))
        ));
        assert!(matches!(
            source.get_property("bogus"),
            Err(Error::UnknownProperty(_))
        ));
    }

    /// Accepts a link but answers no queries.
    struct Mute;
    impl ElementImpl for Mute {}

    #[test]
    fn test_unanswered_caps_query_posts_error() {
        let source = Source::builder("src").caps(offer_caps()).build();
        let mute = Element::new("mute", Arc::new(Mute));
        mute.add_pad(Pad::builder("sink", PadDirection::Sink).build())
            .unwrap();
        source.link(&mute).unwrap();

        let bin = crate::bin::Bin::new("bin");
        bin.add_many([source, mute]).unwrap();

        bin.set_state(crate::state::State::Playing).unwrap();
        let msg = bin.bus().pop_filtered(crate::message::mask::ERROR);
        assert!(msg.is_some());
        bin.set_state(crate::state::State::Ready).unwrap();
    }
}
