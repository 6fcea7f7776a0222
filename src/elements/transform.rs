//! The in-chain transform element.
//!
//! A transform owns one always-present sink pad and one always-present
//! src pad. Its behavior hooks live in [`TransformOps`]; the element
//! machinery here carries the negotiation relay that every transform
//! shares.
//!
//! # The two-phase caps relay
//!
//! Negotiation crosses a transform twice:
//!
//! 1. **Query time.** The incoming filter is narrowed by this pad's own
//!    caps, expressed in the other pad's domain via
//!    [`TransformOps::transform_caps`], and forwarded to the peer there.
//!    The peer's answer is cached as the other pad's caps - transforming
//!    caps is lossy, so the answer cannot be reconstructed later - then
//!    transformed back and narrowed by the original filter to form the
//!    reply.
//! 2. **Event time.** The now-fixed caps arrive as an event, are
//!    transformed to the other domain, narrowed by the cached query-time
//!    caps, fixated, and forwarded; only then are both pads' caps
//!    committed.
//!
//! The allocation query relays downstream similarly, and only a transform
//! in [`TransformMode::Normal`] provisions its own output pool.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, ElementImpl, default_event_route};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::pad::{Pad, PadDirection};
use crate::pool::{BufferPool, SlotPool};
use crate::query::Query;
use crate::state::{StateChange, StateTransition};
use std::sync::{Arc, Mutex};

/// How a transform produces output from input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformMode {
    /// Forward input buffers untouched.
    #[default]
    Passthrough,
    /// Mutate input buffers in place.
    InPlace,
    /// Produce new output buffers from an own pool.
    Normal,
}

/// Behavior hooks of a concrete transform.
///
/// Every hook has a neutral default: identity caps transform, byte-copy
/// transform, no-op in-place transform, accept-all allocation handling.
pub trait TransformOps: Send + Sync + 'static {
    /// Express caps from one pad's domain in the other's.
    ///
    /// `direction` is the domain being converted *into*. The default is
    /// the identity, for transforms that do not change formats.
    fn transform_caps(&self, caps: &Caps, direction: PadDirection) -> Caps {
        let _ = direction;
        caps.clone()
    }

    /// Produce an output buffer from an input buffer (Normal mode).
    ///
    /// The default copies the input bytes.
    fn transform(&self, input: &Buffer, output: &mut Buffer) -> Result<()> {
        let n = input.bytes_used().min(output.capacity());
        let Some(dst) = output.fill_slice() else {
            return Err(Error::Unsupported("output buffer is not writable"));
        };
        dst[..n].copy_from_slice(&input.as_slice()[..n]);
        output.set_bytes_used(n);
        Ok(())
    }

    /// Mutate a buffer in place (InPlace mode).
    fn transform_ip(&self, buffer: &mut Buffer) -> Result<()> {
        let _ = buffer;
        Ok(())
    }

    /// Answer the upstream allocation query.
    fn propose_allocation(&self, query: &mut Query) -> bool {
        query.accept_allocation(None);
        true
    }

    /// Inspect the downstream allocation answer.
    fn decide_allocation(&self, query: &Query) -> Result<()> {
        if query.is_accepted() {
            Ok(())
        } else {
            Err(Error::Negotiation("downstream rejected allocation".into()))
        }
    }

    /// Called after caps were committed on both pads.
    fn caps_committed(
        &self,
        element: &Element,
        sink_caps: &Arc<Caps>,
        src_caps: &Arc<Caps>,
    ) -> Result<()> {
        let _ = (element, sink_caps, src_caps);
        Ok(())
    }
}

/// The identity ops used when a builder gets no explicit ops.
struct IdentityOps;
impl TransformOps for IdentityOps {}

/// Factory for transform elements.
pub struct Transform;

impl Transform {
    /// Start building a transform element.
    pub fn builder(name: impl Into<String>) -> TransformBuilder {
        TransformBuilder {
            name: name.into(),
            mode: TransformMode::Passthrough,
            caps: Arc::new(Caps::any()),
            ops: None,
            pool: None,
        }
    }
}

/// Chained construction for transform elements.
pub struct TransformBuilder {
    name: String,
    mode: TransformMode,
    caps: Arc<Caps>,
    ops: Option<Box<dyn TransformOps>>,
    pool: Option<Arc<SlotPool>>,
}

impl TransformBuilder {
    /// Set the processing mode.
    pub fn mode(mut self, mode: TransformMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the caps carried by both pads.
    pub fn caps(mut self, caps: Arc<Caps>) -> Self {
        self.caps = caps;
        self
    }

    /// Supply the behavior hooks.
    pub fn ops(mut self, ops: Box<dyn TransformOps>) -> Self {
        self.ops = Some(ops);
        self
    }

    /// Use an explicit output pool (Normal mode).
    pub fn pool(mut self, pool: Arc<SlotPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Finish the element.
    pub fn build(self) -> Element {
        let imp = Arc::new(TransformImpl {
            ops: self.ops.unwrap_or_else(|| Box::new(IdentityOps)),
            mode: Mutex::new(self.mode),
            pool: self.pool.unwrap_or_else(SlotPool::new),
        });
        let element = Element::new(self.name, imp);
        let sink = Pad::builder("sink", PadDirection::Sink)
            .caps(Arc::clone(&self.caps))
            .build();
        let src = Pad::builder("src", PadDirection::Src).caps(self.caps).build();
        element.add_pad(sink).expect("new pad has no parent");
        element.add_pad(src).expect("new pad has no parent");
        element
    }
}

struct TransformImpl {
    ops: Box<dyn TransformOps>,
    mode: Mutex<TransformMode>,
    pool: Arc<SlotPool>,
}

impl TransformImpl {
    fn opposite(element: &Element, pad: &Pad) -> Option<Arc<Pad>> {
        let pads = match pad.direction() {
            PadDirection::Sink => element.src_pads(),
            PadDirection::Src => element.sink_pads(),
        };
        pads.into_iter().next()
    }

    fn mode(&self) -> TransformMode {
        *self.mode.lock().unwrap()
    }

    /// Phase one: relay a caps query across the element.
    fn caps_query(&self, element: &Element, pad: &Pad, query: &mut Query) -> bool {
        let Some(filter) = query.filter().cloned() else {
            return false;
        };
        let narrowed = filter.intersect(&pad.caps());
        if narrowed.is_empty() {
            tracing::debug!(element = element.name(), "caps query has no overlap");
            return false;
        }

        let Some(other) = Self::opposite(element, pad) else {
            return false;
        };
        let transformed = self.ops.transform_caps(&narrowed, other.direction());

        let mut relay = Query::caps(Arc::new(transformed));
        if !other.peer_query(&mut relay) {
            tracing::debug!(element = element.name(), "peer did not answer relayed query");
            return false;
        }
        let Some(answer) = relay.caps_result().cloned() else {
            return false;
        };

        // Needed again at event time; transform_caps cannot recover it.
        other.set_caps(Arc::clone(&answer));

        let back = self.ops.transform_caps(&answer, pad.direction());
        let reply = back.intersect(&filter);
        if reply.is_empty() {
            return false;
        }
        query.set_caps_result(Arc::new(reply));
        true
    }

    /// Relay an allocation query downstream, provisioning an own pool in
    /// Normal mode.
    fn allocation_query(&self, element: &Element, pad: &Pad, query: &mut Query) -> bool {
        if pad.direction() != PadDirection::Sink {
            return false;
        }
        let Some(caps) = query.allocation_caps().cloned() else {
            return false;
        };
        let Some(srcpad) = Self::opposite(element, pad) else {
            return false;
        };

        let mut relay = Query::allocation(Arc::clone(&caps));
        if !srcpad.peer_query(&mut relay) {
            return false;
        }
        if let Err(e) = self.ops.decide_allocation(&relay) {
            tracing::debug!(element = element.name(), error = %e, "allocation refused");
            return false;
        }

        if self.mode() == TransformMode::Normal {
            let Some(structure) = caps.first() else {
                return false;
            };
            if let Err(e) = self
                .pool
                .configure(structure)
                .and_then(|_| self.pool.start())
            {
                tracing::warn!(element = element.name(), error = %e, "output pool failed");
                return false;
            }
        }

        self.ops.propose_allocation(query)
    }

    /// Phase two: commit fixed caps arriving as an event.
    fn caps_event(&self, element: &Element, pad: &Pad, caps: Arc<Caps>) -> bool {
        let Some(srcpad) = Self::opposite(element, pad) else {
            return false;
        };

        let transformed = self.ops.transform_caps(&caps, srcpad.direction());
        let narrowed = transformed.intersect(&srcpad.caps());
        let Some(fixed) = narrowed.fixate() else {
            tracing::debug!(element = element.name(), "cannot fixate outgoing caps");
            return false;
        };
        let fixed = Arc::new(fixed);

        if !srcpad.push_event(Event::Caps(Arc::clone(&fixed))) {
            return false;
        }

        pad.set_caps(Arc::clone(&caps));
        srcpad.set_caps(Arc::clone(&fixed));

        if let Err(e) = self.ops.caps_committed(element, &caps, &fixed) {
            tracing::warn!(element = element.name(), error = %e, "caps commit hook failed");
            return false;
        }
        true
    }
}

impl ElementImpl for TransformImpl {
    fn change_state(&self, _element: &Element, transition: StateTransition) -> Result<StateChange> {
        if transition == StateTransition::PausedToReady {
            self.pool.stop()?;
        }
        Ok(StateChange::Success)
    }

    fn chain(&self, element: &Element, _pad: &Pad, mut buffer: Buffer) -> Result<()> {
        let srcpad = element
            .src_pads()
            .into_iter()
            .next()
            .ok_or(Error::Unsupported("transform without a src pad"))?;

        match self.mode() {
            TransformMode::Passthrough => srcpad.push(buffer),
            TransformMode::InPlace => {
                self.ops.transform_ip(&mut buffer)?;
                srcpad.push(buffer)
            }
            TransformMode::Normal => {
                let mut out = self.pool.acquire()?;
                out.set_timestamp(buffer.timestamp());
                out.set_sequence(buffer.sequence());
                out.set_line_offset(buffer.line_offset());
                self.ops.transform(&buffer, &mut out)?;
                drop(buffer);
                srcpad.push(out)
            }
        }
    }

    fn query(&self, element: &Element, pad: &Pad, query: &mut Query) -> bool {
        match query {
            Query::Caps { .. } => self.caps_query(element, pad, query),
            Query::Allocation { .. } => self.allocation_query(element, pad, query),
        }
    }

    fn event(&self, element: &Element, pad: &Pad, event: Event) -> bool {
        match event {
            Event::Caps(caps) if pad.direction() == PadDirection::Sink => {
                self.caps_event(element, pad, caps)
            }
            other => default_event_route(element, pad, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elements::Sink;
    use crate::object::{Properties, PropertyValue};
    use crate::structure::{Structure, fields, media};
    use crate::value::{UintRange, Value};

    fn width_caps(min: u32, max: u32) -> Arc<Caps> {
        Arc::new(Caps::from_structure(
            Structure::builder(media::VIDEO_RAW)
                .field(fields::WIDTH, Value::UintRange(UintRange::new(min, max, 1)))
                .build(),
        ))
    }

    fn linked_chain() -> (Element, Element) {
        let transform = Transform::builder("filter").build();
        let sink = Sink::builder("sink").caps(width_caps(0, 1280)).build();
        transform.link(&sink).unwrap();
        (transform, sink)
    }

    #[test]
    fn test_caps_query_relays_and_caches() {
        let (transform, _sink) = linked_chain();
        let sinkpad = transform.static_pad("sink").unwrap();
        let srcpad = transform.static_pad("src").unwrap();

        let mut query = Query::caps(width_caps(640, 1920));
        assert!(sinkpad.query(&mut query));

        let reply = query.caps_result().unwrap();
        assert_eq!(
            reply.first().unwrap().get(fields::WIDTH),
            Some(&Value::UintRange(UintRange::new(640, 1280, 1)))
        );
        // The peer's answer is cached on the src pad for event time.
        assert_eq!(
            srcpad.caps().first().unwrap().get(fields::WIDTH),
            Some(&Value::UintRange(UintRange::new(640, 1280, 1)))
        );
    }

    #[test]
    fn test_caps_query_fails_without_overlap() {
        let (transform, _sink) = linked_chain();
        let sinkpad = transform.static_pad("sink").unwrap();

        let mut query = Query::caps(width_caps(5000, 6000));
        assert!(!sinkpad.query(&mut query));
    }

    #[test]
    fn test_caps_event_fixates_and_commits_both_pads() {
        let (transform, sink) = linked_chain();
        let sinkpad = transform.static_pad("sink").unwrap();
        let srcpad = transform.static_pad("src").unwrap();

        // Query first, as the protocol requires, to populate the cache.
        let mut query = Query::caps(width_caps(640, 1920));
        assert!(sinkpad.query(&mut query));

        let fixed = Arc::new(query.caps_result().unwrap().fixate().unwrap());
        assert!(sinkpad.send_event(Event::Caps(Arc::clone(&fixed))));

        assert!(Arc::ptr_eq(&sinkpad.caps(), &fixed));
        assert!(srcpad.caps().is_fixed());
        assert_eq!(
            srcpad.caps().first().unwrap().get(fields::WIDTH),
            Some(&Value::Uint(640))
        );
        // The downstream sink committed the same fixed caps.
        assert!(sink.static_pad("sink").unwrap().caps().is_fixed());
    }

    #[test]
    fn test_allocation_relay_passthrough_has_no_pool() {
        let (transform, _sink) = linked_chain();
        let sinkpad = transform.static_pad("sink").unwrap();

        let mut query = Query::allocation(Arc::new(width_caps(0, 1280).fixate().unwrap()));
        assert!(sinkpad.query(&mut query));
        assert!(query.is_accepted());
    }

    #[test]
    fn test_passthrough_chain_forwards_buffer() {
        let (transform, sink) = linked_chain();
        let sinkpad = transform.static_pad("sink").unwrap();

        let mut buffer = Buffer::allocate(8).unwrap();
        buffer.set_bytes_used(8);
        sinkpad.chain(buffer).unwrap();

        assert_eq!(sink.get_property("rendered").unwrap(), PropertyValue::Uint(1));
    }

    #[test]
    fn test_normal_mode_produces_new_buffer() {
        let transform = Transform::builder("copy")
            .mode(TransformMode::Normal)
            .build();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let sink = Sink::builder("sink")
            .render(move |_, buffer| {
                seen2
                    .lock()
                    .unwrap()
                    .push((buffer.as_slice().to_vec(), buffer.as_slice().as_ptr() as usize));
                Ok(())
            })
            .build();
        transform.link(&sink).unwrap();

        let sinkpad = transform.static_pad("sink").unwrap();

        // Provision the output pool the way negotiation would.
        let caps = Arc::new(Caps::from_structure(
            Structure::builder(media::BYTES)
                .field(fields::BLOCK_SIZE, 16u32)
                .build(),
        ));
        let mut alloc = Query::allocation(caps);
        assert!(sinkpad.query(&mut alloc));

        let mut input = Buffer::allocate(16).unwrap();
        input.fill_slice().unwrap()[..4].copy_from_slice(b"data");
        input.set_bytes_used(4);
        let input_ptr = input.as_slice().as_ptr() as usize;
        sinkpad.chain(input).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(&seen[0].0, b"data");
        // The sink saw a buffer from the transform's own pool, not the
        // input storage.
        assert_ne!(seen[0].1, input_ptr);
    }

    #[test]
    fn test_in_place_mode_runs_hook() {
        struct Invert;
        impl TransformOps for Invert {
            fn transform_ip(&self, buffer: &mut Buffer) -> Result<()> {
                let n = buffer.bytes_used();
                let Some(data) = buffer.fill_slice() else {
                    return Err(Error::Unsupported("shared buffer"));
                };
                for byte in &mut data[..n] {
                    *byte = !*byte;
                }
                Ok(())
            }
        }

        let transform = Transform::builder("invert")
            .mode(TransformMode::InPlace)
            .ops(Box::new(Invert))
            .build();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let sink = Sink::builder("sink")
            .render(move |_, buffer| {
                seen2.lock().unwrap().push(buffer.as_slice().to_vec());
                Ok(())
            })
            .build();
        transform.link(&sink).unwrap();

        let mut input = Buffer::allocate(4).unwrap();
        input.fill_slice().unwrap().copy_from_slice(&[0x00, 0xFF, 0x0F, 0xF0]);
        input.set_bytes_used(4);
        transform
            .static_pad("sink")
            .unwrap()
            .chain(input)
            .unwrap();

        assert_eq!(seen.lock().unwrap()[0], vec![0xFF, 0x00, 0xF0, 0x0F]);
    }

    #[test]
    fn test_eos_routes_through() {
        let (transform, sink) = linked_chain();
        let sinkpad = transform.static_pad("sink").unwrap();

        assert!(sinkpad.send_event(Event::Eos));
        assert_eq!(sink.get_property("eos").unwrap(), PropertyValue::Bool(true));
    }
}
