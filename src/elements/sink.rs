//! The terminal sink element.
//!
//! A sink owns one always-present sink pad and consumes buffers on the
//! pushing thread. It answers the two negotiation queries - caps by
//! intersecting the filter with its own caps, allocation through a
//! propose hook that accepts by default - commits caps on the caps event,
//! and acknowledges EOS, surfacing it on the enclosing bus.

use crate::buffer::Buffer;
use crate::caps::Caps;
use crate::element::{Element, ElementImpl};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::message::Message;
use crate::object::PropertyValue;
use crate::pad::{Pad, PadDirection};
use crate::query::Query;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

type RenderFn = Box<dyn Fn(&Element, &Buffer) -> Result<()> + Send + Sync>;
type ProposeFn = Box<dyn Fn(&mut Query) -> bool + Send + Sync>;

/// Factory for sink elements.
pub struct Sink;

impl Sink {
    /// Start building a sink element.
    pub fn builder(name: impl Into<String>) -> SinkBuilder {
        SinkBuilder {
            name: name.into(),
            caps: Arc::new(Caps::any()),
            render: None,
            propose: None,
        }
    }
}

/// Chained construction for sink elements.
pub struct SinkBuilder {
    name: String,
    caps: Arc<Caps>,
    render: Option<RenderFn>,
    propose: Option<ProposeFn>,
}

impl SinkBuilder {
    /// Set the caps this sink supports.
    pub fn caps(mut self, caps: Arc<Caps>) -> Self {
        self.caps = caps;
        self
    }

    /// Run a callback for every rendered buffer.
    pub fn render(
        mut self,
        render: impl Fn(&Element, &Buffer) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.render = Some(Box::new(render));
        self
    }

    /// Override the allocation proposal (default: accept as-is).
    pub fn propose_allocation(
        mut self,
        propose: impl Fn(&mut Query) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.propose = Some(Box::new(propose));
        self
    }

    /// Finish the element.
    pub fn build(self) -> Element {
        let caps = Arc::clone(&self.caps);
        let imp = Arc::new(SinkImpl {
            caps: self.caps,
            render: self.render,
            propose: self.propose,
            rendered: AtomicU64::new(0),
            eos: AtomicBool::new(false),
        });
        let element = Element::new(self.name, imp);
        let pad = Pad::builder("sink", PadDirection::Sink).caps(caps).build();
        element.add_pad(pad).expect("new pad has no parent");
        element
    }
}

struct SinkImpl {
    caps: Arc<Caps>,
    render: Option<RenderFn>,
    propose: Option<ProposeFn>,
    rendered: AtomicU64,
    eos: AtomicBool,
}

impl ElementImpl for SinkImpl {
    fn chain(&self, element: &Element, _pad: &Pad, buffer: Buffer) -> Result<()> {
        tracing::trace!(
            element = element.name(),
            seq = buffer.sequence(),
            bytes = buffer.bytes_used(),
            "rendering buffer"
        );
        if let Some(render) = &self.render {
            render(element, &buffer)?;
        }
        self.rendered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn query(&self, element: &Element, _pad: &Pad, query: &mut Query) -> bool {
        match query {
            Query::Caps { .. } => {
                let Some(filter) = query.filter().cloned() else {
                    return false;
                };
                let answer = if filter.is_any() {
                    (*self.caps).clone()
                } else {
                    filter.intersect(&self.caps)
                };
                if answer.is_empty() {
                    tracing::debug!(element = element.name(), "caps query has no overlap");
                    return false;
                }
                query.set_caps_result(Arc::new(answer));
                true
            }
            Query::Allocation { .. } => match &self.propose {
                Some(propose) => propose(query),
                None => {
                    query.accept_allocation(None);
                    true
                }
            },
        }
    }

    fn event(&self, element: &Element, pad: &Pad, event: Event) -> bool {
        match event {
            Event::Caps(caps) => {
                if !caps.is_fixed() {
                    tracing::warn!(element = element.name(), "refusing unfixed caps");
                    return false;
                }
                pad.set_caps(caps);
                true
            }
            Event::Eos => {
                self.eos.store(true, Ordering::Release);
                tracing::debug!(element = element.name(), "end of stream");
                if let Some(bus) = element.bus() {
                    let _ = bus.post(Message::eos(element.name()));
                }
                true
            }
            Event::StreamStart { stream_id } => {
                tracing::debug!(element = element.name(), stream = stream_id.as_str(), "stream started");
                true
            }
        }
    }

    fn get_property(&self, key: &str) -> Result<PropertyValue> {
        match key {
            "rendered" => Ok(PropertyValue::Uint(
                self.rendered.load(Ordering::Relaxed) as u32,
            )),
            "eos" => Ok(PropertyValue::Bool(self.eos.load(Ordering::Acquire))),
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

    fn accept_caps(min: u32, max: u32) -> Arc<Caps> {
        Arc::new(Caps::from_structure(
            Structure::builder(media::VIDEO_RAW)
                .field(fields::WIDTH, Value::UintRange(UintRange::new(min, max, 1)))
                .build(),
        ))
    }

    fn sink_pad(element: &Element) -> Arc<Pad> {
        element.static_pad("sink").unwrap()
    }

    #[test]
    fn test_caps_query_intersects_filter() {
        let sink = Sink::builder("sink").caps(accept_caps(0, 1280)).build();
        let pad = sink_pad(&sink);

        let mut query = Query::caps(accept_caps(640, 1920));
        assert!(pad.query(&mut query));

        let answer = query.caps_result().unwrap();
        assert_eq!(
            answer.first().unwrap().get(fields::WIDTH),
            Some(&Value::UintRange(UintRange::new(640, 1280, 1)))
        );
    }

    #[test]
    fn test_caps_query_any_filter_returns_own_caps() {
        let own = accept_caps(0, 1280);
        let sink = Sink::builder("sink").caps(Arc::clone(&own)).build();
        let pad = sink_pad(&sink);

        let mut query = Query::caps(Arc::new(Caps::any()));
        assert!(pad.query(&mut query));
        assert_eq!(**query.caps_result().unwrap(), *own);
    }

    #[test]
    fn test_caps_query_disjoint_fails() {
        let sink = Sink::builder("sink").caps(accept_caps(0, 400)).build();
        let pad = sink_pad(&sink);

        let mut query = Query::caps(accept_caps(500, 900));
        assert!(!pad.query(&mut query));
        assert!(query.caps_result().is_none());
    }

    #[test]
    fn test_allocation_accepted_by_default() {
        let sink = Sink::builder("sink").build();
        let pad = sink_pad(&sink);

        let mut query = Query::allocation(Arc::new(Caps::any()));
        assert!(pad.query(&mut query));
        assert!(query.is_accepted());
    }

    #[test]
    fn test_custom_allocation_proposal() {
        let sink = Sink::builder("sink")
            .propose_allocation(|query| {
                query.accept_allocation(Some(crate::pool::PoolConfig {
                    min_buffers: 3,
                    ..crate::pool::PoolConfig::default()
                }));
                true
            })
            .build();
        let pad = sink_pad(&sink);

        let mut query = Query::allocation(Arc::new(Caps::any()));
        assert!(pad.query(&mut query));
        assert_eq!(query.proposed_pool().unwrap().min_buffers, 3);
    }

    #[test]
    fn test_caps_event_commits_fixed_caps() {
        let sink = Sink::builder("sink").caps(accept_caps(0, 1280)).build();
        let pad = sink_pad(&sink);

        let fixed = Arc::new(accept_caps(0, 1280).fixate().unwrap());
        assert!(pad.clone().send_event(Event::Caps(Arc::clone(&fixed))));
        assert!(Arc::ptr_eq(&pad.caps(), &fixed));

        // Unfixed caps are refused.
        assert!(!pad.clone().send_event(Event::Caps(accept_caps(0, 1280))));
    }

    #[test]
    fn test_eos_acknowledged_and_reported() {
        let bin = crate::bin::Bin::new("bin");
        let sink = Sink::builder("sink").build();
        bin.add(sink.clone()).unwrap();
        let pad = sink_pad(&sink);

        assert_eq!(sink.get_property("eos").unwrap(), PropertyValue::Bool(false));
        assert!(pad.send_event(Event::Eos));
        assert_eq!(sink.get_property("eos").unwrap(), PropertyValue::Bool(true));

        let msg = bin.bus().try_pop().unwrap();
        assert!(msg.matches(crate::message::mask::EOS));
        assert_eq!(msg.source(), "sink");
    }

    #[test]
    fn test_chain_counts_and_renders() {
        let sink = Sink::builder("sink")
            .render(|_, buffer| {
                assert_eq!(buffer.bytes_used(), 4);
                Ok(())
            })
            .build();
        let pad = sink_pad(&sink);

        let mut buffer = Buffer::allocate(16).unwrap();
        buffer.set_bytes_used(4);
        pad.chain(buffer).unwrap();

        assert_eq!(sink.get_property("rendered").unwrap(), PropertyValue::Uint(1));
    }
}
