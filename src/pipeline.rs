//! The top-level pipeline container.
//!
//! A [`Pipeline`] is a bin with application plumbing: it posts
//! state-changed messages on its bus as transitions complete and stores
//! the running stream time and configured playback delay. Neither time is
//! derived by the engine; elements that know better update them.

use crate::bin::BinCore;
use crate::bus::Bus;
use crate::clock::ClockTime;
use crate::element::{Element, ElementImpl};
use crate::error::Result;
use crate::message::Message;
use crate::state::{StateChange, StateTransition};
use std::ops::Deref;
use std::sync::{Arc, Mutex};

struct PipelineImpl {
    core: BinCore,
    bus: Arc<Bus>,
    stream_time: Mutex<ClockTime>,
    delay: Mutex<ClockTime>,
}

impl ElementImpl for PipelineImpl {
    fn change_state(&self, element: &Element, transition: StateTransition) -> Result<StateChange> {
        let result = self.core.change_state_chain(element, transition)?;
        if result == StateChange::Success {
            let message = Message::state_changed(
                element.name(),
                transition.from_state(),
                transition.to_state(),
            );
            if let Err(e) = self.bus.post(message) {
                tracing::warn!(pipeline = element.name(), error = %e, "state message dropped");
            }
        }
        Ok(result)
    }

    fn provide_bus(&self) -> Option<Arc<Bus>> {
        Some(Arc::clone(&self.bus))
    }
}

/// A complete linear processing chain with a bus.
///
/// # Example
///
/// ```rust,ignore
/// use riffle::prelude::*;
///
/// let pipeline = Pipeline::new("play");
/// pipeline.add_many([source, filter, sink])?;
/// source.link(&filter)?;
/// filter.link(&sink)?;
///
/// pipeline.set_state(State::Playing)?;
/// let eos = pipeline.bus().pop_filtered(mask::EOS);
/// pipeline.set_state(State::Ready)?;
/// ```
pub struct Pipeline {
    element: Element,
    imp: Arc<PipelineImpl>,
}

impl Pipeline {
    /// Create an empty pipeline.
    pub fn new(name: impl Into<String>) -> Self {
        let imp = Arc::new(PipelineImpl {
            core: BinCore::new(),
            bus: Arc::new(Bus::new(64)),
            stream_time: Mutex::new(ClockTime::ZERO),
            delay: Mutex::new(ClockTime::ZERO),
        });
        let element = Element::new(name, imp.clone());
        Self { element, imp }
    }

    /// Add a child element.
    pub fn add(&self, child: Element) -> Result<()> {
        self.imp.core.add(&self.element, child)
    }

    /// Add several children, stopping at the first rejection.
    pub fn add_many(&self, children: impl IntoIterator<Item = Element>) -> Result<()> {
        for child in children {
            self.add(child)?;
        }
        Ok(())
    }

    /// Get the child elements.
    pub fn children(&self) -> Vec<Element> {
        self.imp.core.children()
    }

    /// Find a child by name.
    pub fn by_name(&self, name: &str) -> Option<Element> {
        self.imp.core.by_name(name)
    }

    /// Get the pipeline's bus.
    pub fn bus(&self) -> Arc<Bus> {
        Arc::clone(&self.imp.bus)
    }

    /// Get the accumulated stream time.
    pub fn stream_time(&self) -> ClockTime {
        *self.imp.stream_time.lock().unwrap()
    }

    /// Record the accumulated stream time.
    pub fn set_stream_time(&self, t: ClockTime) {
        *self.imp.stream_time.lock().unwrap() = t;
    }

    /// Get the configured playback delay.
    pub fn delay(&self) -> ClockTime {
        *self.imp.delay.lock().unwrap()
    }

    /// Configure the playback delay.
    pub fn set_delay(&self, t: ClockTime) {
        *self.imp.delay.lock().unwrap() = t;
    }

    /// Get the pipeline as an element.
    pub fn element(&self) -> &Element {
        &self.element
    }
}

impl Deref for Pipeline {
    type Target = Element;

    fn deref(&self) -> &Element {
        &self.element
    }
}
