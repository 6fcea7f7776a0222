//! Container elements.
//!
//! A [`Bin`] owns a linear chain of child elements and drives their state
//! transitions sink-first: the terminal sink transitions before the
//! elements feeding it, so no element streams into a peer that is not
//! ready. The walk follows each element's first sink pad to its upstream
//! peer and is only correct for unbranched chains.

use crate::bus::Bus;
use crate::element::{self, Element, ElementImpl};
use crate::error::{Error, Result};
use crate::object::ObjectId;
use crate::state::{StateChange, StateTransition};
use std::ops::Deref;
use std::sync::{Arc, Mutex};

/// Child registry and chain-walk logic shared by bins and pipelines.
pub(crate) struct BinCore {
    children: Mutex<Vec<Element>>,
}

impl BinCore {
    pub(crate) fn new() -> Self {
        Self {
            children: Mutex::new(Vec::new()),
        }
    }

    /// Add a child, claiming exclusive ownership.
    ///
    /// Rejects elements already inside a container, duplicate names, and
    /// duplicate explicit ids. An unset id is assigned the lowest free
    /// one.
    pub(crate) fn add(&self, container: &Element, child: Element) -> Result<()> {
        if child
            .inner()
            .flags
            .test_and_set(element::flags::IN_CONTAINER)
        {
            return Err(Error::Container(format!(
                "`{}` is already in a container",
                child.name()
            )));
        }

        let mut children = self.children.lock().unwrap();

        let clash = children.iter().any(|c| c.name() == child.name())
            || (!child.id().is_unset() && children.iter().any(|c| c.id() == child.id()));
        if clash {
            child.inner().flags.clear(element::flags::IN_CONTAINER);
            return Err(Error::Container(format!(
                "duplicate child `{}`",
                child.name()
            )));
        }

        if child.id().is_unset() {
            let next = (0..0xFF)
                .map(ObjectId)
                .find(|id| !children.iter().any(|c| c.id() == *id));
            if let Some(id) = next {
                child.set_id(id);
            }
        }

        child.set_container(container.inner());
        tracing::debug!(
            container = container.name(),
            child = child.name(),
            "child added"
        );
        children.push(child);
        Ok(())
    }

    pub(crate) fn children(&self) -> Vec<Element> {
        self.children.lock().unwrap().clone()
    }

    pub(crate) fn by_name(&self, name: &str) -> Option<Element> {
        self.children
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    /// Apply one transition to every child, terminal sink first.
    ///
    /// Starting from the child with no src pads, the walk follows each
    /// element's first sink pad to its upstream peer until it reaches the
    /// terminal source. Any non-success stops the walk and propagates.
    // TODO: replace the linear walk with a topological sort once branching
    // chains are supported.
    pub(crate) fn change_state_chain(
        &self,
        container: &Element,
        transition: StateTransition,
    ) -> Result<StateChange> {
        let children = self.children();
        if children.is_empty() {
            return Ok(StateChange::Success);
        }

        let mut cursor = children
            .iter()
            .find(|c| c.src_pads().is_empty())
            .cloned()
            .ok_or_else(|| Error::StateChange {
                element: container.name().to_string(),
                reason: "chain has no terminal sink".into(),
            })?;

        loop {
            match cursor.perform_transition(transition)? {
                StateChange::Success => {}
                StateChange::Async => {
                    return Err(Error::AsyncUnsupported(cursor.name().to_string()));
                }
            }

            let sinkpads = cursor.sink_pads();
            let Some(first) = sinkpads.first() else {
                // Terminal source reached.
                break;
            };
            let peer = first.peer().ok_or_else(|| Error::StateChange {
                element: cursor.name().to_string(),
                reason: "sink pad unlinked mid-chain".into(),
            })?;
            cursor = peer.element().ok_or_else(|| Error::StateChange {
                element: cursor.name().to_string(),
                reason: "upstream pad has no element".into(),
            })?;
        }

        Ok(StateChange::Success)
    }
}

struct BinImpl {
    core: BinCore,
    bus: Arc<Bus>,
}

impl ElementImpl for BinImpl {
    fn change_state(&self, element: &Element, transition: StateTransition) -> Result<StateChange> {
        self.core.change_state_chain(element, transition)
    }

    fn provide_bus(&self) -> Option<Arc<Bus>> {
        Some(Arc::clone(&self.bus))
    }
}

/// A container element owning a linear chain of children.
///
/// Dereferences to [`Element`], so state changes go through
/// [`Element::set_state`] as usual and decompose into per-child
/// transitions.
pub struct Bin {
    element: Element,
    imp: Arc<BinImpl>,
}

impl Bin {
    /// Create an empty bin.
    pub fn new(name: impl Into<String>) -> Self {
        let imp = Arc::new(BinImpl {
            core: BinCore::new(),
            bus: Arc::new(Bus::new(32)),
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

    /// Get the bin's bus.
    pub fn bus(&self) -> Arc<Bus> {
        Arc::clone(&self.imp.bus)
    }

    /// Get the bin as an element.
    pub fn element(&self) -> &Element {
        &self.element
    }
}

impl Deref for Bin {
    type Target = Element;

    fn deref(&self) -> &Element {
        &self.element
    }
}
