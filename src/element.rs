//! Elements: the processing nodes of a pipeline.
//!
//! An [`Element`] is a cheap-to-clone handle over shared state: a name,
//! its pads, the state machine bookkeeping, and a boxed [`ElementImpl`]
//! supplying behavior. The four concrete kinds live in
//! [`crate::elements`]; containers are in [`crate::bin`] and
//! [`crate::pipeline`].
//!
//! # State machine
//!
//! [`Element::set_state`] walks the state ladder one adjacent step at a
//! time, invoking the implementation's `change_state` hook per step. A
//! failed step stops the walk without advancing the recorded state, so a
//! Ready-to-Playing request is exactly two transitions or none.

use crate::buffer::Buffer;
use crate::bus::Bus;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::object::{ObjectFlags, ObjectId, Properties, PropertyValue, unknown_property};
use crate::pad::{Pad, PadDirection};
use crate::query::Query;
use crate::state::{State, StateChange, StateTransition};
use std::sync::{Arc, Mutex, RwLock, Weak};

/// Element flag bits.
pub mod flags {
    /// The element has been added to a container.
    pub const IN_CONTAINER: u32 = 1 << 0;
}

#[derive(Clone, Copy)]
struct StateSet {
    current: State,
    target: State,
    pending: Option<State>,
}

pub(crate) struct ElementInner {
    name: String,
    id: Mutex<ObjectId>,
    pub(crate) flags: ObjectFlags,
    state: Mutex<StateSet>,
    srcpads: RwLock<Vec<Arc<Pad>>>,
    sinkpads: RwLock<Vec<Arc<Pad>>>,
    container: RwLock<Weak<ElementInner>>,
    imp: Arc<dyn ElementImpl>,
}

/// Behavior hooks for an element.
///
/// Every hook has a workable default: transitions succeed, events take the
/// default route, queries go unanswered, links are accepted. A concrete
/// element overrides what it needs.
pub trait ElementImpl: Send + Sync + 'static {
    /// Perform one adjacent state transition.
    fn change_state(&self, element: &Element, transition: StateTransition) -> Result<StateChange> {
        let _ = (element, transition);
        Ok(StateChange::Success)
    }

    /// Process one buffer arriving on a sink pad.
    fn chain(&self, element: &Element, pad: &Pad, buffer: Buffer) -> Result<()> {
        let _ = (element, pad, buffer);
        Err(Error::Unsupported("chain"))
    }

    /// Handle an event arriving on a pad.
    fn event(&self, element: &Element, pad: &Pad, event: Event) -> bool {
        default_event_route(element, pad, event)
    }

    /// Answer a query arriving on a pad.
    fn query(&self, element: &Element, pad: &Pad, query: &mut Query) -> bool {
        let _ = (element, pad, query);
        false
    }

    /// Accept or reject a link being formed on one of this element's pads.
    fn link_pad(&self, element: &Element, pad: &Pad, peer: &Pad) -> Result<()> {
        let _ = (element, pad, peer);
        Ok(())
    }

    /// Expose a bus to descendants (containers only).
    fn provide_bus(&self) -> Option<Arc<Bus>> {
        None
    }

    /// Set a named property.
    fn set_property(&self, key: &str, value: PropertyValue) -> Result<()> {
        let _ = value;
        Err(unknown_property(key))
    }

    /// Get a named property.
    fn get_property(&self, key: &str) -> Result<PropertyValue> {
        Err(unknown_property(key))
    }
}

/// The default event route.
///
/// An event whose direction matches the pad it arrived on (downstream on a
/// src pad, upstream on a sink pad) is forwarded to the pad's peer.
/// Otherwise it fans out to every pad of the opposite kind on the same
/// element, OR-reducing the handled results.
pub fn default_event_route(element: &Element, pad: &Pad, event: Event) -> bool {
    let outbound = match pad.direction() {
        PadDirection::Src => event.is_downstream(),
        PadDirection::Sink => event.is_upstream(),
    };
    if outbound {
        return pad.push_event(event);
    }

    let opposite = match pad.direction() {
        PadDirection::Src => element.sink_pads(),
        PadDirection::Sink => element.src_pads(),
    };
    let mut handled = false;
    for out in &opposite {
        handled |= out.send_event(event.clone());
    }
    handled
}

/// A handle to a shared element.
///
/// Clones refer to the same element; equality is identity.
#[derive(Clone)]
pub struct Element {
    inner: Arc<ElementInner>,
}

impl Element {
    /// Create an element with the given behavior.
    pub fn new(name: impl Into<String>, imp: Arc<dyn ElementImpl>) -> Self {
        Self {
            inner: Arc::new(ElementInner {
                name: name.into(),
                id: Mutex::new(ObjectId::UNSET),
                flags: ObjectFlags::new(),
                state: Mutex::new(StateSet {
                    current: State::Ready,
                    target: State::Ready,
                    pending: None,
                }),
                srcpads: RwLock::new(Vec::new()),
                sinkpads: RwLock::new(Vec::new()),
                container: RwLock::new(Weak::new()),
                imp,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ElementInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn imp(&self) -> &Arc<dyn ElementImpl> {
        &self.inner.imp
    }

    pub(crate) fn inner(&self) -> &Arc<ElementInner> {
        &self.inner
    }

    /// Get the element's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the element's container id.
    pub fn id(&self) -> ObjectId {
        *self.inner.id.lock().unwrap()
    }

    /// Set the element's container id.
    pub fn set_id(&self, id: ObjectId) {
        *self.inner.id.lock().unwrap() = id;
    }

    // ------------------------------------------------------------------
    // Pads
    // ------------------------------------------------------------------

    /// Add a pad to the element.
    ///
    /// The pad must not belong to another element yet.
    pub fn add_pad(&self, pad: Arc<Pad>) -> Result<()> {
        if pad.element().is_some() {
            return Err(Error::Link(format!(
                "pad `{}` already has a parent",
                pad.name()
            )));
        }
        pad.set_parent(&self.inner);
        match pad.direction() {
            PadDirection::Src => self.inner.srcpads.write().unwrap().push(pad),
            PadDirection::Sink => self.inner.sinkpads.write().unwrap().push(pad),
        }
        Ok(())
    }

    /// Get the element's src pads.
    pub fn src_pads(&self) -> Vec<Arc<Pad>> {
        self.inner.srcpads.read().unwrap().clone()
    }

    /// Get the element's sink pads.
    pub fn sink_pads(&self) -> Vec<Arc<Pad>> {
        self.inner.sinkpads.read().unwrap().clone()
    }

    /// Find a pad by name.
    pub fn static_pad(&self, name: &str) -> Option<Arc<Pad>> {
        self.src_pads()
            .into_iter()
            .chain(self.sink_pads())
            .find(|p| p.name() == name)
    }

    /// Link this element's first unlinked src pad to the first unlinked
    /// sink pad of `downstream`.
    pub fn link(&self, downstream: &Element) -> Result<()> {
        let src = self
            .src_pads()
            .into_iter()
            .find(|p| !p.is_linked())
            .ok_or_else(|| Error::Link(format!("`{}` has no free src pad", self.name())))?;
        let sink = downstream
            .sink_pads()
            .into_iter()
            .find(|p| !p.is_linked())
            .ok_or_else(|| Error::Link(format!("`{}` has no free sink pad", downstream.name())))?;
        Pad::link(&src, &sink)
    }

    // ------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------

    /// Get the current state.
    pub fn current_state(&self) -> State {
        self.inner.state.lock().unwrap().current
    }

    /// Get the most recently requested target state.
    pub fn target_state(&self) -> State {
        self.inner.state.lock().unwrap().target
    }

    /// Get the state of the in-flight transition, if any.
    pub fn pending_state(&self) -> Option<State> {
        self.inner.state.lock().unwrap().pending
    }

    /// Walk the state ladder to `target`, one adjacent transition at a
    /// time.
    ///
    /// Stops at the first non-success without advancing the recorded
    /// state; the error from the refusing transition is returned as-is.
    pub fn set_state(&self, target: State) -> Result<StateChange> {
        self.inner.state.lock().unwrap().target = target;

        loop {
            let current = self.current_state();
            if current == target {
                self.inner.state.lock().unwrap().pending = None;
                return Ok(StateChange::Success);
            }

            let next = current.step_toward(target);
            let Some(transition) = StateTransition::between(current, next) else {
                return Err(Error::StateChange {
                    element: self.name().to_string(),
                    reason: format!("no transition from {} to {}", current, next),
                });
            };

            self.inner.state.lock().unwrap().pending = Some(next);
            tracing::debug!(element = self.name(), %transition, "state transition");

            match self.perform_transition(transition) {
                Ok(StateChange::Success) => {}
                Ok(StateChange::Async) => return Ok(StateChange::Async),
                Err(e) => {
                    self.inner.state.lock().unwrap().pending = None;
                    return Err(e);
                }
            }
        }
    }

    /// Run a single transition through the implementation, recording the
    /// new state on success.
    pub(crate) fn perform_transition(&self, transition: StateTransition) -> Result<StateChange> {
        let result = self.inner.imp.change_state(self, transition)?;
        if result == StateChange::Success {
            let mut state = self.inner.state.lock().unwrap();
            state.current = transition.to_state();
            if state.pending == Some(state.current) {
                state.pending = None;
            }
        }
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Containment
    // ------------------------------------------------------------------

    pub(crate) fn set_container(&self, container: &Arc<ElementInner>) {
        *self.inner.container.write().unwrap() = Arc::downgrade(container);
    }

    /// Get the container this element was added to, if any.
    pub fn container(&self) -> Option<Element> {
        self.inner
            .container
            .read()
            .unwrap()
            .upgrade()
            .map(Element::from_inner)
    }

    /// Find the nearest enclosing bus.
    ///
    /// Checks this element first, then walks the container chain upward.
    pub fn bus(&self) -> Option<Arc<Bus>> {
        if let Some(bus) = self.inner.imp.provide_bus() {
            return Some(bus);
        }
        let mut cursor = self.container();
        while let Some(element) = cursor {
            if let Some(bus) = element.imp().provide_bus() {
                return Some(bus);
            }
            cursor = element.container();
        }
        None
    }
}

impl Properties for Element {
    fn set_property(&self, key: &str, value: PropertyValue) -> Result<()> {
        self.inner.imp.set_property(key, value)
    }

    fn get_property(&self, key: &str) -> Result<PropertyValue> {
        self.inner.imp.get_property(key)
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("name", &self.name())
            .field("state", &self.current_state())
            .field("srcpads", &self.src_pads().len())
            .field("sinkpads", &self.sink_pads().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Records every transition it is asked to perform and can be told to
    /// refuse one.
    struct Recorder {
        seen: StdMutex<Vec<StateTransition>>,
        fail_on: Option<StateTransition>,
    }

    impl Recorder {
        fn element(fail_on: Option<StateTransition>) -> (Element, Arc<Recorder>) {
            let imp = Arc::new(Recorder {
                seen: StdMutex::new(Vec::new()),
                fail_on,
            });
            (Element::new("recorder", imp.clone()), imp)
        }
    }

    impl ElementImpl for Recorder {
        fn change_state(
            &self,
            element: &Element,
            transition: StateTransition,
        ) -> Result<StateChange> {
            self.seen.lock().unwrap().push(transition);
            if self.fail_on == Some(transition) {
                return Err(Error::StateChange {
                    element: element.name().to_string(),
                    reason: "refused".into(),
                });
            }
            Ok(StateChange::Success)
        }
    }

    #[test]
    fn test_multi_level_move_decomposes() {
        let (element, imp) = Recorder::element(None);
        element.set_state(State::Playing).unwrap();

        assert_eq!(element.current_state(), State::Playing);
        assert_eq!(
            *imp.seen.lock().unwrap(),
            vec![
                StateTransition::ReadyToPaused,
                StateTransition::PausedToPlaying,
            ]
        );
    }

    #[test]
    fn test_failed_first_transition_stops_walk() {
        let (element, imp) = Recorder::element(Some(StateTransition::ReadyToPaused));
        let err = element.set_state(State::Playing).unwrap_err();

        assert!(matches!(err, Error::StateChange { .. }));
        // The second transition never ran, and the state did not advance.
        assert_eq!(*imp.seen.lock().unwrap(), vec![StateTransition::ReadyToPaused]);
        assert_eq!(element.current_state(), State::Ready);
        assert_eq!(element.pending_state(), None);
    }

    #[test]
    fn test_downward_walk() {
        let (element, imp) = Recorder::element(None);
        element.set_state(State::Playing).unwrap();
        imp.seen.lock().unwrap().clear();

        element.set_state(State::Ready).unwrap();
        assert_eq!(
            *imp.seen.lock().unwrap(),
            vec![
                StateTransition::PlayingToPaused,
                StateTransition::PausedToReady,
            ]
        );
    }

    #[test]
    fn test_set_state_noop_at_target() {
        let (element, imp) = Recorder::element(None);
        element.set_state(State::Ready).unwrap();
        assert!(imp.seen.lock().unwrap().is_empty());
    }

    struct Inert;
    impl ElementImpl for Inert {}

    #[test]
    fn test_add_pad_and_lookup() {
        let element = Element::new("e", Arc::new(Inert));
        let src = Pad::builder("src", PadDirection::Src).build();
        let sink = Pad::builder("sink", PadDirection::Sink).build();

        element.add_pad(src.clone()).unwrap();
        element.add_pad(sink).unwrap();

        assert_eq!(element.src_pads().len(), 1);
        assert_eq!(element.sink_pads().len(), 1);
        assert!(element.static_pad("src").is_some());
        assert!(element.static_pad("absent").is_none());
        assert_eq!(src.element().unwrap(), element);
    }

    #[test]
    fn test_pad_cannot_be_added_twice() {
        let a = Element::new("a", Arc::new(Inert));
        let b = Element::new("b", Arc::new(Inert));
        let pad = Pad::builder("src", PadDirection::Src).build();

        a.add_pad(pad.clone()).unwrap();
        assert!(matches!(b.add_pad(pad), Err(Error::Link(_))));
    }

    #[test]
    fn test_default_properties_unknown() {
        let element = Element::new("e", Arc::new(Inert));
        assert!(matches!(
            element.get_property("whatever"),
            Err(Error::UnknownProperty(_))
        ));
    }

    /// Rejects every link made on its pads.
    struct Rejecting;
    impl ElementImpl for Rejecting {
        fn link_pad(&self, _element: &Element, _pad: &Pad, _peer: &Pad) -> Result<()> {
            Err(Error::Link("rejected by hook".into()))
        }
    }

    #[test]
    fn test_link_hook_rejection_rolls_back_peers() {
        let up = Element::new("up", Arc::new(Inert));
        let down = Element::new("down", Arc::new(Rejecting));
        let src = Pad::builder("src", PadDirection::Src).build();
        let sink = Pad::builder("sink", PadDirection::Sink).build();
        up.add_pad(src.clone()).unwrap();
        down.add_pad(sink.clone()).unwrap();

        assert!(matches!(Pad::link(&src, &sink), Err(Error::Link(_))));
        assert!(!src.is_linked());
        assert!(!sink.is_linked());
    }
}
