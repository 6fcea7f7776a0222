//! # riffle
//!
//! An embeddable media-pipeline engine: a capability-negotiation type
//! system and a graph of linkable processing elements that move
//! refcounted buffers between each other.
//!
//! ## Architecture
//!
//! - **The value lattice** ([`value`], [`structure`], [`caps`]):
//!   capabilities are ordered sets of typed constraints - scalars,
//!   fractions, stepped ranges, lists - that intersect and fixate.
//! - **Dataflow** ([`pad`], [`element`], [`elements`]): elements expose
//!   directional pads, linked after a caps compatibility check. Sources
//!   run one task thread per streaming pad; everything downstream
//!   executes synchronously on the pushing thread.
//! - **Negotiation**: a two-phase handshake per link - a caps query
//!   discovers common ground, a caps event commits the fixated choice,
//!   and an allocation query agrees on buffer provisioning.
//! - **Containers** ([`bin`], [`pipeline`]): linear chains transition
//!   sink-first; the pipeline surfaces messages on its [`bus`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use riffle::prelude::*;
//!
//! let source = Source::builder("camera").caps(offered).num_buffers(30).build();
//! let filter = CapsFilter::new("filter", constraint);
//! let sink = Sink::builder("display").caps(supported).build();
//!
//! source.link(&filter)?;
//! filter.link(&sink)?;
//!
//! let pipeline = Pipeline::new("play");
//! pipeline.add_many([source, filter, sink])?;
//! pipeline.set_state(State::Playing)?;
//!
//! pipeline.bus().pop_filtered(mask::EOS);
//! pipeline.set_state(State::Ready)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod bin;
pub mod buffer;
pub mod bus;
pub mod caps;
pub mod clock;
pub mod element;
pub mod elements;
pub mod error;
pub mod event;
pub mod message;
pub mod object;
pub mod pad;
pub mod pipeline;
pub mod pool;
pub mod query;
pub mod slots;
pub mod state;
pub mod structure;
pub mod task;
pub mod value;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::bin::Bin;
    pub use crate::buffer::Buffer;
    pub use crate::bus::Bus;
    pub use crate::caps::Caps;
    pub use crate::element::{Element, ElementImpl};
    pub use crate::elements::{CapsFilter, Sink, Source, Transform, TransformMode};
    pub use crate::error::{Error, Result};
    pub use crate::event::Event;
    pub use crate::message::{Message, MessageKind, mask};
    pub use crate::object::{Properties, PropertyValue};
    pub use crate::pad::{Pad, PadDirection};
    pub use crate::pipeline::Pipeline;
    pub use crate::pool::{BufferPool, PoolConfig, SlotPool};
    pub use crate::query::Query;
    pub use crate::state::{State, StateChange};
    pub use crate::structure::{Structure, fields, media};
    pub use crate::task::TaskPool;
    pub use crate::value::Value;
}

pub use error::{Error, Result};
