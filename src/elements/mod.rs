//! Built-in pipeline elements.
//!
//! The four concrete element kinds:
//!
//! - [`Source`]: offers caps, negotiates once, then streams buffers from
//!   a pool on its own task thread
//! - [`Sink`]: terminal consumer answering negotiation queries
//! - [`Transform`]: in-chain processor with the two-phase caps relay
//! - [`CapsFilter`]: negotiation constraint with a post-negotiation
//!   dataflow bypass

mod capsfilter;
mod sink;
mod source;
mod transform;

pub use capsfilter::CapsFilter;
pub use sink::{Sink, SinkBuilder};
pub use source::{Source, SourceBuilder};
pub use transform::{Transform, TransformBuilder, TransformMode, TransformOps};
