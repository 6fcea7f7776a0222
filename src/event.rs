//! Pad-to-pad events.
//!
//! Events travel between linked pads to commit negotiated caps, mark the
//! start of a stream, and signal end-of-stream. They are distinct from
//! bus [`Message`](crate::message::Message)s, which travel app-ward.

use crate::caps::Caps;
use std::sync::Arc;

/// Flow direction of an event or query relative to the data flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Travels with the data, source to sink.
    Downstream,
    /// Travels against the data, sink to source.
    Upstream,
    /// May travel either way.
    Both,
}

/// An out-of-band notification flowing between pads.
#[derive(Debug, Clone)]
pub enum Event {
    /// Start of a new logical stream.
    StreamStart {
        /// Unique stream identifier.
        stream_id: String,
    },

    /// Commit fixed caps on the receiving pad.
    Caps(Arc<Caps>),

    /// End of stream - no more buffers will arrive.
    Eos,
}

impl Event {
    /// Get the flow direction of this event type.
    pub fn direction(&self) -> Direction {
        match self {
            Event::StreamStart { .. } | Event::Caps(_) | Event::Eos => Direction::Downstream,
        }
    }

    /// Check if this event flows with the data.
    pub fn is_downstream(&self) -> bool {
        matches!(self.direction(), Direction::Downstream | Direction::Both)
    }

    /// Check if this event flows against the data.
    pub fn is_upstream(&self) -> bool {
        matches!(self.direction(), Direction::Upstream | Direction::Both)
    }

    /// Get a human-readable name for this event type.
    pub fn name(&self) -> &'static str {
        match self {
            Event::StreamStart { .. } => "stream-start",
            Event::Caps(_) => "caps",
            Event::Eos => "eos",
        }
    }
}
