//! Error types for riffle.

use thiserror::Error;

/// Result type alias using riffle's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for riffle operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Capability negotiation failed (no intersection, or caps could not
    /// be fixated or transformed).
    #[error("caps negotiation failed: {0}")]
    Negotiation(String),

    /// Two pads could not be linked.
    #[error("link rejected: {0}")]
    Link(String),

    /// A pad operation required a peer but the pad is unlinked.
    #[error("pad `{0}` is not linked")]
    NotLinked(String),

    /// A state transition was refused by an element.
    #[error("state change failed in `{element}`: {reason}")]
    StateChange {
        /// Name of the refusing element.
        element: String,
        /// Why the transition was refused.
        reason: String,
    },

    /// An element reported an asynchronous state change, which this engine
    /// does not resolve.
    #[error("async state change reported by `{0}` is not supported")]
    AsyncUnsupported(String),

    /// Memory allocation failed.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// Buffer pool has no free slot.
    #[error("buffer pool exhausted: no slots available")]
    PoolExhausted,

    /// Buffer pool operation attempted before `start` (or after `stop`).
    #[error("buffer pool is not started")]
    PoolNotStarted,

    /// Task pool has no free thread slot.
    #[error("task pool exhausted: no thread slots available")]
    TaskPoolExhausted,

    /// The bus FIFO is full and the message was not queued.
    #[error("bus queue is full")]
    BusFull,

    /// A container operation was rejected.
    #[error("container rejected element: {0}")]
    Container(String),

    /// Property key is not known to the element.
    #[error("unknown property `{0}`")]
    UnknownProperty(String),

    /// Property value has the wrong type for the key.
    #[error("invalid value for property `{0}`")]
    PropertyType(String),

    /// The element does not implement the invoked operation.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// I/O error (thread spawning).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
