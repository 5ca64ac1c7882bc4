//! Typed errors for dispatch and side-effect processing.

use causeway_events::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// No flow is registered for the pushed event's `(domain, type)`.
    #[error("no flow registered for {domain}/{event_type}")]
    UnknownFlow { domain: String, event_type: String },

    #[error("flow {domain}/{event_type} is registered more than once")]
    DuplicateFlow { domain: String, event_type: String },

    #[error("no side-effect handler registered for {kind}")]
    UnknownSideEffect { kind: String },

    #[error("side-effect handler for {kind} is registered more than once")]
    DuplicateSideEffect { kind: String },

    /// A flow handler returned an error.
    #[error("flow {domain}/{event_type} failed on event {event_id}: {source}")]
    Handler {
        domain: String,
        event_type: String,
        event_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// A side-effect handler returned an error.
    #[error("side effect {kind} failed: {source}")]
    SideEffect {
        kind: String,
        #[source]
        source: anyhow::Error,
    },

    /// A handler panicked. The shard keeps running.
    #[error("handler for {target} panicked: {message}")]
    HandlerPanicked { target: String, message: String },

    #[error("no side-effect queue is configured")]
    NoSideEffectQueue,

    #[error("queue is shut down")]
    QueueClosed,

    #[error(transparent)]
    Store(#[from] StoreError),
}
