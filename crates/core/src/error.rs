//! Error types for the Ledgerline domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant. The taxonomy matters:
//! validation failures are fatal to the specific recorder call, subscriber
//! and persistence failures must never abort the instrumented AI operation.

use thiserror::Error;

/// The top-level error type for all Ledgerline operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Recording errors ---
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // --- Subscriber errors ---
    #[error("Subscriber error: {0}")]
    Subscriber(#[from] SubscriberError),

    // --- Persistence errors ---
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// A malformed or out-of-order recorder call. Fatal to that call only;
/// already-committed fields and aggregates are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown trace: {0}")]
    UnknownTrace(String),

    #[error("unknown span: {0}")]
    UnknownSpan(String),

    #[error("parent span {parent_span_id} does not exist in trace {trace_id}")]
    UnknownParentSpan {
        trace_id: String,
        parent_span_id: String,
    },

    #[error("parent span {0} is already finalized")]
    ParentSpanFinalized(String),

    #[error("trace {0} already has a root span; nested spans need a parent")]
    RootSpanExists(String),

    #[error("span {0} is already finalized")]
    SpanAlreadyFinalized(String),

    #[error("trace {0} is already finalized")]
    TraceAlreadyFinalized(String),
}

/// A fault raised inside an event subscriber. Isolated and logged by the
/// event bus, never propagated to the instrumented call.
#[derive(Debug, Clone, Error)]
pub enum SubscriberError {
    #[error("subscriber '{subscriber}' failed handling {event_kind}: {reason}")]
    Handler {
        subscriber: String,
        event_kind: String,
        reason: String,
    },

    #[error("sink '{sink}' rejected signal: {reason}")]
    Sink { sink: String, reason: String },
}

/// A storage collaborator failure. Surfaced to whatever layer invoked
/// persistence; the in-memory trace/span objects remain valid.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("migration failed: {0}")]
    MigrationFailed(String),
}
