//! # Ledgerline Core
//!
//! Domain types, lifecycle events, and error definitions for the Ledgerline
//! LLM observability runtime. This crate has **zero framework dependencies**
//! — it defines the trace/span data model and the contracts that all other
//! crates implement against.
//!
//! ## Design Philosophy
//!
//! Spans live in a flat arena keyed by span id; parent/child links are key
//! lookups, never object references. Enumerated fields are closed enums so
//! invalid states are unrepresentable. Everything downstream of recording
//! (metrics, alerting, export) consumes immutable lifecycle events.

pub mod error;
pub mod event;
pub mod id;
pub mod model;

// Re-export key types at crate root for ergonomics
pub use error::{Error, PersistenceError, Result, SubscriberError, ValidationError};
pub use event::{EventBus, EventContext, EventSubscriber, TraceEvent};
pub use model::{
    MessageRecord, MessageType, OperationName, RequestParams, Role, Span, SpanEvent, SpanKind,
    SpanLink, SpanMessage, StatusCode, Trace,
};
