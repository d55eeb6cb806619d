//! Data model for execution traces, spans and captured payloads.
//!
//! A `Trace` is the record of one outer AI-powered request. It owns a tree of
//! `Span`s (one per nested provider call, tool execution, etc.) addressed by
//! span id rather than by object reference, so concurrent paths can create
//! and finalize siblings without ownership cycles. `SpanMessage` rows capture
//! prompt/response payloads correlated to a span, append-only.

use crate::id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Enumerations ──────────────────────────────────────────────────────────

/// Where a span sits relative to the caller/callee boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// An outbound call to a remote service (the common case for LLM calls).
    Client,
    /// Handling an inbound request.
    Server,
    /// Work local to the process.
    #[default]
    Internal,
    /// Publishing to a queue or stream.
    Producer,
    /// Consuming from a queue or stream.
    Consumer,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
            Self::Internal => "internal",
            Self::Producer => "producer",
            Self::Consumer => "consumer",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "client" => Self::Client,
            "server" => Self::Server,
            "producer" => Self::Producer,
            "consumer" => Self::Consumer,
            _ => Self::Internal,
        }
    }
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final status of a span or trace.
///
/// `Unset` is only valid as a transient pre-finalize state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatusCode {
    #[default]
    Unset,
    Ok,
    Error,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unset => "unset",
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ok" => Self::Ok,
            "error" => Self::Error,
            _ => Self::Unset,
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The semantic category of a span's work.
///
/// The set is enumerated but open-ended: unrecognized names survive
/// round-trips through `Other` instead of being rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationName {
    /// A chat/completions call.
    Chat,
    /// An embeddings call.
    Embeddings,
    /// A tool execution requested by the model.
    ExecuteTool,
    /// A reranking call.
    Rerank,
    /// A legacy text-completion call.
    Completion,
    /// Any other operation, carrying its literal name.
    Other(String),
}

impl OperationName {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Chat => "chat",
            Self::Embeddings => "embeddings",
            Self::ExecuteTool => "execute_tool",
            Self::Rerank => "rerank",
            Self::Completion => "completion",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for OperationName {
    fn from(s: &str) -> Self {
        match s {
            "chat" => Self::Chat,
            "embeddings" => Self::Embeddings,
            "execute_tool" => Self::ExecuteTool,
            "rerank" => Self::Rerank,
            "completion" => Self::Completion,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for OperationName {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<OperationName> for String {
    fn from(op: OperationName) -> Self {
        op.as_str().to_string()
    }
}

impl std::fmt::Display for OperationName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The role of a captured message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Which side of the call a `SpanMessage` captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Input,
    Output,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "output" => Self::Output,
            "system" => Self::System,
            _ => Self::Input,
        }
    }
}

// ── Request parameters ────────────────────────────────────────────────────

/// Sampling parameters sent with an LLM request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
}

// ── Span ──────────────────────────────────────────────────────────────────

/// A timestamped annotation attached to a span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// A reference from one span to another, possibly in a different trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanLink {
    pub trace_id: String,
    pub span_id: String,
}

/// One instrumented sub-operation within a trace.
///
/// Token and partial fields accumulate while the span is open; everything is
/// frozen once the span is finalized (completed or failed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    /// Opaque row id.
    pub id: String,
    /// The owning trace (back-reference, not ownership).
    pub trace_id: String,
    /// 64-bit span id, 16 hex chars, unique.
    pub span_id: String,
    /// Parent span id within the same trace. None for the root span.
    pub parent_span_id: Option<String>,
    /// Human-readable span name.
    pub name: String,
    pub kind: SpanKind,
    pub start_time: DateTime<Utc>,
    /// Set exactly once at finalize.
    pub end_time: Option<DateTime<Utc>>,
    /// Wall-clock duration in nanoseconds; set exactly once at finalize.
    pub duration_ns: Option<u64>,
    pub operation_name: Option<OperationName>,
    pub provider_name: Option<String>,
    /// The model requested by the caller.
    pub request_model: Option<String>,
    /// The model the provider actually served.
    pub response_model: Option<String>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub cache_read_tokens: Option<u32>,
    pub cache_creation_tokens: Option<u32>,
    #[serde(default)]
    pub params: RequestParams,
    /// Upstream-reported termination causes, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finish_reasons: Vec<String>,
    pub status_code: StatusCode,
    pub status_description: Option<String>,
    /// Estimated cost in USD for this span alone, computed at completion.
    pub cost_estimate: Option<f64>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SpanEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<SpanLink>,
    pub created_at: DateTime<Utc>,
}

impl Span {
    /// Create a new open span belonging to `trace_id`.
    pub fn new(trace_id: impl Into<String>, name: impl Into<String>, kind: SpanKind) -> Self {
        let now = Utc::now();
        Self {
            id: id::new_record_id(),
            trace_id: trace_id.into(),
            span_id: id::new_span_id(),
            parent_span_id: None,
            name: name.into(),
            kind,
            start_time: now,
            end_time: None,
            duration_ns: None,
            operation_name: None,
            provider_name: None,
            request_model: None,
            response_model: None,
            input_tokens: None,
            output_tokens: None,
            cache_read_tokens: None,
            cache_creation_tokens: None,
            params: RequestParams::default(),
            finish_reasons: Vec::new(),
            status_code: StatusCode::Unset,
            status_description: None,
            cost_estimate: None,
            attributes: serde_json::Map::new(),
            events: Vec::new(),
            links: Vec::new(),
            created_at: now,
        }
    }

    /// Whether this span has been completed or failed.
    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }

    /// Duration in whole milliseconds, if finalized.
    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ns.map(|ns| ns / 1_000_000)
    }

    /// Total input + output tokens, 0 where unrecorded.
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens.unwrap_or(0) + self.output_tokens.unwrap_or(0)
    }

    /// Append a timestamped annotation.
    pub fn add_event(&mut self, name: impl Into<String>) {
        self.events.push(SpanEvent {
            name: name.into(),
            timestamp: Utc::now(),
            attributes: serde_json::Map::new(),
        });
    }

    /// Link this span to another span.
    pub fn add_link(&mut self, trace_id: impl Into<String>, span_id: impl Into<String>) {
        self.links.push(SpanLink {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
        });
    }
}

// ── Trace ─────────────────────────────────────────────────────────────────

/// The full record of one outer AI-powered request.
///
/// Aggregate fields (`total_spans`, token totals, `estimated_cost`) are zero
/// until finalize, then computed exactly once over all descendant spans.
/// A finalized trace is immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    /// Opaque row id.
    pub id: String,
    /// 128-bit trace id, 32 hex chars, globally unique.
    pub trace_id: String,
    pub service_name: String,
    pub start_time: DateTime<Utc>,
    /// Set exactly once, by finalize.
    pub end_time: Option<DateTime<Utc>>,
    /// Wall-clock duration in nanoseconds; derived at finalize.
    pub duration_ns: Option<u64>,
    pub status: StatusCode,
    /// The parentless span driving finalization. None until a span starts.
    pub root_span_id: Option<String>,
    pub total_spans: u32,
    pub total_input_tokens: u32,
    pub total_output_tokens: u32,
    /// Sum of descendant span estimates in USD, rounded to 6 fractional
    /// digits at finalize.
    pub estimated_cost: f64,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trace {
    /// Create a new open trace for `service_name`.
    pub fn new(service_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id::new_record_id(),
            trace_id: id::new_trace_id(),
            service_name: service_name.into(),
            start_time: now,
            end_time: None,
            duration_ns: None,
            status: StatusCode::Unset,
            root_span_id: None,
            total_spans: 0,
            total_input_tokens: 0,
            total_output_tokens: 0,
            estimated_cost: 0.0,
            metadata: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether finalize has run.
    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }

    /// Duration in whole milliseconds, if finalized.
    pub fn duration_ms(&self) -> Option<u64> {
        self.duration_ns.map(|ns| ns / 1_000_000)
    }
}

// ── SpanMessage ───────────────────────────────────────────────────────────

/// One role/content record inside a captured payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub role: Role,
    pub content: String,
}

impl MessageRecord {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A prompt or response payload captured for a span. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanMessage {
    /// Opaque row id.
    pub id: String,
    /// The span this payload belongs to.
    pub span_id: String,
    pub message_type: MessageType,
    pub messages: Vec<MessageRecord>,
    pub created_at: DateTime<Utc>,
}

impl SpanMessage {
    pub fn new(
        span_id: impl Into<String>,
        message_type: MessageType,
        messages: Vec<MessageRecord>,
    ) -> Self {
        Self {
            id: id::new_record_id(),
            span_id: span_id.into(),
            message_type,
            messages,
            created_at: Utc::now(),
        }
    }
}
