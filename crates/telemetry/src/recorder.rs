//! The recorder — the only writer of trace/span state.
//!
//! Traces and their spans live in an `RwLock`-guarded arena keyed by id, so
//! sibling spans can be started and finalized from concurrently executing
//! paths. Every finalizing operation checks the span's finalized marker and
//! flips it under the write lock, which serializes racing finalize attempts:
//! exactly one wins, the rest get a `ValidationError` and mutate nothing.
//!
//! Lifecycle events are emitted synchronously after the arena lock is
//! released, so subscriber work never blocks an unrelated span.

use crate::pricing::PriceTable;
use chrono::Utc;
use ledgerline_core::error::ValidationError;
use ledgerline_core::event::{EventBus, EventContext, TraceEvent};
use ledgerline_core::model::{
    MessageRecord, MessageType, OperationName, RequestParams, Span, SpanKind, SpanMessage,
    StatusCode, Trace,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Everything the caller knows once a provider call has finished.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// The model the provider reports having served, when it differs from
    /// (or refines) the requested one.
    pub response_model: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_read_tokens: Option<u32>,
    pub cache_creation_tokens: Option<u32>,
    /// Authoritative finish reasons; replaces any streamed ones when
    /// non-empty.
    pub finish_reasons: Vec<String>,
    /// Provider-reported status; `"ok"`/`"success"` map to ok, anything
    /// else to error.
    pub raw_status: String,
}

/// Details of a failed (or canceled) operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanFailure {
    pub exception_class: String,
    pub message: String,
    pub code: Option<String>,
    pub location: Option<String>,
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl SpanFailure {
    pub fn new(exception_class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exception_class: exception_class.into(),
            message: message.into(),
            code: None,
            location: None,
            context: serde_json::Map::new(),
        }
    }

    /// A cancellation: distinct class so canceled spans never read as
    /// provider failures downstream.
    pub fn canceled(reason: impl Into<String>) -> Self {
        Self::new("Canceled", reason)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Derived values computed when a span completes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpanOutcome {
    pub duration_ms: u64,
    pub tokens_per_second: f64,
    pub cost_estimate: Option<f64>,
}

/// Throughput in tokens/second for a call of `duration_ms` milliseconds.
///
/// The epsilon floor keeps sub-millisecond calls from dividing by zero.
pub fn tokens_per_second(duration_ms: u64, input_tokens: u32, output_tokens: u32) -> f64 {
    let total = (input_tokens + output_tokens) as f64;
    let secs = (duration_ms as f64 / 1000.0).max(1e-9);
    total / secs
}

fn raw_status_is_ok(raw: &str) -> bool {
    raw.eq_ignore_ascii_case("ok") || raw.eq_ignore_ascii_case("success")
}

fn round_to_micro(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

struct TraceEntry {
    trace: Trace,
    spans: HashMap<String, Span>,
    /// Span ids in start order, for deterministic listing and aggregation.
    span_order: Vec<String>,
    messages: Vec<SpanMessage>,
}

#[derive(Default)]
struct RecorderState {
    traces: HashMap<String, TraceEntry>,
    /// span id → owning trace id, so spans are addressable on their own.
    span_index: HashMap<String, String>,
}

/// Creates, mutates and finalizes traces and spans, emitting lifecycle
/// events as the underlying operation progresses.
pub struct Recorder {
    bus: Arc<EventBus>,
    pricing: PriceTable,
    events_enabled: bool,
    state: RwLock<RecorderState>,
}

impl Recorder {
    /// A recorder with its own event bus.
    pub fn new(pricing: PriceTable) -> Self {
        Self::with_bus(pricing, Arc::new(EventBus::new()))
    }

    /// A recorder publishing onto an existing bus.
    pub fn with_bus(pricing: PriceTable, bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            pricing,
            events_enabled: true,
            state: RwLock::new(RecorderState::default()),
        }
    }

    /// Toggle lifecycle event emission (recording still happens).
    pub fn with_events_enabled(mut self, enabled: bool) -> Self {
        self.events_enabled = enabled;
        self
    }

    /// The bus subscribers register on.
    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn pricing(&self) -> &PriceTable {
        &self.pricing
    }

    // ── Trace lifecycle ───────────────────────────────────────────────

    /// Start a new trace for one outer request.
    pub fn start_trace(&self, service_name: &str) -> Trace {
        self.start_trace_with_metadata(service_name, serde_json::Map::new())
    }

    /// Start a trace carrying caller metadata (request id, tenant, ...).
    ///
    /// Metadata is fixed at creation; the only later mutation of a trace is
    /// its finalize step.
    pub fn start_trace_with_metadata(
        &self,
        service_name: &str,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Trace {
        let mut trace = Trace::new(service_name);
        trace.metadata = metadata;
        let mut state = self.state.write().unwrap();
        state.traces.insert(
            trace.trace_id.clone(),
            TraceEntry {
                trace: trace.clone(),
                spans: HashMap::new(),
                span_order: Vec::new(),
                messages: Vec::new(),
            },
        );
        debug!(trace_id = %trace.trace_id, service = %trace.service_name, "trace started");
        trace
    }

    /// Finalize a trace once its root span has completed.
    ///
    /// Computes the aggregate totals over all descendant spans exactly once.
    /// Rejects a second finalize without touching the recorded aggregates.
    pub fn finalize_trace(&self, trace_id: &str) -> Result<Trace, ValidationError> {
        let mut state = self.state.write().unwrap();
        let entry = state
            .traces
            .get_mut(trace_id)
            .ok_or_else(|| ValidationError::UnknownTrace(trace_id.to_string()))?;
        if entry.trace.is_finalized() {
            return Err(ValidationError::TraceAlreadyFinalized(trace_id.to_string()));
        }

        let mut input_total: u32 = 0;
        let mut output_total: u32 = 0;
        let mut cost_total = 0.0_f64;
        let mut any_error = false;
        for span in entry.spans.values() {
            input_total = input_total.saturating_add(span.input_tokens.unwrap_or(0));
            output_total = output_total.saturating_add(span.output_tokens.unwrap_or(0));
            cost_total += span.cost_estimate.unwrap_or(0.0);
            any_error |= span.status_code == StatusCode::Error;
        }

        let now = Utc::now();
        let trace = &mut entry.trace;
        trace.end_time = Some(now);
        trace.duration_ns = Some(
            (now - trace.start_time)
                .num_nanoseconds()
                .unwrap_or(i64::MAX)
                .max(0) as u64,
        );
        trace.status = if any_error {
            StatusCode::Error
        } else {
            StatusCode::Ok
        };
        trace.total_spans = entry.span_order.len() as u32;
        trace.total_input_tokens = input_total;
        trace.total_output_tokens = output_total;
        trace.estimated_cost = round_to_micro(cost_total);
        trace.updated_at = now;

        debug!(
            trace_id = %trace.trace_id,
            spans = trace.total_spans,
            cost = trace.estimated_cost,
            status = %trace.status,
            "trace finalized"
        );
        Ok(trace.clone())
    }

    // ── Span lifecycle ────────────────────────────────────────────────

    /// Start a span within `trace_id`.
    ///
    /// The first parentless span becomes the trace's root span; every other
    /// span must name an open parent in the same trace.
    pub fn start_span(
        &self,
        trace_id: &str,
        name: &str,
        kind: SpanKind,
        parent_span_id: Option<&str>,
    ) -> Result<Span, ValidationError> {
        let mut state = self.state.write().unwrap();
        let entry = state
            .traces
            .get_mut(trace_id)
            .ok_or_else(|| ValidationError::UnknownTrace(trace_id.to_string()))?;
        if entry.trace.is_finalized() {
            return Err(ValidationError::TraceAlreadyFinalized(trace_id.to_string()));
        }

        match parent_span_id {
            Some(parent_id) => {
                let parent = entry.spans.get(parent_id).ok_or_else(|| {
                    ValidationError::UnknownParentSpan {
                        trace_id: trace_id.to_string(),
                        parent_span_id: parent_id.to_string(),
                    }
                })?;
                if parent.is_finalized() {
                    return Err(ValidationError::ParentSpanFinalized(parent_id.to_string()));
                }
            }
            None => {
                // The parent/child relation must stay a strict tree.
                if entry.trace.root_span_id.is_some() {
                    return Err(ValidationError::RootSpanExists(trace_id.to_string()));
                }
            }
        }

        let mut span = Span::new(trace_id, name, kind);
        span.parent_span_id = parent_span_id.map(String::from);
        if parent_span_id.is_none() {
            entry.trace.root_span_id = Some(span.span_id.clone());
        }
        entry.spans.insert(span.span_id.clone(), span.clone());
        entry.span_order.push(span.span_id.clone());
        state
            .span_index
            .insert(span.span_id.clone(), trace_id.to_string());
        debug!(trace_id, span_id = %span.span_id, name, "span started");
        Ok(span)
    }

    /// Record that a provider request is being issued on an open span.
    pub fn record_request_started(
        &self,
        span_id: &str,
        provider: &str,
        model: &str,
        operation: OperationName,
        params: RequestParams,
    ) -> Result<(), ValidationError> {
        let event = {
            let mut state = self.state.write().unwrap();
            let span = Self::open_span_mut(&mut state, span_id)?;
            span.provider_name = Some(provider.to_string());
            span.request_model = Some(model.to_string());
            span.operation_name = Some(operation);
            span.params = params.clone();
            TraceEvent::RequestStarted {
                context: Self::context_of(span),
                parameters: params,
            }
        };
        self.emit(event);
        Ok(())
    }

    /// Update the running output-token count of an open, streaming span.
    ///
    /// Token counts are cumulative and monotonic; a late or reordered chunk
    /// can never shrink the recorded count. Nothing is persisted per chunk.
    pub fn record_token_streamed(
        &self,
        span_id: &str,
        cumulative_tokens: u32,
        is_final: bool,
        finish_reason: Option<&str>,
    ) -> Result<(), ValidationError> {
        let event = {
            let mut state = self.state.write().unwrap();
            let span = Self::open_span_mut(&mut state, span_id)?;
            let current = span.output_tokens.unwrap_or(0);
            span.output_tokens = Some(current.max(cumulative_tokens));
            if is_final {
                if let Some(reason) = finish_reason {
                    span.finish_reasons.push(reason.to_string());
                }
            }
            TraceEvent::TokenStreamed {
                context: Self::context_of(span),
                cumulative_tokens: span.output_tokens.unwrap_or(0),
                is_final,
                finish_reason: finish_reason.map(String::from),
            }
        };
        self.emit(event);
        Ok(())
    }

    /// Capture a prompt/response payload for a span. Append-only; allowed
    /// on finalized spans (the response payload usually lands after
    /// completion).
    pub fn record_message(
        &self,
        span_id: &str,
        message_type: MessageType,
        messages: Vec<MessageRecord>,
    ) -> Result<SpanMessage, ValidationError> {
        let mut state = self.state.write().unwrap();
        let trace_id = state
            .span_index
            .get(span_id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownSpan(span_id.to_string()))?;
        let entry = state
            .traces
            .get_mut(&trace_id)
            .ok_or_else(|| ValidationError::UnknownTrace(trace_id.clone()))?;
        let message = SpanMessage::new(span_id, message_type, messages);
        entry.messages.push(message.clone());
        Ok(message)
    }

    /// Set an attribute on an open span.
    pub fn annotate_span(
        &self,
        span_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), ValidationError> {
        let mut state = self.state.write().unwrap();
        let span = Self::open_span_mut(&mut state, span_id)?;
        span.attributes.insert(key.to_string(), value);
        Ok(())
    }

    /// Append a timestamped annotation to an open span.
    pub fn add_span_event(&self, span_id: &str, name: &str) -> Result<(), ValidationError> {
        let mut state = self.state.write().unwrap();
        let span = Self::open_span_mut(&mut state, span_id)?;
        span.add_event(name);
        Ok(())
    }

    /// Link an open span to another span (same trace or not).
    pub fn link_span(
        &self,
        span_id: &str,
        target_trace_id: &str,
        target_span_id: &str,
    ) -> Result<(), ValidationError> {
        let mut state = self.state.write().unwrap();
        let span = Self::open_span_mut(&mut state, span_id)?;
        span.add_link(target_trace_id, target_span_id);
        Ok(())
    }

    /// Complete an open span, computing all derived values and emitting
    /// `ResponseCompleted`.
    pub fn complete_span(
        &self,
        span_id: &str,
        completion: CompletionRecord,
    ) -> Result<SpanOutcome, ValidationError> {
        let (event, outcome) = {
            let mut state = self.state.write().unwrap();
            let span = Self::open_span_mut(&mut state, span_id)?;

            let now = Utc::now();
            let duration_ns = (now - span.start_time)
                .num_nanoseconds()
                .unwrap_or(i64::MAX)
                .max(0) as u64;
            span.end_time = Some(now);
            span.duration_ns = Some(duration_ns);
            span.status_code = if raw_status_is_ok(&completion.raw_status) {
                StatusCode::Ok
            } else {
                StatusCode::Error
            };
            if span.status_code == StatusCode::Error {
                span.status_description = Some(completion.raw_status.clone());
            }
            if completion.response_model.is_some() {
                span.response_model = completion.response_model.clone();
            }
            span.input_tokens = Some(completion.input_tokens);
            span.output_tokens = Some(completion.output_tokens);
            span.cache_read_tokens = completion.cache_read_tokens;
            span.cache_creation_tokens = completion.cache_creation_tokens;
            if !completion.finish_reasons.is_empty() {
                span.finish_reasons = completion.finish_reasons.clone();
            }

            let duration_ms = duration_ns / 1_000_000;
            let tps = tokens_per_second(
                duration_ms,
                completion.input_tokens,
                completion.output_tokens,
            );
            let cost = self.estimate_span_cost(span, &completion);
            span.cost_estimate = cost;

            let outcome = SpanOutcome {
                duration_ms,
                tokens_per_second: tps,
                cost_estimate: cost,
            };
            let event = TraceEvent::ResponseCompleted {
                context: Self::context_of(span),
                duration_ms,
                input_tokens: completion.input_tokens,
                output_tokens: completion.output_tokens,
                cache_read_tokens: completion.cache_read_tokens,
                cache_creation_tokens: completion.cache_creation_tokens,
                tokens_per_second: tps,
                cost_estimate: cost,
            };
            (event, outcome)
        };
        self.emit(event);
        Ok(outcome)
    }

    /// Fail an open span, emitting `ErrorOccurred`.
    pub fn fail_span(&self, span_id: &str, failure: SpanFailure) -> Result<(), ValidationError> {
        let event = {
            let mut state = self.state.write().unwrap();
            let span = Self::open_span_mut(&mut state, span_id)?;

            let now = Utc::now();
            span.end_time = Some(now);
            span.duration_ns = Some(
                (now - span.start_time)
                    .num_nanoseconds()
                    .unwrap_or(i64::MAX)
                    .max(0) as u64,
            );
            span.status_code = StatusCode::Error;
            span.status_description = Some(failure.message.clone());

            TraceEvent::ErrorOccurred {
                context: Self::context_of(span),
                exception_class: failure.exception_class,
                message: failure.message,
                code: failure.code,
                location: failure.location,
                details: failure.context,
            }
        };
        self.emit(event);
        Ok(())
    }

    /// Fail an open span with the distinct canceled class. Canceled
    /// operations must close their span rather than leave it open.
    pub fn cancel_span(&self, span_id: &str, reason: &str) -> Result<(), ValidationError> {
        self.fail_span(span_id, SpanFailure::canceled(reason))
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        let state = self.state.read().unwrap();
        state.traces.get(trace_id).map(|e| e.trace.clone())
    }

    pub fn get_span(&self, span_id: &str) -> Option<Span> {
        let state = self.state.read().unwrap();
        let trace_id = state.span_index.get(span_id)?;
        state
            .traces
            .get(trace_id)
            .and_then(|e| e.spans.get(span_id).cloned())
    }

    /// Spans of a trace in start order.
    pub fn spans_for_trace(&self, trace_id: &str) -> Vec<Span> {
        let state = self.state.read().unwrap();
        let Some(entry) = state.traces.get(trace_id) else {
            return Vec::new();
        };
        entry
            .span_order
            .iter()
            .filter_map(|id| entry.spans.get(id).cloned())
            .collect()
    }

    /// Captured payloads of a span, in capture order.
    pub fn messages_for_span(&self, span_id: &str) -> Vec<SpanMessage> {
        let state = self.state.read().unwrap();
        let Some(trace_id) = state.span_index.get(span_id) else {
            return Vec::new();
        };
        state
            .traces
            .get(trace_id)
            .map(|entry| {
                entry
                    .messages
                    .iter()
                    .filter(|m| m.span_id == span_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn trace_count(&self) -> usize {
        self.state.read().unwrap().traces.len()
    }

    // ── Internals ─────────────────────────────────────────────────────

    fn open_span_mut<'a>(
        state: &'a mut RecorderState,
        span_id: &str,
    ) -> Result<&'a mut Span, ValidationError> {
        let trace_id = state
            .span_index
            .get(span_id)
            .cloned()
            .ok_or_else(|| ValidationError::UnknownSpan(span_id.to_string()))?;
        let span = state
            .traces
            .get_mut(&trace_id)
            .and_then(|entry| entry.spans.get_mut(span_id))
            .ok_or_else(|| ValidationError::UnknownSpan(span_id.to_string()))?;
        if span.is_finalized() {
            return Err(ValidationError::SpanAlreadyFinalized(span_id.to_string()));
        }
        Ok(span)
    }

    fn estimate_span_cost(&self, span: &Span, completion: &CompletionRecord) -> Option<f64> {
        let provider = span.provider_name.as_deref()?;
        let model = span
            .response_model
            .as_deref()
            .or(span.request_model.as_deref())?;
        let cost = self.pricing.estimate(
            provider,
            model,
            completion.input_tokens,
            completion.output_tokens,
            completion.cache_read_tokens.unwrap_or(0),
            completion.cache_creation_tokens.unwrap_or(0),
        );
        if cost.is_none() {
            warn!(provider, model, "no price entry; span cost estimate unavailable");
        }
        cost
    }

    fn context_of(span: &Span) -> EventContext {
        EventContext {
            trace_id: span.trace_id.clone(),
            span_id: span.span_id.clone(),
            provider_name: span.provider_name.clone(),
            request_model: span.request_model.clone(),
            operation_name: span.operation_name.clone(),
            timestamp: Utc::now(),
        }
    }

    fn emit(&self, event: TraceEvent) {
        if self.events_enabled {
            self.bus.publish(&event);
        }
    }
}
