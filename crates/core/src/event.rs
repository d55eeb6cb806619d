//! Lifecycle event system — how the recorder talks to metric and alerting
//! subscribers.
//!
//! Events are published at the point of emission inside the recorder call,
//! synchronously and in order, so a subscriber sees `RequestStarted` before
//! the `TokenStreamed` chunks of the same span. Observability is best-effort:
//! a subscriber that fails is logged and skipped, never allowed to break the
//! instrumented operation.

use crate::error::SubscriberError;
use crate::model::{OperationName, RequestParams};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Context shared by every lifecycle event kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventContext {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<OperationName>,
    pub timestamp: DateTime<Utc>,
}

/// All lifecycle events raised along the instrumented call path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TraceEvent {
    /// A provider request is about to be issued on an open span.
    RequestStarted {
        context: EventContext,
        parameters: RequestParams,
    },

    /// A streamed chunk updated the running token count of an open span.
    TokenStreamed {
        context: EventContext,
        cumulative_tokens: u32,
        is_final: bool,
        finish_reason: Option<String>,
    },

    /// A span completed, carrying every derived value.
    ResponseCompleted {
        context: EventContext,
        duration_ms: u64,
        input_tokens: u32,
        output_tokens: u32,
        cache_read_tokens: Option<u32>,
        cache_creation_tokens: Option<u32>,
        tokens_per_second: f64,
        cost_estimate: Option<f64>,
    },

    /// A span failed (including explicit cancellation).
    ErrorOccurred {
        context: EventContext,
        exception_class: String,
        message: String,
        code: Option<String>,
        location: Option<String>,
        details: serde_json::Map<String, serde_json::Value>,
    },
}

impl TraceEvent {
    /// The shared context of this event.
    pub fn context(&self) -> &EventContext {
        match self {
            Self::RequestStarted { context, .. }
            | Self::TokenStreamed { context, .. }
            | Self::ResponseCompleted { context, .. }
            | Self::ErrorOccurred { context, .. } => context,
        }
    }

    /// Stable snake_case name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequestStarted { .. } => "request_started",
            Self::TokenStreamed { .. } => "token_streamed",
            Self::ResponseCompleted { .. } => "response_completed",
            Self::ErrorOccurred { .. } => "error_occurred",
        }
    }
}

/// A consumer of lifecycle events.
///
/// Handlers run inline on the instrumented call path, so they must be fast
/// and non-blocking; anything slow belongs behind an asynchronous sink.
pub trait EventSubscriber: Send + Sync {
    /// Stable name used in isolation diagnostics.
    fn name(&self) -> &str;

    /// Handle one event. Errors are isolated by the bus.
    fn on_event(&self, event: &TraceEvent) -> Result<(), SubscriberError>;
}

/// Synchronous, ordered delivery of lifecycle events to registered
/// subscribers.
///
/// Unlike a broadcast channel, delivery happens on the publishing thread in
/// registration order, which is what gives metric subscribers a consistent
/// view of each span's start → stream → end sequence.
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Register a subscriber. Registration order is delivery order.
    pub fn register(&self, subscriber: Arc<dyn EventSubscriber>) {
        let mut subs = self.subscribers.write().unwrap();
        subs.push(subscriber);
    }

    /// Deliver `event` to every subscriber, in order, swallowing and logging
    /// subscriber faults.
    pub fn publish(&self, event: &TraceEvent) {
        let subs = self.subscribers.read().unwrap();
        for subscriber in subs.iter() {
            if let Err(err) = subscriber.on_event(event) {
                tracing::warn!(
                    subscriber = subscriber.name(),
                    event = event.kind(),
                    error = %err,
                    "event subscriber failed; continuing"
                );
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn context() -> EventContext {
        EventContext {
            trace_id: "0af7651916cd43dd8448eb211c80319c".into(),
            span_id: "b7ad6b7169203331".into(),
            provider_name: Some("openai".into()),
            request_model: Some("gpt-4".into()),
            operation_name: Some(OperationName::Chat),
            timestamp: Utc::now(),
        }
    }

    struct Capture {
        name: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl EventSubscriber for Capture {
        fn name(&self) -> &str {
            self.name
        }

        fn on_event(&self, event: &TraceEvent) -> Result<(), SubscriberError> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, event.kind()));
            Ok(())
        }
    }

    struct AlwaysFails;

    impl EventSubscriber for AlwaysFails {
        fn name(&self) -> &str {
            "always_fails"
        }

        fn on_event(&self, event: &TraceEvent) -> Result<(), SubscriberError> {
            Err(SubscriberError::Handler {
                subscriber: "always_fails".into(),
                event_kind: event.kind().into(),
                reason: "intentional".into(),
            })
        }
    }

    #[test]
    fn delivers_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.register(Arc::new(Capture {
            name: "first",
            seen: seen.clone(),
        }));
        bus.register(Arc::new(Capture {
            name: "second",
            seen: seen.clone(),
        }));

        bus.publish(&TraceEvent::RequestStarted {
            context: context(),
            parameters: RequestParams::default(),
        });

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                "first:request_started".to_string(),
                "second:request_started".to_string()
            ]
        );
    }

    #[test]
    fn subscriber_failure_does_not_stop_delivery() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        bus.register(Arc::new(AlwaysFails));
        bus.register(Arc::new(Capture {
            name: "after",
            seen: seen.clone(),
        }));

        bus.publish(&TraceEvent::ErrorOccurred {
            context: context(),
            exception_class: "TimeoutError".into(),
            message: "provider timed out".into(),
            code: Some("504".into()),
            location: None,
            details: serde_json::Map::new(),
        });

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(&TraceEvent::TokenStreamed {
            context: context(),
            cumulative_tokens: 12,
            is_final: false,
            finish_reason: None,
        });
    }

    #[test]
    fn event_kind_and_context_accessors() {
        let event = TraceEvent::ResponseCompleted {
            context: context(),
            duration_ms: 2000,
            input_tokens: 50,
            output_tokens: 150,
            cache_read_tokens: None,
            cache_creation_tokens: None,
            tokens_per_second: 100.0,
            cost_estimate: Some(0.06),
        };
        assert_eq!(event.kind(), "response_completed");
        assert_eq!(event.context().span_id, "b7ad6b7169203331");
    }
}
