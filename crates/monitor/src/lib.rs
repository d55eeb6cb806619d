//! Default metrics/anomaly subscriber for Ledgerline.
//!
//! Consumes lifecycle events from the recorder's bus, computes derived
//! metrics, and raises slow-request / high-cost / failure signals through an
//! injected [`Sink`]. Thresholds are explicit configuration, not process
//! state, and signals never mutate the trace/span records they describe.

pub mod sink;

pub use sink::{BufferedSink, MemorySink, Signal, Sink, TracingSink};

use ledgerline_core::error::SubscriberError;
use ledgerline_core::event::{EventSubscriber, TraceEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Anomaly thresholds for the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Spans slower than this raise `slow_request`.
    pub slow_request_ms: u64,
    /// Spans costing more than this (USD) raise `high_cost`.
    pub cost_alert_usd: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            slow_request_ms: 5000,
            cost_alert_usd: 0.1,
        }
    }
}

/// The default event subscriber: throughput metrics plus threshold alarms.
///
/// Failures are forwarded as diagnostics only; retrying the underlying
/// operation is the caller's responsibility.
pub struct MetricsMonitor {
    thresholds: AlertThresholds,
    sink: Arc<dyn Sink>,
}

impl MetricsMonitor {
    pub fn new(thresholds: AlertThresholds, sink: Arc<dyn Sink>) -> Self {
        Self { thresholds, sink }
    }

    /// Monitor with default thresholds, logging through [`TracingSink`].
    pub fn with_defaults() -> Self {
        Self::new(AlertThresholds::default(), Arc::new(TracingSink))
    }

    pub fn thresholds(&self) -> AlertThresholds {
        self.thresholds
    }
}

impl EventSubscriber for MetricsMonitor {
    fn name(&self) -> &str {
        "metrics_monitor"
    }

    fn on_event(&self, event: &TraceEvent) -> Result<(), SubscriberError> {
        match event {
            TraceEvent::ResponseCompleted {
                context,
                duration_ms,
                tokens_per_second,
                cost_estimate,
                ..
            } => {
                self.sink.emit(Signal::TokensPerSecond {
                    trace_id: context.trace_id.clone(),
                    span_id: context.span_id.clone(),
                    value: *tokens_per_second,
                })?;

                if *duration_ms > self.thresholds.slow_request_ms {
                    self.sink.emit(Signal::SlowRequest {
                        trace_id: context.trace_id.clone(),
                        span_id: context.span_id.clone(),
                        duration_ms: *duration_ms,
                        threshold_ms: self.thresholds.slow_request_ms,
                    })?;
                }

                if let Some(cost) = cost_estimate {
                    if *cost > self.thresholds.cost_alert_usd {
                        self.sink.emit(Signal::HighCost {
                            trace_id: context.trace_id.clone(),
                            span_id: context.span_id.clone(),
                            cost_usd: *cost,
                            threshold_usd: self.thresholds.cost_alert_usd,
                        })?;
                    }
                }
                Ok(())
            }
            TraceEvent::ErrorOccurred {
                context,
                exception_class,
                message,
                ..
            } => self.sink.emit(Signal::RequestFailed {
                trace_id: context.trace_id.clone(),
                span_id: context.span_id.clone(),
                exception_class: exception_class.clone(),
                message: message.clone(),
            }),
            // Start/stream events carry no derived metrics yet.
            TraceEvent::RequestStarted { .. } | TraceEvent::TokenStreamed { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ledgerline_core::event::EventContext;
    use ledgerline_core::model::OperationName;

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

    fn completed(duration_ms: u64, cost: Option<f64>) -> TraceEvent {
        TraceEvent::ResponseCompleted {
            context: context(),
            duration_ms,
            input_tokens: 50,
            output_tokens: 150,
            cache_read_tokens: None,
            cache_creation_tokens: None,
            tokens_per_second: 200.0 / (duration_ms as f64 / 1000.0),
            cost_estimate: cost,
        }
    }

    fn monitor_with_memory() -> (MetricsMonitor, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (
            MetricsMonitor::new(AlertThresholds::default(), sink.clone()),
            sink,
        )
    }

    #[test]
    fn forwards_tokens_per_second() {
        let (monitor, sink) = monitor_with_memory();
        monitor.on_event(&completed(2000, Some(0.01))).unwrap();

        let signals = sink.signals();
        assert_eq!(signals.len(), 1);
        assert!(
            matches!(&signals[0], Signal::TokensPerSecond { value, .. } if (*value - 100.0).abs() < 1e-9)
        );
    }

    #[test]
    fn slow_request_over_default_threshold() {
        let (monitor, sink) = monitor_with_memory();
        monitor.on_event(&completed(6000, Some(0.01))).unwrap();

        let kinds: Vec<_> = sink.signals().iter().map(|s| s.kind()).collect();
        assert!(kinds.contains(&"slow_request"));
    }

    #[test]
    fn at_threshold_is_not_slow() {
        let (monitor, sink) = monitor_with_memory();
        monitor.on_event(&completed(5000, None)).unwrap();

        let kinds: Vec<_> = sink.signals().iter().map(|s| s.kind()).collect();
        assert!(!kinds.contains(&"slow_request"));
    }

    #[test]
    fn high_cost_over_threshold() {
        let (monitor, sink) = monitor_with_memory();
        monitor.on_event(&completed(1000, Some(0.25))).unwrap();

        let signals = sink.signals();
        assert!(signals.iter().any(|s| matches!(
            s,
            Signal::HighCost { cost_usd, threshold_usd, .. }
                if (*cost_usd - 0.25).abs() < 1e-9 && (*threshold_usd - 0.1).abs() < 1e-9
        )));
    }

    #[test]
    fn missing_cost_estimate_raises_no_cost_alarm() {
        let (monitor, sink) = monitor_with_memory();
        monitor.on_event(&completed(1000, None)).unwrap();

        let kinds: Vec<_> = sink.signals().iter().map(|s| s.kind()).collect();
        assert_eq!(kinds, vec!["tokens_per_second"]);
    }

    #[test]
    fn failure_forwards_exception_metadata() {
        let (monitor, sink) = monitor_with_memory();
        monitor
            .on_event(&TraceEvent::ErrorOccurred {
                context: context(),
                exception_class: "RateLimitError".into(),
                message: "429 from provider".into(),
                code: Some("429".into()),
                location: None,
                details: serde_json::Map::new(),
            })
            .unwrap();

        let signals = sink.signals();
        assert!(matches!(
            &signals[0],
            Signal::RequestFailed { exception_class, .. } if exception_class == "RateLimitError"
        ));
    }

    #[test]
    fn start_and_stream_events_are_ignored() {
        let (monitor, sink) = monitor_with_memory();
        monitor
            .on_event(&TraceEvent::TokenStreamed {
                context: context(),
                cumulative_tokens: 10,
                is_final: false,
                finish_reason: None,
            })
            .unwrap();
        assert!(sink.signals().is_empty());
    }

    #[test]
    fn custom_thresholds_apply() {
        let sink = Arc::new(MemorySink::new());
        let monitor = MetricsMonitor::new(
            AlertThresholds {
                slow_request_ms: 100,
                cost_alert_usd: 0.001,
            },
            sink.clone(),
        );
        monitor.on_event(&completed(200, Some(0.002))).unwrap();

        let kinds: Vec<_> = sink.signals().iter().map(|s| s.kind()).collect();
        assert!(kinds.contains(&"slow_request"));
        assert!(kinds.contains(&"high_cost"));
    }
}
