//! Sink capabilities for metric observations and anomaly signals.
//!
//! The monitor never logs or alerts directly; it hands [`Signal`]s to an
//! injected sink. That keeps alerting behavior swappable (log, metrics
//! pipeline, pager) and keeps the monitor itself trivially testable.

use ledgerline_core::error::SubscriberError;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// A metric observation or anomaly raised by the monitor.
///
/// Signals describe spans, they are never written back into them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Signal {
    /// Throughput observation for a completed span.
    TokensPerSecond {
        trace_id: String,
        span_id: String,
        value: f64,
    },

    /// The span took longer than the configured threshold.
    SlowRequest {
        trace_id: String,
        span_id: String,
        duration_ms: u64,
        threshold_ms: u64,
    },

    /// The span cost more than the configured threshold.
    HighCost {
        trace_id: String,
        span_id: String,
        cost_usd: f64,
        threshold_usd: f64,
    },

    /// The span failed; exception metadata attached.
    RequestFailed {
        trace_id: String,
        span_id: String,
        exception_class: String,
        message: String,
    },
}

impl Signal {
    /// Stable snake_case name of the signal kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TokensPerSecond { .. } => "tokens_per_second",
            Self::SlowRequest { .. } => "slow_request",
            Self::HighCost { .. } => "high_cost",
            Self::RequestFailed { .. } => "request_failed",
        }
    }
}

/// Where anomaly signals go.
///
/// `emit` runs inline on the instrumented call path and must not block;
/// slow reporting belongs behind [`BufferedSink`].
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    fn emit(&self, signal: Signal) -> Result<(), SubscriberError>;
}

/// Emits signals as structured log lines.
pub struct TracingSink;

impl Sink for TracingSink {
    fn name(&self) -> &str {
        "tracing"
    }

    fn emit(&self, signal: Signal) -> Result<(), SubscriberError> {
        match &signal {
            Signal::TokensPerSecond {
                trace_id,
                span_id,
                value,
            } => {
                info!(trace_id, span_id, tokens_per_second = value, "throughput");
            }
            Signal::SlowRequest {
                trace_id,
                span_id,
                duration_ms,
                threshold_ms,
            } => {
                warn!(trace_id, span_id, duration_ms, threshold_ms, "slow request");
            }
            Signal::HighCost {
                trace_id,
                span_id,
                cost_usd,
                threshold_usd,
            } => {
                warn!(trace_id, span_id, cost_usd, threshold_usd, "high cost request");
            }
            Signal::RequestFailed {
                trace_id,
                span_id,
                exception_class,
                message,
            } => {
                error!(trace_id, span_id, exception_class, message, "request failed");
            }
        }
        Ok(())
    }
}

/// Forwards signals into a bounded channel for an external reporter task.
///
/// Emission never blocks the instrumented call: when the channel is full the
/// signal is dropped and counted, which is the best-effort contract slow
/// collectors get.
pub struct BufferedSink {
    tx: mpsc::Sender<Signal>,
    dropped: std::sync::atomic::AtomicU64,
}

impl BufferedSink {
    /// Create a sink and the receiver an exporter task should drain.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Signal>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: std::sync::atomic::AtomicU64::new(0),
            },
            rx,
        )
    }

    /// Signals dropped because the channel was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl Sink for BufferedSink {
    fn name(&self) -> &str {
        "buffered"
    }

    fn emit(&self, signal: Signal) -> Result<(), SubscriberError> {
        if let Err(err) = self.tx.try_send(signal) {
            self.dropped
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            warn!(error = %err, "signal channel full or closed; dropping signal");
        }
        Ok(())
    }
}

/// Collects signals in memory. Test use.
#[derive(Default)]
pub struct MemorySink {
    signals: Mutex<Vec<Signal>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<Signal> {
        std::mem::take(&mut *self.signals.lock().unwrap())
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn emit(&self, signal: Signal) -> Result<(), SubscriberError> {
        self.signals.lock().unwrap().push(signal);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slow(span: &str) -> Signal {
        Signal::SlowRequest {
            trace_id: "t".into(),
            span_id: span.into(),
            duration_ms: 6000,
            threshold_ms: 5000,
        }
    }

    #[test]
    fn memory_sink_collects_in_order() {
        let sink = MemorySink::new();
        sink.emit(slow("a")).unwrap();
        sink.emit(slow("b")).unwrap();
        let signals = sink.take();
        assert_eq!(signals.len(), 2);
        assert!(matches!(&signals[0], Signal::SlowRequest { span_id, .. } if span_id == "a"));
        assert!(sink.signals().is_empty());
    }

    #[tokio::test]
    async fn buffered_sink_forwards_without_blocking() {
        let (sink, mut rx) = BufferedSink::new(4);
        sink.emit(slow("a")).unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind(), "slow_request");
        assert_eq!(sink.dropped_count(), 0);
    }

    #[tokio::test]
    async fn buffered_sink_drops_when_full() {
        let (sink, _rx) = BufferedSink::new(1);
        sink.emit(slow("a")).unwrap();
        sink.emit(slow("b")).unwrap();
        assert_eq!(sink.dropped_count(), 1);
    }

    #[test]
    fn tracing_sink_never_fails() {
        let sink = TracingSink;
        assert!(sink.emit(slow("a")).is_ok());
        assert!(
            sink.emit(Signal::RequestFailed {
                trace_id: "t".into(),
                span_id: "s".into(),
                exception_class: "TimeoutError".into(),
                message: "timed out".into(),
            })
            .is_ok()
        );
    }
}
