//! Execution recording and cost estimation for Ledgerline.
//!
//! The [`Recorder`] is the only writer of trace/span state: callers start a
//! trace, open spans as nested operations begin, feed it request/stream/
//! completion/failure signals, and finalize the trace when the root span
//! completes. Each recording step emits a lifecycle event consumed by
//! registered subscribers. Cost estimates come from an explicitly supplied
//! [`PriceTable`].

pub mod pricing;
pub mod recorder;

pub use pricing::{ModelRate, PriceTable};
pub use recorder::{
    CompletionRecord, Recorder, SpanFailure, SpanOutcome, tokens_per_second,
};
