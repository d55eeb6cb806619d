//! Identifier allocation for traces and spans.
//!
//! Ids must be collision-free without coordination, so both widths are drawn
//! from freshly generated v4 UUIDs: 128 bits for trace ids, the leading
//! 64 bits for span ids. Both render as fixed-width lowercase hex.

use uuid::Uuid;

/// Length of a trace id in hex characters (128 bits).
pub const TRACE_ID_LEN: usize = 32;

/// Length of a span id in hex characters (64 bits).
pub const SPAN_ID_LEN: usize = 16;

/// Allocate a new 128-bit trace id as a 32-char lowercase hex string.
pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Allocate a new 64-bit span id as a 16-char lowercase hex string.
pub fn new_span_id() -> String {
    let b = Uuid::new_v4().into_bytes();
    let word = u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
    format!("{word:016x}")
}

/// Allocate an opaque row id (used for the `id` column of every record set).
pub fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

/// Whether `s` is a well-formed trace id.
pub fn is_trace_id(s: &str) -> bool {
    s.len() == TRACE_ID_LEN && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

/// Whether `s` is a well-formed span id.
pub fn is_span_id(s: &str) -> bool {
    s.len() == SPAN_ID_LEN && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}
