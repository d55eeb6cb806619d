//! SQLite persistence for Ledgerline.
//!
//! Three record sets — `traces`, `spans`, `span_messages` — written with a
//! fixed discipline: one insert when the record is created, at most one
//! update when it finalizes. The finalize update is predicated on the row
//! still being `unset`, so racing finalize attempts change zero rows instead
//! of double-aggregating.
//!
//! Persistence failures never invalidate the in-memory trace/span objects;
//! they surface as [`PersistenceError`](ledgerline_core::PersistenceError)
//! to whichever layer asked for the write.

pub mod sqlite;

pub use sqlite::{ServiceUsage, SqliteStore, UsageSummary};
