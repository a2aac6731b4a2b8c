//! Lifecycle journal
//!
//! Records every snapshot creation, failure, prune, delete and restore in an
//! append-only JSONL file next to the configuration, so operators can answer
//! "what happened to the store, and when" after the fact.
//!
//! - `AuditEntry`: one event with timestamp, operation, snapshot name and
//!   optional database and detail.
//! - `AuditLogger`: appends entries and reads them back.

mod entry;
mod logger;

pub use entry::{AuditEntry, Operation};
pub use logger::AuditLogger;
