//! Audit entry data structures
//!
//! One entry per lifecycle event: a snapshot being created, failing, pruned,
//! deleted or restored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::SnapshotStatus;

/// Lifecycle events recorded in the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// A dump was published
    Create,
    /// A dump failed and its partial file was discarded
    CreateFailed,
    /// The retention enforcer removed a snapshot
    Prune,
    /// The retention enforcer could not remove a snapshot
    PruneFailed,
    /// An operator removed a snapshot
    Delete,
    /// A restore began overwriting its target
    RestoreStarted,
    /// A restore finished
    Restore,
    /// A restore failed
    RestoreFailed,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => write!(f, "CREATE"),
            Operation::CreateFailed => write!(f, "CREATE FAILED"),
            Operation::Prune => write!(f, "PRUNE"),
            Operation::PruneFailed => write!(f, "PRUNE FAILED"),
            Operation::Delete => write!(f, "DELETE"),
            Operation::RestoreStarted => write!(f, "RESTORE STARTED"),
            Operation::Restore => write!(f, "RESTORE"),
            Operation::RestoreFailed => write!(f, "RESTORE FAILED"),
        }
    }
}

/// A single journal entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the event occurred (UTC)
    pub timestamp: DateTime<Utc>,

    /// What happened
    pub operation: Operation,

    /// Snapshot file name
    pub snapshot: String,

    /// Snapshot state after the event, where it has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SnapshotStatus>,

    /// Database involved (`user@host:port/db`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Size, error text or other detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEntry {
    fn new(operation: Operation, snapshot: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            snapshot: snapshot.into(),
            status: None,
            database: None,
            detail: None,
        }
    }

    fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    fn with_status(mut self, status: SnapshotStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn created(snapshot: &str, source: &str, size_bytes: u64) -> Self {
        Self::new(Operation::Create, snapshot)
            .with_status(SnapshotStatus::Complete)
            .with_database(source)
            .with_detail(format!("{} bytes", size_bytes))
    }

    pub fn create_failed(snapshot: &str, source: &str, error: &str) -> Self {
        Self::new(Operation::CreateFailed, snapshot)
            .with_status(SnapshotStatus::Failed)
            .with_database(source)
            .with_detail(error)
    }

    pub fn pruned(snapshot: &str) -> Self {
        Self::new(Operation::Prune, snapshot)
    }

    pub fn prune_failed(snapshot: &str, reason: &str) -> Self {
        Self::new(Operation::PruneFailed, snapshot)
            .with_status(SnapshotStatus::Complete)
            .with_detail(reason)
    }

    pub fn deleted(snapshot: &str) -> Self {
        Self::new(Operation::Delete, snapshot)
    }

    pub fn restore_started(snapshot: &str, target: &str) -> Self {
        Self::new(Operation::RestoreStarted, snapshot).with_database(target)
    }

    pub fn restored(snapshot: &str, target: &str, bytes: u64) -> Self {
        Self::new(Operation::Restore, snapshot)
            .with_database(target)
            .with_detail(format!("{} bytes replayed", bytes))
    }

    pub fn restore_failed(snapshot: &str, target: &str, error: &str) -> Self {
        Self::new(Operation::RestoreFailed, snapshot)
            .with_database(target)
            .with_detail(error)
    }

    /// Format the entry for human-readable output
    pub fn format_human_readable(&self) -> String {
        let mut output = format!(
            "[{}] {} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.operation,
            self.snapshot
        );

        if let Some(database) = &self.database {
            output.push_str(&format!(" ({})", database));
        }

        if let Some(detail) = &self.detail {
            output.push_str(&format!("\n  {}", detail));
        }

        output
    }
}
