//! Custom error types for the snapshot lifecycle manager
//!
//! This module defines the error hierarchy for dump, prune and restore
//! operations using thiserror for ergonomic error definitions.

use thiserror::Error;

/// The main error type for snapshot lifecycle operations
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Source database unreachable or authentication failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// The engine's export tool reported a failure mid-stream
    #[error("Export failed: {0}")]
    ExportProcess(String),

    /// The engine's import tool reported a failure after the restore began
    #[error("Restore incomplete, target database may be inconsistent: {0}")]
    ImportProcess(String),

    /// The Snapshot Store ran out of space while writing a dump
    #[error("Disk full: {0}")]
    DiskFull(String),

    /// An explicitly named snapshot does not exist or is not complete
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// "latest" was requested but the store holds no complete snapshot
    #[error("No snapshot available in {0}")]
    NoSnapshotAvailable(String),

    /// A snapshot could not be deleted (non-fatal during pruning)
    #[error("Failed to delete snapshot {name}: {reason}")]
    Deletion { name: String, reason: String },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Restore target unreachable or authentication failed
    #[error("Restore target unreachable: {0}")]
    TargetUnreachable(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),
}

impl SnapshotError {
    /// Create a "not found" error for an explicit snapshot identifier
    pub fn snapshot_not_found(identifier: impl Into<String>) -> Self {
        Self::SnapshotNotFound(identifier.into())
    }

    /// Check if this is a "not found" style error
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SnapshotNotFound(_) | Self::NoSnapshotAvailable(_)
        )
    }

    /// Check if this error must abort the invocation that raised it
    ///
    /// Only deletion failures are reported without failing the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Deletion { .. })
    }
}

impl From<std::io::Error> for SnapshotError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::StorageFull {
            Self::DiskFull(err.to_string())
        } else {
            Self::Io(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias for snapshot lifecycle operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;
