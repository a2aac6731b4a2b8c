//! Audit logger for the append-only lifecycle journal
//!
//! Each entry is written as a single JSON line and flushed immediately.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use crate::error::{SnapshotError, SnapshotResult};

use super::entry::AuditEntry;

/// Handles writing entries to the journal file
///
/// The file uses line-delimited JSON (JSONL).
#[derive(Debug, Clone)]
pub struct AuditLogger {
    log_path: PathBuf,
}

impl AuditLogger {
    /// Create a new AuditLogger that writes to the specified path
    pub fn new(log_path: PathBuf) -> Self {
        Self { log_path }
    }

    /// Append an entry
    pub fn log(&self, entry: &AuditEntry) -> SnapshotResult<()> {
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SnapshotError::Io(format!("Failed to create journal directory: {}", e)))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| SnapshotError::Io(format!("Failed to open audit log: {}", e)))?;

        let json = serde_json::to_string(entry)
            .map_err(|e| SnapshotError::Json(format!("Failed to serialize audit entry: {}", e)))?;

        writeln!(file, "{}", json)
            .map_err(|e| SnapshotError::Io(format!("Failed to write audit entry: {}", e)))?;

        file.flush()
            .map_err(|e| SnapshotError::Io(format!("Failed to flush audit log: {}", e)))?;

        Ok(())
    }

    /// Read all entries, oldest first
    ///
    /// A torn last line (from a killed process) is skipped rather than failing
    /// the whole read.
    pub fn read_all(&self) -> SnapshotResult<Vec<AuditEntry>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.log_path)
            .map_err(|e| SnapshotError::Io(format!("Failed to open audit log: {}", e)))?;

        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut lines = reader.lines().enumerate().peekable();

        while let Some((line_num, line)) = lines.next() {
            let line = line.map_err(|e| {
                SnapshotError::Io(format!("Failed to read audit log line {}: {}", line_num + 1, e))
            })?;

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<AuditEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(_) if lines.peek().is_none() => break,
                Err(e) => {
                    return Err(SnapshotError::Json(format!(
                        "Failed to parse audit entry at line {}: {}",
                        line_num + 1,
                        e
                    )))
                }
            }
        }

        Ok(entries)
    }

    /// Read the most recent `count` entries, oldest first
    pub fn read_recent(&self, count: usize) -> SnapshotResult<Vec<AuditEntry>> {
        let all_entries = self.read_all()?;
        let start = all_entries.len().saturating_sub(count);
        Ok(all_entries[start..].to_vec())
    }

    /// Get the path to the journal file
    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }
}
