//! Retention Enforcer
//!
//! Keeps the `keep_count` most recent complete snapshots and deletes the
//! rest, oldest first. Deletion is best-effort: a snapshot that cannot be
//! removed is reported and the pass moves on. Partial files never count
//! toward the keep count; a partial nobody has written to for longer than the
//! stale age belongs to a killed dump and is removed. Pinned snapshots are
//! skipped until their restore finishes.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::error::{SnapshotError, SnapshotResult};
use crate::store::{PendingSnapshot, Snapshot, SnapshotStore};

/// Partial files untouched for this long are considered abandoned
pub const DEFAULT_STALE_PARTIAL_HOURS: u64 = 24;

/// Outcome of one retention pass
#[derive(Debug, Default)]
pub struct PruneReport {
    /// Keep count the pass ran with
    pub keep_count: u32,
    /// Complete snapshots that survived
    pub kept: Vec<String>,
    /// Snapshots that were deleted
    pub deleted: Vec<String>,
    /// Deletion failures (never fatal)
    pub failed: Vec<SnapshotError>,
    /// Snapshots beyond the keep count that a restore has pinned
    pub skipped_pinned: Vec<String>,
    /// Abandoned partial files that were removed
    pub stale_partials: Vec<String>,
    /// Set when the pass refused to run because of its configuration
    pub warning: Option<String>,
}

impl PruneReport {
    /// Whether every snapshot beyond the keep count was removed
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped_pinned.is_empty() && self.warning.is_none()
    }

    /// One-line summary for terminal output
    pub fn summary(&self) -> String {
        if let Some(warning) = &self.warning {
            return format!("Prune skipped: {}", warning);
        }
        let mut summary = format!(
            "Kept {}, deleted {}",
            self.kept.len(),
            self.deleted.len()
        );
        if !self.failed.is_empty() {
            summary.push_str(&format!(", {} could not be deleted", self.failed.len()));
        }
        if !self.skipped_pinned.is_empty() {
            summary.push_str(&format!(", {} in use", self.skipped_pinned.len()));
        }
        if !self.stale_partials.is_empty() {
            summary.push_str(&format!(
                ", {} abandoned partial file(s) removed",
                self.stale_partials.len()
            ));
        }
        summary
    }
}

/// Applies the keep-most-recent-N policy to a store
pub struct RetentionEnforcer<'a> {
    store: &'a SnapshotStore,
    stale_partial_age: Duration,
}

impl<'a> RetentionEnforcer<'a> {
    pub fn new(store: &'a SnapshotStore) -> Self {
        Self {
            store,
            stale_partial_age: Duration::hours(DEFAULT_STALE_PARTIAL_HOURS as i64),
        }
    }

    /// Override how long a partial file may sit untouched before it is removed
    pub fn with_stale_partial_age(mut self, age: Duration) -> Self {
        self.stale_partial_age = age;
        self
    }

    /// Partial files left behind by dumps that are no longer running
    pub fn stale_partials(&self) -> SnapshotResult<Vec<PendingSnapshot>> {
        let cutoff = Utc::now() - self.stale_partial_age;
        Ok(self
            .store
            .list_pending()?
            .into_iter()
            .filter(|pending| pending.modified_at.map_or(false, |at| at < cutoff))
            .collect())
    }

    /// Snapshots a pass with `keep_count` would delete, oldest last
    pub fn plan(&self, keep_count: u32) -> SnapshotResult<Vec<String>> {
        if keep_count < 1 {
            return Ok(Vec::new());
        }
        Ok(self
            .store
            .list_complete()?
            .into_iter()
            .skip(keep_count as usize)
            .map(|snapshot| snapshot.file_name())
            .collect())
    }

    /// Delete every complete snapshot beyond the `keep_count` most recent
    ///
    /// Only listing the store can fail; individual deletion failures end up
    /// in the report. A `keep_count` of zero deletes nothing.
    pub fn prune(&self, keep_count: u32) -> SnapshotResult<PruneReport> {
        self.prune_using(keep_count, |snapshot| self.store.remove(snapshot))
    }

    fn prune_using<F>(&self, keep_count: u32, mut remove: F) -> SnapshotResult<PruneReport>
    where
        F: FnMut(&Snapshot) -> SnapshotResult<()>,
    {
        let mut report = PruneReport {
            keep_count,
            ..PruneReport::default()
        };

        if keep_count < 1 {
            let warning = format!(
                "retention keep count is {}, must be at least 1; nothing was deleted",
                keep_count
            );
            warn!("{}", warning);
            report.warning = Some(warning);
            report.kept = self
                .store
                .list_complete()?
                .iter()
                .map(|snapshot| snapshot.file_name())
                .collect();
            return Ok(report);
        }

        // Newest first
        let snapshots = self.store.list_complete()?;

        for (position, snapshot) in snapshots.iter().enumerate() {
            let file_name = snapshot.file_name();
            if position < keep_count as usize {
                report.kept.push(file_name);
                continue;
            }

            match remove(snapshot) {
                Ok(()) => {
                    info!(snapshot = %file_name, "pruned snapshot");
                    report.deleted.push(file_name);
                }
                Err(e) => {
                    let pinned = self.store.is_pinned(&snapshot.name).unwrap_or(false);
                    if pinned {
                        info!(snapshot = %file_name, "snapshot in use, pruning deferred");
                        report.skipped_pinned.push(file_name.clone());
                        report.kept.push(file_name);
                    } else {
                        warn!(snapshot = %file_name, error = %e, "failed to prune snapshot");
                        report.kept.push(file_name);
                        report.failed.push(e);
                    }
                }
            }
        }

        for pending in self.stale_partials()? {
            match self.store.remove_partial(&pending) {
                Ok(()) => {
                    info!(partial = %pending.file_name, "removed abandoned partial snapshot");
                    report.stale_partials.push(pending.file_name);
                }
                Err(e) => {
                    warn!(partial = %pending.file_name, error = %e, "failed to remove abandoned partial");
                    report.failed.push(e);
                }
            }
        }

        Ok(report)
    }
}
