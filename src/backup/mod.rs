//! Snapshot lifecycle for scislisa-backup
//!
//! Produces logical dumps of the source database, keeps the store bounded
//! with a keep-most-recent-N policy and replays chosen snapshots into a
//! target database.
//!
//! # Architecture
//!
//! - `DumpProducer`: exports into a partial file and publishes it
//! - `RetentionEnforcer`: deletes complete snapshots beyond the keep count
//! - `RestoreSelector`: resolves "latest" or a name to a pinned handle
//! - `RestoreExecutor`: streams a handle through an importer
//! - `SnapshotManager`: ties the above to one store and the audit journal
//!
//! # Example
//!
//! ```rust,ignore
//! use scislisa_backup::backup::{SnapshotManager, SnapshotSelector};
//! use scislisa_backup::config::{SnapshotPaths, Settings};
//! use scislisa_backup::engine::{PgDump, Psql};
//!
//! let paths = SnapshotPaths::new()?;
//! let settings = Settings::load_or_create(&paths)?;
//! let manager = SnapshotManager::from_settings(&paths, &settings);
//!
//! let run = manager.run_backup(&PgDump::from_settings(&settings), &settings.source, true)?;
//! println!("{}", run.snapshot.file_name());
//!
//! let outcome = manager.restore(
//!     &Psql::from_settings(&settings),
//!     &SnapshotSelector::Latest,
//!     &settings.target_connection(),
//! )?;
//! println!("{}", outcome.summary());
//! ```

mod producer;
mod restore;
mod retention;

pub use producer::{DumpAttempt, DumpProducer};
pub use restore::{
    RestoreExecutor, RestoreOutcome, RestoreSelector, SnapshotHandle, SnapshotSelector,
};
pub use retention::{PruneReport, RetentionEnforcer, DEFAULT_STALE_PARTIAL_HOURS};

use chrono::Duration;
use tracing::warn;

use crate::audit::{AuditEntry, AuditLogger};
use crate::config::{RetentionPolicy, Settings, SnapshotPaths};
use crate::engine::{ConnectionConfig, Exporter, Importer};
use crate::error::{SnapshotError, SnapshotResult};
use crate::store::{PendingSnapshot, Snapshot, SnapshotStore};

/// A century; larger ages are treated as "never stale"
const MAX_STALE_PARTIAL_HOURS: u64 = 24 * 365 * 100;

/// Result of a create-then-prune run
#[derive(Debug)]
pub struct BackupRun {
    /// The snapshot that was published
    pub snapshot: Snapshot,
    /// Retention outcome, `None` when pruning was not requested
    pub prune: Option<PruneReport>,
}

/// One store, one retention policy, one journal
pub struct SnapshotManager {
    store: SnapshotStore,
    retention: RetentionPolicy,
    audit: Option<AuditLogger>,
}

impl SnapshotManager {
    /// Create a manager without an audit journal
    pub fn new(store: SnapshotStore, retention: RetentionPolicy) -> Self {
        Self {
            store,
            retention,
            audit: None,
        }
    }

    /// Create a manager for the configured store, journaling to the audit log
    pub fn from_settings(paths: &SnapshotPaths, settings: &Settings) -> Self {
        Self::new(
            SnapshotStore::from_settings(paths, settings),
            settings.retention.clone(),
        )
        .with_audit(AuditLogger::new(paths.audit_log()))
    }

    /// Record lifecycle events in `logger`
    pub fn with_audit(mut self, logger: AuditLogger) -> Self {
        self.audit = Some(logger);
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    /// Dump `source` into a new snapshot
    pub fn create_snapshot(
        &self,
        exporter: &dyn Exporter,
        source: &ConnectionConfig,
    ) -> SnapshotResult<Snapshot> {
        let attempt = DumpProducer::new(&self.store, exporter).attempt(source);
        match attempt.result {
            Ok(snapshot) => {
                self.record(AuditEntry::created(
                    &snapshot.file_name(),
                    &source.identifier(),
                    snapshot.size_bytes,
                ));
                Ok(snapshot)
            }
            Err(e) => {
                self.record(AuditEntry::create_failed(
                    &attempt.name.file_name(),
                    &source.identifier(),
                    &e.to_string(),
                ));
                Err(e)
            }
        }
    }

    /// Apply the configured retention policy
    pub fn prune(&self) -> SnapshotResult<PruneReport> {
        self.prune_with(self.retention.keep_count)
    }

    /// Apply a keep-most-recent-`keep_count` pass
    pub fn prune_with(&self, keep_count: u32) -> SnapshotResult<PruneReport> {
        let report = self.enforcer().prune(keep_count)?;
        for name in report.deleted.iter().chain(&report.stale_partials) {
            self.record(AuditEntry::pruned(name));
        }
        for failure in &report.failed {
            if let SnapshotError::Deletion { name, reason } = failure {
                self.record(AuditEntry::prune_failed(name, reason));
            }
        }
        Ok(report)
    }

    /// Snapshots a prune pass with `keep_count` would delete
    pub fn plan_prune(&self, keep_count: u32) -> SnapshotResult<Vec<String>> {
        self.enforcer().plan(keep_count)
    }

    /// Partial files a prune pass would remove as abandoned
    pub fn stale_partials(&self) -> SnapshotResult<Vec<PendingSnapshot>> {
        self.enforcer().stale_partials()
    }

    fn enforcer(&self) -> RetentionEnforcer<'_> {
        let hours = self.retention.stale_partial_hours.min(MAX_STALE_PARTIAL_HOURS) as i64;
        RetentionEnforcer::new(&self.store).with_stale_partial_age(Duration::hours(hours))
    }

    /// Dump, then optionally prune with `keep_count`
    ///
    /// Only the dump decides whether the run failed. A prune error is logged
    /// and carried in the report's warning.
    pub fn run_backup_with(
        &self,
        exporter: &dyn Exporter,
        source: &ConnectionConfig,
        keep_count: Option<u32>,
    ) -> SnapshotResult<BackupRun> {
        let snapshot = self.create_snapshot(exporter, source)?;

        let prune = keep_count.map(|keep| {
            self.prune_with(keep).unwrap_or_else(|e| {
                warn!(error = %e, "retention pass failed after a successful dump");
                PruneReport {
                    keep_count: keep,
                    warning: Some(e.to_string()),
                    ..PruneReport::default()
                }
            })
        });

        Ok(BackupRun { snapshot, prune })
    }

    /// Dump, then prune with the configured policy if `prune` is set
    pub fn run_backup(
        &self,
        exporter: &dyn Exporter,
        source: &ConnectionConfig,
        prune: bool,
    ) -> SnapshotResult<BackupRun> {
        let keep = prune.then_some(self.retention.keep_count);
        self.run_backup_with(exporter, source, keep)
    }

    /// Look up a snapshot without pinning it
    pub fn find(&self, selector: &SnapshotSelector) -> SnapshotResult<Snapshot> {
        RestoreSelector::new(&self.store).find(selector)
    }

    /// Resolve and pin a snapshot for reading
    pub fn resolve(&self, selector: &SnapshotSelector) -> SnapshotResult<SnapshotHandle> {
        RestoreSelector::new(&self.store).resolve(selector)
    }

    /// Overwrite `target` with the selected snapshot
    ///
    /// Resolution happens before the importer is touched, so a missing
    /// snapshot never reaches the target.
    pub fn restore(
        &self,
        importer: &dyn Importer,
        selector: &SnapshotSelector,
        target: &ConnectionConfig,
    ) -> SnapshotResult<RestoreOutcome> {
        let handle = self.resolve(selector)?;
        let snapshot = handle.snapshot().file_name();
        let target_id = target.identifier();

        self.record(AuditEntry::restore_started(&snapshot, &target_id));
        match RestoreExecutor::new(importer).restore(handle, target) {
            Ok(outcome) => {
                self.record(AuditEntry::restored(&snapshot, &target_id, outcome.bytes));
                Ok(outcome)
            }
            Err(e) => {
                self.record(AuditEntry::restore_failed(&snapshot, &target_id, &e.to_string()));
                Err(e)
            }
        }
    }

    /// Remove one complete snapshot by identifier
    pub fn delete(&self, identifier: &str) -> SnapshotResult<Snapshot> {
        let snapshot = self.find(&SnapshotSelector::Named(identifier.to_string()))?;
        self.store.remove(&snapshot)?;
        self.record(AuditEntry::deleted(&snapshot.file_name()));
        Ok(snapshot)
    }

    /// Most recent journal entries, oldest first
    pub fn history(&self, limit: usize) -> SnapshotResult<Vec<AuditEntry>> {
        match &self.audit {
            Some(logger) => logger.read_recent(limit),
            None => Ok(Vec::new()),
        }
    }

    fn record(&self, entry: AuditEntry) {
        if let Some(logger) = &self.audit {
            if let Err(e) = logger.log(&entry) {
                warn!(operation = %entry.operation, error = %e, "failed to write audit entry");
            }
        }
    }
}
