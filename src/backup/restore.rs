//! Restore Selector and Restore Executor
//!
//! The selector turns "latest" or an explicit identifier into a
//! [`SnapshotHandle`]: an open read handle on a complete snapshot plus a pin
//! that keeps the retention enforcer away from it. The executor streams that
//! handle through an [`Importer`] into the target database.
//!
//! Restores are destructive and are never retried automatically.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::engine::{ConnectionConfig, Importer};
use crate::error::{SnapshotError, SnapshotResult};
use crate::store::{Snapshot, SnapshotName, SnapshotPin, SnapshotStore};

/// Attempts at pinning "latest" while snapshots are being pruned underneath
const LATEST_ATTEMPTS: usize = 3;

/// Which snapshot to restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSelector {
    /// The most recent complete snapshot
    Latest,
    /// A snapshot file name, name without extension, or `YYYYMMDD_HHMMSS` stamp
    Named(String),
}

impl SnapshotSelector {
    /// `None` or `"latest"` (any case) selects the most recent snapshot
    pub fn parse(identifier: Option<&str>) -> Self {
        match identifier.map(str::trim) {
            None | Some("") => Self::Latest,
            Some(id) if id.eq_ignore_ascii_case("latest") => Self::Latest,
            Some(id) => Self::Named(id.to_string()),
        }
    }
}

impl fmt::Display for SnapshotSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Named(name) => write!(f, "{}", name),
        }
    }
}

/// A resolved, pinned, open snapshot
///
/// The pin is released when the handle is dropped.
#[derive(Debug)]
pub struct SnapshotHandle {
    snapshot: Snapshot,
    file: File,
    _pin: SnapshotPin,
}

impl SnapshotHandle {
    /// The snapshot this handle refers to
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Reader positioned at the start of the dump
    pub fn reader(&mut self) -> &mut File {
        &mut self.file
    }
}

/// Finds snapshots to restore
pub struct RestoreSelector<'a> {
    store: &'a SnapshotStore,
}

impl<'a> RestoreSelector<'a> {
    pub fn new(store: &'a SnapshotStore) -> Self {
        Self { store }
    }

    /// Locate the snapshot without pinning or opening it
    pub fn find(&self, selector: &SnapshotSelector) -> SnapshotResult<Snapshot> {
        match selector {
            SnapshotSelector::Latest => self.store.latest()?.ok_or_else(|| {
                SnapshotError::NoSnapshotAvailable(self.store.dir().display().to_string())
            }),
            SnapshotSelector::Named(identifier) => {
                let name = self.parse(identifier)?;
                self.store
                    .find(&name)?
                    .ok_or_else(|| SnapshotError::snapshot_not_found(identifier.as_str()))
            }
        }
    }

    /// Locate, pin and open the selected snapshot
    pub fn resolve(&self, selector: &SnapshotSelector) -> SnapshotResult<SnapshotHandle> {
        match selector {
            SnapshotSelector::Latest => {
                for _ in 0..LATEST_ATTEMPTS {
                    let snapshot = self.find(selector)?;
                    if let Some(handle) = self.open(snapshot)? {
                        return Ok(handle);
                    }
                }
                Err(SnapshotError::NoSnapshotAvailable(
                    self.store.dir().display().to_string(),
                ))
            }
            SnapshotSelector::Named(identifier) => {
                let snapshot = self.find(selector)?;
                self.open(snapshot)?
                    .ok_or_else(|| SnapshotError::snapshot_not_found(identifier.as_str()))
            }
        }
    }

    fn parse(&self, identifier: &str) -> SnapshotResult<SnapshotName> {
        self.store
            .parse_identifier(identifier)
            .ok_or_else(|| SnapshotError::snapshot_not_found(identifier))
    }

    /// Pin, then open; `None` if the snapshot vanished before the pin landed
    fn open(&self, snapshot: Snapshot) -> SnapshotResult<Option<SnapshotHandle>> {
        let pin = self.store.pin(&snapshot.name)?;
        match File::open(&snapshot.path) {
            Ok(file) => Ok(Some(SnapshotHandle {
                snapshot,
                file,
                _pin: pin,
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Summary of a finished restore
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    /// Snapshot that was replayed
    pub snapshot: String,
    /// Database that was overwritten
    pub target: String,
    /// Bytes streamed into the importer
    pub bytes: u64,
    /// When the import began
    pub started_at: DateTime<Utc>,
    /// How long the import took
    pub elapsed: Duration,
}

impl RestoreOutcome {
    pub fn summary(&self) -> String {
        format!(
            "Restored {} into {} ({} bytes in {:.1}s)",
            self.snapshot,
            self.target,
            self.bytes,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Replays snapshots into a target database
pub struct RestoreExecutor<'a> {
    importer: &'a dyn Importer,
}

impl<'a> RestoreExecutor<'a> {
    pub fn new(importer: &'a dyn Importer) -> Self {
        Self { importer }
    }

    /// Overwrite `target` with the contents of the snapshot behind `handle`
    ///
    /// Errors are returned exactly as the importer reported them. After an
    /// [`SnapshotError::ImportProcess`] the target is left in whatever state
    /// the engine reached.
    pub fn restore(
        &self,
        mut handle: SnapshotHandle,
        target: &ConnectionConfig,
    ) -> SnapshotResult<RestoreOutcome> {
        let snapshot = handle.snapshot().file_name();
        let target_id = target.identifier();
        let started_at = Utc::now();
        let clock = std::time::Instant::now();

        info!(
            snapshot = %snapshot,
            target = %target_id,
            importer = self.importer.name(),
            "restoring snapshot"
        );

        let mut reader = CountingReader::new(handle.reader());
        let result = self.importer.import(target, &mut reader);
        let bytes = reader.count();

        match result {
            Ok(()) => {
                let outcome = RestoreOutcome {
                    snapshot,
                    target: target_id,
                    bytes,
                    started_at,
                    elapsed: clock.elapsed(),
                };
                info!(snapshot = %outcome.snapshot, bytes, "restore complete");
                Ok(outcome)
            }
            Err(e) => {
                error!(snapshot = %snapshot, target = %target_id, error = %e, "restore failed");
                Err(e)
            }
        }
    }
}

struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> CountingReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }

    fn count(&self) -> u64 {
        self.count
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}
