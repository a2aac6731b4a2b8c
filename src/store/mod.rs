//! Snapshot Store
//!
//! A directory of dump files named by creation timestamp. The store owns the
//! storage layout and the completeness rules every other component relies on:
//!
//! - A dump is streamed into a hidden `.<name>.partial` file. Only a file
//!   carrying a valid snapshot name is complete, and a file only gets that
//!   name once the export finished successfully.
//! - Publication hard-links the partial file to its final name, which fails
//!   instead of overwriting when the name is already taken.
//! - `<name>.meta.json` is an optional sidecar describing the snapshot.
//! - `.<name>.pin-<uuid>` markers protect a snapshot that is being restored.
//!
//! No file is ever edited in place.

pub mod file_io;
pub mod naming;

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{Settings, SnapshotPaths};
use crate::error::{SnapshotError, SnapshotResult};

pub use naming::{SnapshotName, MAX_SEQUENCE};

/// Lifecycle state of a snapshot file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    /// Still being written
    Pending,
    /// Export finished and the file was published
    Complete,
    /// Export failed; the partial file is discarded
    Failed,
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotStatus::Pending => write!(f, "pending"),
            SnapshotStatus::Complete => write!(f, "complete"),
            SnapshotStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Sidecar metadata written next to a complete snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    /// Schema version for migration support
    pub schema_version: u32,
    /// Snapshot file name
    pub name: String,
    /// Identifier of the database the dump was taken from
    pub source: String,
    /// Tool that produced the dump
    pub exporter: String,
    /// When the dump started
    pub created_at: DateTime<Utc>,
    /// When the dump was published
    pub completed_at: DateTime<Utc>,
    /// Size of the dump in bytes
    pub size_bytes: u64,
}

/// A complete snapshot found in the store
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Parsed file name
    pub name: SnapshotName,
    /// Full path to the dump file
    pub path: PathBuf,
    /// Size in bytes
    pub size_bytes: u64,
    /// Whether a restore currently holds this snapshot
    pub pinned: bool,
    /// Sidecar metadata, if present and readable
    pub manifest: Option<SnapshotManifest>,
}

impl Snapshot {
    /// The on-disk file name
    pub fn file_name(&self) -> String {
        self.name.file_name()
    }

    /// When the snapshot was created
    pub fn created_at(&self) -> DateTime<Utc> {
        self.name.created_at()
    }

    /// Completed snapshots are always `Complete`; the store never lists others
    pub fn status(&self) -> SnapshotStatus {
        SnapshotStatus::Complete
    }
}

/// A dump that is still being written (or was abandoned by a killed run)
#[derive(Debug, Clone)]
pub struct PendingSnapshot {
    /// Name of the partial file
    pub file_name: String,
    /// Full path to the partial file
    pub path: PathBuf,
    /// Bytes written so far
    pub size_bytes: u64,
    /// Last modification time
    pub modified_at: Option<DateTime<Utc>>,
}

/// A claimed partial file that a dump is streamed into
///
/// Dropping it without calling [`SnapshotStore::publish`] removes the
/// partial file, so a failed or panicking export leaves nothing behind.
#[derive(Debug)]
pub struct PartialSnapshot {
    name: SnapshotName,
    path: PathBuf,
    file: Option<File>,
}

impl PartialSnapshot {
    /// Name the snapshot will be published under (unless it collides)
    pub fn name(&self) -> &SnapshotName {
        &self.name
    }

    /// Path of the partial file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writer for the dump contents
    pub fn writer(&mut self) -> SnapshotResult<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| SnapshotError::Io("partial snapshot already closed".into()))
    }

    fn finish(&mut self) -> SnapshotResult<u64> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| SnapshotError::Io("partial snapshot already closed".into()))?;
        file.flush()?;
        file.sync_all()?;
        Ok(file.metadata()?.len())
    }
}

impl Drop for PartialSnapshot {
    fn drop(&mut self) {
        self.file.take();
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed partial snapshot"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove partial snapshot"),
        }
    }
}

/// Marker that keeps a snapshot from being pruned or deleted
///
/// Released when dropped.
#[derive(Debug)]
pub struct SnapshotPin {
    path: PathBuf,
}

impl SnapshotPin {
    /// Path of the marker file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SnapshotPin {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to release snapshot pin");
            }
        }
    }
}

/// Directory of snapshot files for one project
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    project: String,
    extension: String,
}

impl SnapshotStore {
    /// Create a store rooted at `dir`
    pub fn new(dir: PathBuf, project: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            dir,
            project: project.into(),
            extension: extension.into(),
        }
    }

    /// Create the store described by the configured paths and settings
    pub fn from_settings(paths: &SnapshotPaths, settings: &Settings) -> Self {
        Self::new(paths.store_dir(), &settings.project, &settings.extension)
    }

    /// Store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Project prefix used in snapshot names
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Snapshot file extension
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Name for a snapshot created at `created_at`
    pub fn name_for(&self, created_at: DateTime<Utc>) -> SnapshotName {
        SnapshotName::new(&self.project, &self.extension, created_at)
    }

    /// Interpret an operator-supplied identifier for this store
    pub fn parse_identifier(&self, identifier: &str) -> Option<SnapshotName> {
        let file_name = Path::new(identifier.trim())
            .file_name()
            .map(|n| n.to_string_lossy().to_string())?;
        SnapshotName::from_identifier(&self.project, &self.extension, &file_name)
    }

    /// Create the store directory if needed
    pub fn ensure_exists(&self) -> SnapshotResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            SnapshotError::Io(format!(
                "Failed to create store directory {}: {}",
                self.dir.display(),
                e
            ))
        })
    }

    /// Full path of a complete snapshot
    pub fn path_of(&self, name: &SnapshotName) -> PathBuf {
        self.dir.join(name.file_name())
    }

    /// Full path of a snapshot's manifest
    pub fn manifest_path_of(&self, name: &SnapshotName) -> PathBuf {
        self.dir.join(name.manifest_file_name())
    }

    /// List complete snapshots, newest first
    pub fn list_complete(&self) -> SnapshotResult<Vec<Snapshot>> {
        let entries = self.read_entries()?;
        let pinned = self.pinned_names(&entries);

        let mut snapshots: Vec<Snapshot> = entries
            .iter()
            .filter_map(|file_name| {
                let name = SnapshotName::parse(&self.project, &self.extension, file_name)?;
                let path = self.dir.join(file_name);
                let metadata = fs::metadata(&path).ok()?;
                if !metadata.is_file() {
                    return None;
                }
                Some(Snapshot {
                    pinned: pinned.contains(file_name.as_str()),
                    manifest: self.read_manifest(&name),
                    size_bytes: metadata.len(),
                    path,
                    name,
                })
            })
            .collect();

        snapshots.sort_by(|a, b| b.name.cmp(&a.name));
        Ok(snapshots)
    }

    /// List partial files of in-progress or abandoned dumps
    pub fn list_pending(&self) -> SnapshotResult<Vec<PendingSnapshot>> {
        let mut pending: Vec<PendingSnapshot> = self
            .read_entries()?
            .into_iter()
            .filter(|file_name| self.parse_partial(file_name).is_some())
            .filter_map(|file_name| {
                let path = self.dir.join(&file_name);
                let metadata = fs::metadata(&path).ok()?;
                Some(PendingSnapshot {
                    size_bytes: metadata.len(),
                    modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
                    file_name,
                    path,
                })
            })
            .collect();

        pending.sort_by(|a, b| b.file_name.cmp(&a.file_name));
        Ok(pending)
    }

    /// Look up a complete snapshot by name
    pub fn find(&self, name: &SnapshotName) -> SnapshotResult<Option<Snapshot>> {
        Ok(self
            .list_complete()?
            .into_iter()
            .find(|snapshot| &snapshot.name == name))
    }

    /// The most recent complete snapshot
    pub fn latest(&self) -> SnapshotResult<Option<Snapshot>> {
        Ok(self.list_complete()?.into_iter().next())
    }

    /// Claim a partial file for a new dump
    ///
    /// The sequence suffix starts one past the highest suffix already used in
    /// the same second, counting complete and partial files, and is bumped
    /// further while either name is taken. A name freed by pruning is never
    /// handed out again, so later dumps always sort after earlier ones.
    pub fn begin(&self, name: SnapshotName) -> SnapshotResult<PartialSnapshot> {
        self.ensure_exists()?;

        let first = self.next_sequence(&name)?;
        for sequence in first..=MAX_SEQUENCE {
            let candidate = name.with_sequence(sequence);
            if self.path_of(&candidate).exists() {
                continue;
            }

            let path = self.dir.join(candidate.partial_file_name());
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    debug!(path = %path.display(), "claimed partial snapshot");
                    return Ok(PartialSnapshot {
                        name: candidate,
                        path,
                        file: Some(file),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(SnapshotError::Io(format!(
            "no free snapshot name left for {}",
            name.file_name()
        )))
    }

    /// Publish a finished dump under its final name
    ///
    /// Returns the complete snapshot. The manifest is built from the final
    /// name and size by `manifest`.
    pub fn publish<F>(&self, mut partial: PartialSnapshot, manifest: F) -> SnapshotResult<Snapshot>
    where
        F: FnOnce(&SnapshotName, u64) -> SnapshotManifest,
    {
        let size_bytes = partial.finish()?;

        let mut published = None;
        for sequence in partial.name.sequence()..=MAX_SEQUENCE {
            let candidate = partial.name.with_sequence(sequence);
            match fs::hard_link(&partial.path, self.path_of(&candidate)) {
                Ok(()) => {
                    published = Some(candidate);
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let name = published.ok_or_else(|| {
            SnapshotError::Io(format!(
                "no free snapshot name left for {}",
                partial.name.file_name()
            ))
        })?;

        // Dropping the partial unlinks the temporary name
        drop(partial);

        let manifest = manifest(&name, size_bytes);
        if let Err(e) = file_io::write_json_atomic(self.manifest_path_of(&name), &manifest) {
            warn!(snapshot = %name, error = %e, "failed to write snapshot manifest");
        }

        Ok(Snapshot {
            path: self.path_of(&name),
            size_bytes,
            pinned: false,
            manifest: Some(manifest),
            name,
        })
    }

    /// Mark a snapshot as in use
    pub fn pin(&self, name: &SnapshotName) -> SnapshotResult<SnapshotPin> {
        let path = self
            .dir
            .join(format!("{}{}", name.pin_prefix(), Uuid::new_v4().simple()));
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(SnapshotPin { path })
    }

    /// Whether any pin marker exists for `name`
    ///
    /// Pins left behind by a process that no longer exists are stale: they
    /// are ignored and removed.
    pub fn is_pinned(&self, name: &SnapshotName) -> SnapshotResult<bool> {
        let entries = self.read_entries()?;
        Ok(self.pinned_names(&entries).contains(&name.file_name()))
    }

    /// Delete an abandoned partial file
    pub fn remove_partial(&self, pending: &PendingSnapshot) -> SnapshotResult<()> {
        match fs::remove_file(&pending.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SnapshotError::Deletion {
                name: pending.file_name.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// Delete a complete snapshot and its manifest
    ///
    /// Pinned snapshots are refused.
    pub fn remove(&self, snapshot: &Snapshot) -> SnapshotResult<()> {
        let deletion_error = |reason: String| SnapshotError::Deletion {
            name: snapshot.file_name(),
            reason,
        };

        if self.is_pinned(&snapshot.name)? {
            return Err(deletion_error("snapshot is pinned by an active restore".into()));
        }

        match fs::remove_file(&snapshot.path) {
            Ok(()) => {}
            // Already gone, e.g. removed by a concurrent pass
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(deletion_error(e.to_string())),
        }

        match fs::remove_file(self.manifest_path_of(&snapshot.name)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(snapshot = %snapshot.name, error = %e, "failed to remove manifest"),
        }

        Ok(())
    }

    /// First sequence a new dump taken in the same second as `name` may use
    fn next_sequence(&self, name: &SnapshotName) -> SnapshotResult<u8> {
        let highest = self
            .read_entries()?
            .iter()
            .filter_map(|file_name| {
                SnapshotName::parse(&self.project, &self.extension, file_name)
                    .or_else(|| self.parse_partial(file_name))
            })
            .filter(|existing| existing.same_second(name))
            .map(|existing| existing.sequence())
            .max();

        Ok(match highest {
            Some(highest) => name.sequence().max(highest.saturating_add(1)),
            None => name.sequence(),
        })
    }

    fn parse_partial(&self, file_name: &str) -> Option<SnapshotName> {
        let inner = file_name.strip_prefix('.')?.strip_suffix(".partial")?;
        SnapshotName::parse(&self.project, &self.extension, inner)
    }

    /// File names of snapshots held by at least one live pin
    fn pinned_names(&self, entries: &[String]) -> HashSet<String> {
        entries
            .iter()
            .filter_map(|file_name| {
                let rest = file_name.strip_prefix('.')?;
                let idx = rest.rfind(".pin-")?;
                let path = self.dir.join(file_name);
                match pin_state(&path) {
                    PinState::Live => Some(rest[..idx].to_string()),
                    PinState::Released => None,
                    PinState::Stale => {
                        match fs::remove_file(&path) {
                            Ok(()) => debug!(pin = %file_name, "removed stale snapshot pin"),
                            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                            Err(e) => warn!(pin = %file_name, error = %e, "failed to remove stale pin"),
                        }
                        None
                    }
                }
            })
            .collect()
    }

    fn read_manifest(&self, name: &SnapshotName) -> Option<SnapshotManifest> {
        match file_io::read_json_optional(self.manifest_path_of(name)) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(snapshot = %name, error = %e, "ignoring unreadable manifest");
                None
            }
        }
    }

    fn read_entries(&self) -> SnapshotResult<Vec<String>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SnapshotError::Io(format!(
                    "Failed to read store directory {}: {}",
                    self.dir.display(),
                    e
                )))
            }
        };

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| {
                SnapshotError::Io(format!("Failed to read directory entry: {}", e))
            })?;
            entries.push(entry.file_name().to_string_lossy().to_string());
        }
        Ok(entries)
    }
}

/// Age after which a pin without a readable owner counts as abandoned
const UNOWNED_PIN_GRACE: Duration = Duration::from_secs(60);

enum PinState {
    Live,
    Stale,
    Released,
}

/// Pins record the owning process id; a pin whose owner is gone is stale
fn pin_state(path: &Path) -> PinState {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return PinState::Released,
        Err(_) => return PinState::Live,
    };

    match contents.trim().parse::<u32>() {
        Ok(pid) if process_alive(pid) => PinState::Live,
        Ok(_) => PinState::Stale,
        // Owner killed between creating the marker and writing its pid
        Err(_) => {
            let age = fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok());
            match age {
                Some(age) if age > UNOWNED_PIN_GRACE => PinState::Stale,
                _ => PinState::Live,
            }
        }
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Exists, owned by someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
