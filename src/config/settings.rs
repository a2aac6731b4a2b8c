//! User settings for the snapshot lifecycle manager
//!
//! Manages the naming convention, retention policy, database connections and
//! engine tool locations. Settings are stored as JSON and overlaid with
//! environment variables at load time.

use serde::{Deserialize, Serialize};

use super::paths::SnapshotPaths;
use crate::backup::DEFAULT_STALE_PARTIAL_HOURS;
use crate::engine::ConnectionConfig;
use crate::error::SnapshotError;
use crate::store::file_io::write_json_atomic;

/// Environment variable overriding the retention keep count
pub const KEEP_COUNT_ENV: &str = "SCISLISA_KEEP_COUNT";

/// Retention settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Number of most recent complete snapshots to keep
    pub keep_count: u32,

    /// Hours after which an untouched partial file counts as abandoned
    #[serde(default = "default_stale_partial_hours")]
    pub stale_partial_hours: u64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::keep(5)
    }
}

impl RetentionPolicy {
    /// Create a policy keeping the `keep_count` most recent snapshots
    pub fn keep(keep_count: u32) -> Self {
        Self {
            keep_count,
            stale_partial_hours: default_stale_partial_hours(),
        }
    }
}

/// Executables used to talk to the database engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPaths {
    #[serde(default = "default_pg_dump")]
    pub pg_dump: String,
    #[serde(default = "default_psql")]
    pub psql: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            pg_dump: default_pg_dump(),
            psql: default_psql(),
        }
    }
}

/// Options passed to the export tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpOptions {
    /// Emit DROP statements so that replaying the dump overwrites the target
    #[serde(default = "default_true")]
    pub clean: bool,
    /// Skip ownership statements so the dump restores under any role
    #[serde(default = "default_true")]
    pub no_owner: bool,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            clean: true,
            no_owner: true,
        }
    }
}

/// Settings for the snapshot manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Project prefix used in snapshot names
    #[serde(default = "default_project")]
    pub project: String,

    /// Snapshot file extension (without the dot)
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Retention policy
    #[serde(default)]
    pub retention: RetentionPolicy,

    /// Database snapshots are taken from
    #[serde(default)]
    pub source: ConnectionConfig,

    /// Database restores are written to (defaults to the source)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ConnectionConfig>,

    /// Engine tool locations
    #[serde(default)]
    pub tools: ToolPaths,

    /// Export options
    #[serde(default)]
    pub dump: DumpOptions,
}

fn default_schema_version() -> u32 {
    1
}

fn default_project() -> String {
    "scislisa".to_string()
}

fn default_extension() -> String {
    "sql".to_string()
}

fn default_stale_partial_hours() -> u64 {
    DEFAULT_STALE_PARTIAL_HOURS
}

fn default_pg_dump() -> String {
    "pg_dump".to_string()
}

fn default_psql() -> String {
    "psql".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            project: default_project(),
            extension: default_extension(),
            retention: RetentionPolicy::default(),
            source: ConnectionConfig::default(),
            target: None,
            tools: ToolPaths::default(),
            dump: DumpOptions::default(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or fall back to defaults if the file doesn't exist
    ///
    /// Environment overrides are applied on top of whatever was loaded.
    pub fn load_or_create(paths: &SnapshotPaths) -> Result<Self, SnapshotError> {
        let settings_path = paths.settings_file();

        let mut settings = if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path).map_err(|e| {
                SnapshotError::Io(format!("Failed to read settings file: {}", e))
            })?;

            serde_json::from_str(&contents).map_err(|e| {
                SnapshotError::Config(format!("Failed to parse settings file: {}", e))
            })?
        } else {
            Settings::default()
        };

        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Save settings to disk
    ///
    /// Passwords are never written.
    pub fn save(&self, paths: &SnapshotPaths) -> Result<(), SnapshotError> {
        paths.ensure_directories()?;
        write_json_atomic(paths.settings_file(), self)
    }

    /// Overlay values from an environment-like lookup
    ///
    /// `POSTGRES_*` variables configure the source, `RESTORE_POSTGRES_*` the
    /// restore target.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), SnapshotError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.source.apply_overrides("POSTGRES_", &lookup)?;

        let target_vars = ["HOST", "PORT", "DB", "USER", "PASSWORD"]
            .iter()
            .any(|suffix| lookup(&format!("RESTORE_POSTGRES_{}", suffix)).is_some());
        if target_vars {
            let mut target = self.target.clone().unwrap_or_else(|| self.source.clone());
            target.apply_overrides("RESTORE_POSTGRES_", &lookup)?;
            self.target = Some(target);
        }

        if let Some(raw) = lookup(KEEP_COUNT_ENV) {
            self.retention.keep_count = raw.trim().parse().map_err(|_| {
                SnapshotError::Config(format!(
                    "{} must be a non-negative integer, got '{}'",
                    KEEP_COUNT_ENV, raw
                ))
            })?;
        }

        Ok(())
    }

    /// Connection restores are written to
    pub fn target_connection(&self) -> ConnectionConfig {
        self.target.clone().unwrap_or_else(|| self.source.clone())
    }

    /// Reject settings that would make a run unsafe
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.retention.keep_count < 1 {
            return Err(SnapshotError::Config(
                "retention keep count must be at least 1".into(),
            ));
        }
        self.validate_naming()
    }

    /// Reject a project prefix or extension that cannot form a snapshot name
    ///
    /// Unlike [`Settings::validate`] this tolerates a keep count of zero, which
    /// the retention pass treats as a no-op.
    pub fn validate_naming(&self) -> Result<(), SnapshotError> {
        if self.project.is_empty() || self.project.contains(['/', '\\', '.']) {
            return Err(SnapshotError::Config(format!(
                "invalid project prefix '{}'",
                self.project
            )));
        }
        if self.extension.is_empty() || self.extension.contains(['/', '\\']) {
            return Err(SnapshotError::Config(format!(
                "invalid snapshot extension '{}'",
                self.extension
            )));
        }
        Ok(())
    }
}
