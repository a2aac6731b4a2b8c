//! Path management for the snapshot lifecycle manager
//!
//! Resolves where configuration, the Snapshot Store and the audit journal live.
//!
//! ## Path Resolution Order
//!
//! 1. `SCISLISA_BACKUP_HOME` environment variable (if set)
//! 2. The platform data directory (`~/.local/share/scislisa-backup` on Linux,
//!    `~/Library/Application Support/org.scislisa.scislisa-backup` on macOS)
//!
//! The store directory can be pointed elsewhere on its own, e.g. at a mounted
//! volume that survives the database host being destroyed.

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::error::SnapshotError;

/// Environment variable overriding the base directory
pub const HOME_ENV: &str = "SCISLISA_BACKUP_HOME";

/// Environment variable overriding only the Snapshot Store directory
pub const STORE_ENV: &str = "SCISLISA_SNAPSHOT_DIR";

/// Manages all paths used by the snapshot manager
#[derive(Debug, Clone)]
pub struct SnapshotPaths {
    /// Base directory for config and journal
    base_dir: PathBuf,
    /// Explicit Snapshot Store location, if not under the base directory
    store_override: Option<PathBuf>,
}

impl SnapshotPaths {
    /// Create a new SnapshotPaths instance from the environment
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn new() -> Result<Self, SnapshotError> {
        let base_dir = match std::env::var_os(HOME_ENV) {
            Some(custom) => PathBuf::from(custom),
            None => resolve_default_path()?,
        };
        let store_override = std::env::var_os(STORE_ENV).map(PathBuf::from);

        Ok(Self {
            base_dir,
            store_override,
        })
    }

    /// Create SnapshotPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            store_override: None,
        }
    }

    /// Point the Snapshot Store at a specific directory
    pub fn with_store_dir(mut self, store_dir: PathBuf) -> Self {
        self.store_override = Some(store_dir);
        self
    }

    /// Get the base directory
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the Snapshot Store directory (`<base>/snapshots/` unless overridden)
    pub fn store_dir(&self) -> PathBuf {
        self.store_override
            .clone()
            .unwrap_or_else(|| self.base_dir.join("snapshots"))
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the path to the audit journal
    pub fn audit_log(&self) -> PathBuf {
        self.base_dir.join("audit.log")
    }

    /// Ensure the base and store directories exist
    pub fn ensure_directories(&self) -> Result<(), SnapshotError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| SnapshotError::Io(format!("Failed to create base directory: {}", e)))?;

        std::fs::create_dir_all(self.store_dir())
            .map_err(|e| SnapshotError::Io(format!("Failed to create store directory: {}", e)))?;

        Ok(())
    }

    /// Check if a settings file has been written
    pub fn is_initialized(&self) -> bool {
        self.settings_file().exists()
    }
}

fn resolve_default_path() -> Result<PathBuf, SnapshotError> {
    ProjectDirs::from("org", "scislisa", "scislisa-backup")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| SnapshotError::Config("Could not determine home directory".into()))
}
