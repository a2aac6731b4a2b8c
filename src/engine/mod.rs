//! Database engine seam
//!
//! The lifecycle logic never talks to a database directly. It hands a
//! connection description to an [`Exporter`] (streams a full logical dump into
//! a writer) or an [`Importer`] (replays a dump read from a reader). The
//! PostgreSQL implementations live in [`postgres`]; tests substitute fakes.

pub mod postgres;

use std::fmt;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{SnapshotError, SnapshotResult};

pub use postgres::{PgDump, Psql};

/// Connection parameters for one database
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_user")]
    pub user: String,
    /// Only ever supplied through the environment
    #[serde(skip)]
    pub password: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "scislisa-service".to_string()
}

fn default_user() -> String {
    "postgres".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            user: default_user(),
            password: None,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .finish()
    }
}

impl ConnectionConfig {
    /// `user@host:port/database`, safe to log
    pub fn identifier(&self) -> String {
        format!(
            "{}@{}:{}/{}",
            self.user, self.host, self.port, self.database
        )
    }

    /// Overlay `<prefix>HOST`, `<prefix>PORT`, `<prefix>DB`, `<prefix>USER`
    /// and `<prefix>PASSWORD` from `lookup`
    pub fn apply_overrides<F>(&mut self, prefix: &str, lookup: &F) -> SnapshotResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{}{}", prefix, suffix));

        if let Some(host) = var("HOST") {
            self.host = host;
        }
        if let Some(port) = var("PORT") {
            self.port = port.trim().parse().map_err(|_| {
                SnapshotError::Config(format!("{}PORT is not a valid port: '{}'", prefix, port))
            })?;
        }
        if let Some(database) = var("DB") {
            self.database = database;
        }
        if let Some(user) = var("USER") {
            self.user = user;
        }
        if let Some(password) = var("PASSWORD") {
            self.password = Some(password);
        }

        Ok(())
    }
}

/// Produces a full logical export of a database
///
/// Implementations return [`SnapshotError::Connection`] when the source cannot
/// be reached, [`SnapshotError::ExportProcess`] when the export itself fails
/// and [`SnapshotError::DiskFull`] when `out` runs out of space.
pub trait Exporter {
    /// Short name recorded in snapshot manifests
    fn name(&self) -> &str;

    /// Stream the export of `source` into `out`
    fn export(&self, source: &ConnectionConfig, out: &mut dyn Write) -> SnapshotResult<()>;
}

/// Replays a logical export into a database, replacing its contents
///
/// Implementations return [`SnapshotError::TargetUnreachable`] when nothing
/// could be applied and [`SnapshotError::ImportProcess`] once the import
/// started and then failed.
pub trait Importer {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Replay the dump read from `input` into `target`
    fn import(&self, target: &ConnectionConfig, input: &mut dyn Read) -> SnapshotResult<()>;
}
