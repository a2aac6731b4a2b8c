//! scislisa-backup - Snapshot lifecycle manager for the scislisa database
//!
//! This library takes timestamped logical dumps of a PostgreSQL database
//! into a directory of snapshot files, bounds that directory with a
//! keep-most-recent-N retention policy, and restores a chosen snapshot into
//! a target database.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration and path management
//! - `error`: Custom error types
//! - `store`: Snapshot Store naming, listing, publication and pins
//! - `engine`: Exporter/importer traits and the PostgreSQL tools behind them
//! - `backup`: Dump producer, retention enforcer, restore selector/executor
//! - `audit`: Lifecycle journal
//! - `cli`: Command handlers for the `scislisa-backup` binary
//!
//! # Example
//!
//! ```rust,ignore
//! use scislisa_backup::backup::SnapshotManager;
//! use scislisa_backup::config::{paths::SnapshotPaths, settings::Settings};
//!
//! let paths = SnapshotPaths::new()?;
//! let settings = Settings::load_or_create(&paths)?;
//! let manager = SnapshotManager::from_settings(&paths, &settings);
//! ```

pub mod audit;
pub mod backup;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod store;

pub use error::SnapshotError;
