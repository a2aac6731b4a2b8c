//! Configuration module for the snapshot lifecycle manager
//!
//! This module provides configuration management including:
//! - Path resolution for the Snapshot Store, config file and journal
//! - Settings persistence with environment overrides

pub mod paths;
pub mod settings;

pub use paths::SnapshotPaths;
pub use settings::{RetentionPolicy, Settings};
