//! CLI command handlers
//!
//! Bridges the clap argument parsing with the snapshot lifecycle layer.

pub mod snapshot;

pub use snapshot::{handle_snapshot_command, SnapshotCommands};
