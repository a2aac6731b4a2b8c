//! Snapshot CLI commands
//!
//! Implements the create/list/info/prune/restore/delete/history commands.

use clap::Subcommand;

use crate::backup::{BackupRun, PruneReport, SnapshotManager, SnapshotSelector};
use crate::config::paths::SnapshotPaths;
use crate::config::settings::Settings;
use crate::engine::{PgDump, Psql};
use crate::error::{SnapshotError, SnapshotResult};
use crate::store::Snapshot;

/// Snapshot subcommands
#[derive(Subcommand)]
pub enum SnapshotCommands {
    /// Dump the source database into a new snapshot, then prune
    Create {
        /// Keep this many snapshots instead of the configured count
        #[arg(short, long)]
        keep: Option<u32>,

        /// Skip the retention pass
        #[arg(long)]
        no_prune: bool,
    },

    /// List complete snapshots, newest first
    List {
        /// Also show in-progress partial dumps
        #[arg(short, long)]
        all: bool,

        /// Show detailed information
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show information about a snapshot
    Info {
        /// Snapshot name or timestamp (use 'latest' for most recent)
        snapshot: String,
    },

    /// Delete snapshots beyond the retention keep count
    Prune {
        /// Keep this many snapshots instead of the configured count
        #[arg(short, long)]
        keep: Option<u32>,

        /// Delete without asking for confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Overwrite the target database with a snapshot
    Restore {
        /// Snapshot name or timestamp (defaults to latest)
        snapshot: Option<String>,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,

        /// Snapshot the target before overwriting it
        #[arg(long)]
        backup_first: bool,
    },

    /// Delete a single snapshot
    Delete {
        /// Snapshot name or timestamp
        snapshot: String,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Show recent lifecycle events
    History {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

/// Handle a snapshot command
pub fn handle_snapshot_command(
    paths: &SnapshotPaths,
    settings: &Settings,
    cmd: SnapshotCommands,
) -> SnapshotResult<()> {
    let manager = SnapshotManager::from_settings(paths, settings);

    match cmd {
        SnapshotCommands::Create { keep, no_prune } => {
            let keep = if no_prune {
                None
            } else {
                Some(keep.unwrap_or(settings.retention.keep_count))
            };

            println!("Creating snapshot of {}...", settings.source.identifier());
            let exporter = PgDump::from_settings(settings);
            let run = manager.run_backup_with(&exporter, &settings.source, keep)?;
            print_backup_run(&run);
        }

        SnapshotCommands::List { all, verbose } => {
            let snapshots = manager.store().list_complete()?;
            let pending = if all {
                manager.store().list_pending()?
            } else {
                Vec::new()
            };

            if snapshots.is_empty() && pending.is_empty() {
                println!("No snapshots found in {}.", manager.store().dir().display());
                println!("Create one with: scislisa-backup create");
                return Ok(());
            }

            println!("Available Snapshots");
            println!("===================");
            println!();

            for (i, snapshot) in snapshots.iter().enumerate() {
                let age = chrono::Utc::now().signed_duration_since(snapshot.created_at());
                let pinned_marker = if snapshot.pinned { " [in use]" } else { "" };

                if verbose {
                    println!(
                        "{}. {}{}\n   Created: {}\n   Size: {}\n   Age: {}\n   Source: {}\n",
                        i + 1,
                        snapshot.file_name(),
                        pinned_marker,
                        snapshot.created_at().format("%Y-%m-%d %H:%M:%S UTC"),
                        format_size(snapshot.size_bytes),
                        format_duration(age),
                        snapshot
                            .manifest
                            .as_ref()
                            .map_or("unknown", |m| m.source.as_str()),
                    );
                } else {
                    println!(
                        "  {}. {} ({} ago, {}){}",
                        i + 1,
                        snapshot.file_name(),
                        format_duration(age),
                        format_size(snapshot.size_bytes),
                        pinned_marker,
                    );
                }
            }

            if !pending.is_empty() {
                println!();
                println!("In progress:");
                for partial in &pending {
                    println!(
                        "  {} ({})",
                        partial.file_name,
                        format_size(partial.size_bytes)
                    );
                }
            }

            println!();
            println!("Total: {} snapshot(s)", snapshots.len());
        }

        SnapshotCommands::Info { snapshot } => {
            let snapshot = manager.find(&SnapshotSelector::parse(Some(&snapshot)))?;
            print_snapshot_details(&snapshot);
        }

        SnapshotCommands::Prune { keep, force } => {
            let keep = keep.unwrap_or(settings.retention.keep_count);
            if keep < 1 {
                return Err(SnapshotError::Config(format!(
                    "keep count must be at least 1, got {}",
                    keep
                )));
            }

            let total = manager.store().list_complete()?.len();
            let doomed = manager.plan_prune(keep)?;
            let abandoned = manager.stale_partials()?;

            if doomed.is_empty() && abandoned.is_empty() {
                println!("No snapshots to prune.");
                println!("Retention policy: keep {} most recent", keep);
                println!("You have {} snapshot(s).", total);
                return Ok(());
            }

            println!("Prune Summary");
            println!("=============");
            println!("Retention policy: keep {} most recent", keep);
            println!("Current snapshots: {}", total);
            println!("To be deleted: {}", doomed.len());
            for name in &doomed {
                println!("  {}", name);
            }
            if !abandoned.is_empty() {
                println!(
                    "Abandoned partial files (untouched for {}h): {}",
                    settings.retention.stale_partial_hours,
                    abandoned.len()
                );
                for pending in &abandoned {
                    println!("  {} ({})", pending.file_name, format_size(pending.size_bytes));
                }
            }
            println!();

            if !force {
                println!("To delete old snapshots, run again with --force flag:");
                println!("  scislisa-backup prune --force");
                return Ok(());
            }

            let report = manager.prune_with(keep)?;
            print_prune_report(&report);
        }

        SnapshotCommands::Restore {
            snapshot,
            force,
            backup_first,
        } => {
            let selector = SnapshotSelector::parse(snapshot.as_deref());
            let found = manager.find(&selector)?;
            let target = settings.target_connection();

            print_snapshot_details(&found);
            println!("Target: {}", target.identifier());
            println!();

            if !force {
                println!("WARNING: This will overwrite the target database!");
                println!("To proceed, run again with --force flag:");
                println!("  scislisa-backup restore {} --force", found.file_name());
                return Ok(());
            }

            if backup_first {
                println!("Creating snapshot of {} before restore...", target.identifier());
                let pre_restore = manager.create_snapshot(&PgDump::from_settings(settings), &target)?;
                println!("Pre-restore snapshot saved: {}", pre_restore.file_name());
                println!();
            }

            println!("Restoring {}...", found.file_name());
            // Pin the exact snapshot that was shown, even if a newer one landed
            let chosen = SnapshotSelector::Named(found.file_name());
            let outcome = manager.restore(&Psql::from_settings(settings), &chosen, &target)?;

            println!("Restore complete!");
            println!("{}", outcome.summary());
        }

        SnapshotCommands::Delete { snapshot, force } => {
            let found = manager.find(&SnapshotSelector::Named(snapshot))?;

            if !force {
                print_snapshot_details(&found);
                println!();
                println!("To delete this snapshot, run again with --force flag:");
                println!("  scislisa-backup delete {} --force", found.file_name());
                return Ok(());
            }

            let deleted = manager.delete(&found.file_name())?;
            println!("Deleted {}", deleted.file_name());
        }

        SnapshotCommands::History { limit } => {
            let entries = manager.history(limit)?;
            if entries.is_empty() {
                println!("No lifecycle events recorded yet.");
                return Ok(());
            }
            for entry in entries {
                println!("{}", entry.format_human_readable());
            }
        }
    }

    Ok(())
}

fn print_backup_run(run: &BackupRun) {
    println!("Snapshot created: {}", run.snapshot.file_name());
    println!("Location: {}", run.snapshot.path.display());
    println!("Size: {}", format_size(run.snapshot.size_bytes));

    if let Some(report) = &run.prune {
        print_prune_report(report);
    }
}

fn print_prune_report(report: &PruneReport) {
    println!("{}", report.summary());
    for name in &report.deleted {
        println!("  deleted {}", name);
    }
    for failure in &report.failed {
        println!("  {}", failure);
    }
    for name in &report.skipped_pinned {
        println!("  {} is being restored, will be pruned later", name);
    }
    for name in &report.stale_partials {
        println!("  removed abandoned {}", name);
    }
}

fn print_snapshot_details(snapshot: &Snapshot) {
    println!("Snapshot Details");
    println!("================");
    println!("File: {}", snapshot.path.display());
    println!("Size: {}", format_size(snapshot.size_bytes));
    println!(
        "Created: {}",
        snapshot.created_at().format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("Status: {}", snapshot.status());
    if snapshot.pinned {
        println!("In use by a restore");
    }

    match &snapshot.manifest {
        Some(manifest) => {
            println!("Source: {}", manifest.source);
            println!("Exporter: {}", manifest.exporter);
            println!(
                "Completed: {}",
                manifest.completed_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
        None => println!("Manifest: missing"),
    }
}

/// Format a duration in human-readable form
fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);

    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = hours / 24;
    if days < 30 {
        return format!("{}d", days);
    }

    format!("{}mo", days / 30)
}

/// Format a file size in human-readable form
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::seconds(42)), "42s");
        assert_eq!(format_duration(chrono::Duration::hours(3)), "3h");
        assert_eq!(format_duration(chrono::Duration::days(2)), "2d");
        assert_eq!(format_duration(chrono::Duration::seconds(-5)), "0s");
    }
}
