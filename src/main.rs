use std::io::{self, IsTerminal as _};
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt as _, EnvFilter};

use scislisa_backup::cli::{handle_snapshot_command, SnapshotCommands};
use scislisa_backup::config::{paths::SnapshotPaths, settings::Settings};

/// Environment variable holding the log filter
const LOG_ENV: &str = "SCISLISA_LOG";

#[derive(Parser)]
#[command(
    name = "scislisa-backup",
    version,
    about = "Snapshot lifecycle manager for the scislisa database",
    long_about = "Creates timestamped logical dumps of the scislisa PostgreSQL \
                  database, keeps the most recent N of them, and restores a \
                  chosen snapshot into a target database."
)]
struct Cli {
    /// Snapshot Store directory
    #[arg(long, global = true, env = "SCISLISA_SNAPSHOT_DIR", value_name = "DIR")]
    store: Option<PathBuf>,

    /// Disable diagnostic logging
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Snapshot(SnapshotCommands),

    /// Show or initialize configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show effective configuration and paths
    Show,
    /// Write the default configuration file
    Init,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if !cli.quiet {
        init_tracing()?;
    }

    let mut paths = SnapshotPaths::new()?;
    if let Some(store) = cli.store {
        paths = paths.with_store_dir(store);
    }
    let settings = Settings::load_or_create(&paths)?;

    match cli.command {
        Commands::Snapshot(cmd) => {
            settings.validate_naming()?;
            handle_snapshot_command(&paths, &settings, cmd)?;
        }
        Commands::Config(ConfigCommands::Show) => show_config(&paths, &settings),
        Commands::Config(ConfigCommands::Init) => {
            settings.validate()?;
            settings.save(&paths)?;
            println!("Configuration written to {}", paths.settings_file().display());
            println!("Snapshot Store: {}", paths.store_dir().display());
        }
    }

    Ok(())
}

fn init_tracing() -> Result<()> {
    let mut layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    if !io::stderr().is_terminal() {
        layer.set_ansi(false);
    }

    tracing::subscriber::set_global_default(
        tracing_subscriber::Registry::default()
            .with(
                EnvFilter::builder()
                    .with_env_var(LOG_ENV)
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .with(layer),
    )
    .context("failed to configure tracing")
}

fn show_config(paths: &SnapshotPaths, settings: &Settings) {
    let target = settings.target_connection();

    println!("scislisa-backup Configuration");
    println!("=============================");
    println!("Base directory:  {}", paths.base_dir().display());
    println!("Config file:     {}", paths.settings_file().display());
    println!("Snapshot Store:  {}", paths.store_dir().display());
    println!("Audit journal:   {}", paths.audit_log().display());
    println!(
        "Initialized:     {}",
        if paths.is_initialized() { "yes" } else { "no" }
    );
    println!();
    println!("Settings:");
    println!(
        "  Naming:        {}_backup_<YYYYMMDD>_<HHMMSS>.{}",
        settings.project, settings.extension
    );
    println!("  Keep count:    {}", settings.retention.keep_count);
    println!(
        "  Stale partial: {}h",
        settings.retention.stale_partial_hours
    );
    println!(
        "  Source:        {} (password {})",
        settings.source.identifier(),
        if settings.source.password.is_some() { "set" } else { "not set" }
    );
    println!(
        "  Target:        {} (password {})",
        target.identifier(),
        if target.password.is_some() { "set" } else { "not set" }
    );
    println!("  pg_dump:       {}", settings.tools.pg_dump);
    println!("  psql:          {}", settings.tools.psql);
    println!(
        "  Dump options:  clean={} no_owner={}",
        settings.dump.clean, settings.dump.no_owner
    );
}
