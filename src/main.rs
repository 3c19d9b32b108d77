use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use diffback::backup::CancelToken;
use diffback::cli::{
    handle_backup_command, handle_config_command, handle_events_command, handle_list_command,
    handle_prune_command, handle_restore_command, handle_verify_command, RestoreArgs,
};
use diffback::config::paths::resolve_config_file;
use diffback::config::BackupConfig;
use diffback::logging::init_logging;

#[derive(Parser)]
#[command(
    name = "diffback",
    version,
    about = "Differential backups with full/differential session chains",
    long_about = "diffback backs up folders into a chain of full and differential \
                  sessions. Differentials hold every file changed since the last \
                  full backup, so any session restores from at most two archives."
)]
struct Cli {
    /// Configuration file (JSON or YAML); defaults to $DIFFBACK_CONFIG or the
    /// platform config directory
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show debug diagnostics (DIFFBACK_LOG overrides)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backup (full or differential), then apply retention
    Backup,

    /// List backup sessions
    #[command(alias = "ls")]
    List {
        /// Show detailed information
        #[arg(short, long)]
        verbose: bool,
    },

    /// Restore a session into a directory
    Restore(RestoreArgs),

    /// Remove the oldest segments beyond the retention limit
    Prune {
        /// Override max_backups for this run
        #[arg(short, long)]
        max: Option<i64>,

        /// Show what would be removed without removing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Re-verify archives and update their verified flag
    Verify {
        /// Only verify this session
        name: Option<String>,
    },

    /// Show recent chain events
    Events {
        /// Number of events to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show current configuration and destination layout
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config_path = resolve_config_file(cli.config.as_deref())?;
    let config = BackupConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let cancel = CancelToken::new();

    match cli.command {
        Commands::Backup => handle_backup_command(&config, &cancel)?,
        Commands::List { verbose } => handle_list_command(&config, verbose)?,
        Commands::Restore(args) => handle_restore_command(&config, args, &cancel)?,
        Commands::Prune { max, dry_run } => handle_prune_command(&config, max, dry_run)?,
        Commands::Verify { name } => handle_verify_command(&config, name.as_deref())?,
        Commands::Events { limit } => handle_events_command(&config, limit)?,
        Commands::Config => handle_config_command(&config, &config_path)?,
    }

    Ok(())
}
