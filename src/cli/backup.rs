//! Backup CLI commands
//!
//! Implements the `backup`, `list`, `prune`, `verify`, `events` and `config`
//! commands on top of the chain manager and retention manager.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use crate::audit::{EventLog, EventSink};
use crate::backup::{BackupOutcome, CancelToken, ChainManager, RetentionManager};
use crate::config::BackupConfig;
use crate::display::{
    format_event_list, format_session_details, format_session_list, format_size,
};
use crate::error::{BackupError, BackupResult};

/// The event log of the configured destination
pub fn event_sink(config: &BackupConfig) -> Arc<dyn EventSink> {
    Arc::new(EventLog::new(config.destination().events_log()))
}

/// Run one backup, then apply retention
pub fn handle_backup_command(config: &BackupConfig, cancel: &CancelToken) -> BackupResult<()> {
    let sink = event_sink(config);
    let manager = ChainManager::new(config.clone(), sink.clone());

    let report = manager.run_backup(cancel)?;

    for missing in &report.missing_sources {
        println!("Warning: source folder {} does not exist, skipped", missing.display());
    }
    if !report.skipped_files.is_empty() {
        println!(
            "Warning: {} file(s) disappeared during the backup and were skipped",
            report.skipped_files.len()
        );
    }

    match &report.outcome {
        BackupOutcome::Created(record) => {
            println!("{} backup created: {}", record.backup_type, record.id);
            println!(
                "  {} file(s), {}",
                record.file_count,
                format_size(record.size_bytes)
            );
            if let Some(parent) = &record.parent_full_id {
                println!("  Based on full backup {}", parent);
            }
            println!(
                "  Archive: {}",
                manager.paths().resolve(&record.archive_path).display()
            );
        }
        BackupOutcome::NoChanges { parent_full_id } => {
            println!(
                "No changes since full backup {}; nothing to back up.",
                parent_full_id
            );
        }
    }

    let removed = RetentionManager::new(config.clone(), sink).prune(None)?;
    if !removed.is_empty() {
        println!();
        println!(
            "Retention: removed {} old session(s) (max_backups = {})",
            removed.len(),
            config.max_backups
        );
        for record in &removed {
            println!("  - {} ({})", record.id, record.backup_type);
        }
    }

    Ok(())
}

/// List the session records of the destination
pub fn handle_list_command(config: &BackupConfig, verbose: bool) -> BackupResult<()> {
    let manager = ChainManager::new(config.clone(), event_sink(config));
    let sessions = manager.list_sessions()?;

    if sessions.is_empty() {
        println!("No backups found.");
        println!("Create one with: diffback backup");
        return Ok(());
    }

    if verbose {
        for session in &sessions {
            println!("{}", format_session_details(session));
        }
        println!("Total: {} session(s)", sessions.len());
    } else {
        println!("{}", format_session_list(&sessions, Utc::now()));
    }

    Ok(())
}

/// Prune whole segments down to `max` records (default: `max_backups`)
///
/// With `dry_run`, only show what would be removed.
pub fn handle_prune_command(
    config: &BackupConfig,
    max: Option<i64>,
    dry_run: bool,
) -> BackupResult<()> {
    let limit = max.unwrap_or(config.max_backups);
    if limit <= 0 {
        println!("Pruning is disabled (max_backups = {}).", limit);
        return Ok(());
    }

    let retention = RetentionManager::new(config.clone(), event_sink(config));
    let plan = retention.plan(Some(limit))?;

    if plan.is_empty() {
        println!("No sessions to prune (limit {}).", limit);
        return Ok(());
    }

    if dry_run {
        println!("Would remove {} session(s):", plan.len());
        for record in &plan.sessions {
            println!("  - {} ({})", record.id, record.backup_type);
        }
        return Ok(());
    }

    let removed = retention.apply(&plan)?;
    println!("Removed {} session(s):", removed.len());
    for record in &removed {
        println!("  - {} ({})", record.id, record.backup_type);
    }

    Ok(())
}

/// Re-verify archives; fails if any archive is damaged or missing
pub fn handle_verify_command(config: &BackupConfig, name: Option<&str>) -> BackupResult<()> {
    let manager = ChainManager::new(config.clone(), event_sink(config));
    let results = manager.verify_archives(name)?;

    if results.is_empty() {
        println!("No backups found.");
        return Ok(());
    }

    for result in &results {
        match &result.detail {
            None => println!("  OK      {}", result.session_id),
            Some(detail) => println!("  FAILED  {}: {}", result.session_id, detail),
        }
    }

    let failed: Vec<_> = results.iter().filter(|r| !r.intact).collect();
    match failed.first() {
        None => {
            println!();
            println!("All {} archive(s) intact.", results.len());
            Ok(())
        }
        Some(first) => Err(BackupError::Integrity {
            archive: first.archive.clone(),
            detail: format!(
                "{} of {} archive(s) failed verification",
                failed.len(),
                results.len()
            ),
        }),
    }
}

/// Show the most recent chain events
pub fn handle_events_command(config: &BackupConfig, limit: usize) -> BackupResult<()> {
    let log = EventLog::new(config.destination().events_log());
    let events = log.read_recent(limit)?;
    println!("{}", format_event_list(&events));
    Ok(())
}

/// Show the effective configuration and destination layout
pub fn handle_config_command(config: &BackupConfig, config_path: &Path) -> BackupResult<()> {
    let paths = config.destination();

    println!("diffback Configuration");
    println!("======================");
    println!("Config file:        {}", config_path.display());
    println!("Backup destination: {}", paths.base_dir().display());
    println!("  Chain metadata:   {}", paths.chain_file().display());
    println!("  Event log:        {}", paths.events_log().display());
    println!("  Archives:         {}", paths.sessions_dir().display());
    println!();
    println!("Settings:");
    println!("  Type:                 {:?}", config.backup_type);
    println!("  Full backup interval: {} day(s)", config.full_backup_interval);
    println!("  Max backups:          {}", config.max_backups);
    println!("  Format:               {:?}", config.format);
    println!("  Strict hashing:       {}", config.strict_hashing);
    println!(
        "  Hash workers:         {}",
        if config.hash_workers == 0 {
            "one per CPU".to_string()
        } else {
            config.hash_workers.to_string()
        }
    );
    println!("  Restore deletions:    {:?}", config.restore_deletions);
    println!();
    println!("Folders:");
    for folder in &config.folders {
        let marker = if folder.path.is_dir() { "" } else { "  (missing)" };
        println!("  {}{}", folder, marker);
    }

    Ok(())
}
