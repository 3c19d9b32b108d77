//! Restore CLI command
//!
//! Picks a target session (by name or through a numbered prompt) and
//! restores its chain into a directory.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use chrono::Utc;
use clap::Args;

use super::backup::event_sink;
use crate::backup::{select_session, CancelToken, RestoreEngine, SessionSelector};
use crate::config::{BackupConfig, DeletionPolicy};
use crate::display::format_session_list;
use crate::error::BackupResult;
use crate::models::SessionRecord;

/// Arguments of `diffback restore`
#[derive(Debug, Args)]
pub struct RestoreArgs {
    /// Session id to restore (prompts when omitted)
    #[arg(short = 'n', long = "backup-name")]
    pub backup_name: Option<String>,

    /// Only restore these folders (label-rooted, e.g. `docs` or `docs/reports`)
    #[arg(short, long, num_args = 1..)]
    pub folders: Vec<String>,

    /// Directory to restore into (default: ./restored/<session id>)
    #[arg(short, long)]
    pub to: Option<PathBuf>,

    /// Remove files that were deleted before the target session was taken
    #[arg(long)]
    pub remove_deleted: bool,
}

/// Handle `diffback restore`
pub fn handle_restore_command(
    config: &BackupConfig,
    args: RestoreArgs,
    cancel: &CancelToken,
) -> BackupResult<()> {
    let mut engine = RestoreEngine::new(config.clone(), event_sink(config));
    if args.remove_deleted {
        engine = engine.with_deletion_policy(DeletionPolicy::Remove);
    }

    let sessions = engine.chain()?.sessions().to_vec();
    let selector = match args.backup_name.as_deref() {
        Some(name) if name.eq_ignore_ascii_case("latest") => SessionSelector::Latest,
        Some(name) => SessionSelector::Name(name),
        None => SessionSelector::Prompt(&prompt_for_session),
    };
    let target = select_session(&sessions, selector)?;

    let destination = args
        .to
        .unwrap_or_else(|| PathBuf::from("restored").join(&target.id));
    let folders = (!args.folders.is_empty()).then_some(args.folders.as_slice());

    let chain = engine.resolve_chain(&target.id)?;
    println!(
        "Restoring {} ({}) into {}",
        target.id,
        target.backup_type,
        destination.display()
    );
    if chain.len() > 1 {
        let ids: Vec<&str> = chain.iter().map(|s| s.id.as_str()).collect();
        println!("  Applying: {}", ids.join(" -> "));
    }

    let report = engine.restore(&chain, &destination, folders, cancel)?;

    println!("Restore complete!");
    println!(
        "  {} file(s) restored from {} session(s)",
        report.files_restored,
        report.sessions_applied.len()
    );
    if report.files_removed > 0 {
        println!("  {} deleted file(s) removed", report.files_removed);
    }

    Ok(())
}

/// Show the numbered session list and read a choice from stdin
fn prompt_for_session(candidates: &[SessionRecord]) -> Option<usize> {
    println!("{}", format_session_list(candidates, Utc::now()));
    println!();
    print!(
        "Select a backup to restore [1-{}] (empty to cancel): ",
        candidates.len()
    );
    io::stdout().flush().ok()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).ok()?;
    parse_choice(line.trim(), candidates)
}

/// A 1-based number or a session id
fn parse_choice(input: &str, candidates: &[SessionRecord]) -> Option<usize> {
    if input.is_empty() {
        return None;
    }
    match input.parse::<usize>() {
        Ok(number) if (1..=candidates.len()).contains(&number) => Some(number - 1),
        Ok(_) => None,
        Err(_) => candidates.iter().position(|s| s.id == input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chain::tests::record;

    #[test]
    fn test_parse_choice() {
        let sessions = vec![record("F1", 0, None), record("D1", 1, Some("F1"))];

        assert_eq!(parse_choice("1", &sessions), Some(0));
        assert_eq!(parse_choice("2", &sessions), Some(1));
        assert_eq!(parse_choice("3", &sessions), None);
        assert_eq!(parse_choice("0", &sessions), None);
        assert_eq!(parse_choice("D1", &sessions), Some(1));
        assert_eq!(parse_choice("", &sessions), None);
    }
}
