//! Restore engine for diffback
//!
//! Resolves the sessions needed to rebuild a target and replays their
//! archives in order into a destination directory.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use super::writer::ArchiveFormat;
use super::CancelToken;
use crate::audit::{ChainEvent, EventSink, Operation};
use crate::config::paths::DestinationPaths;
use crate::config::{BackupConfig, DeletionPolicy};
use crate::error::{BackupError, BackupResult};
use crate::models::{BackupChain, SessionRecord};
use crate::storage::{ChainStore, DestinationLock};

/// How to pick the session to restore
pub enum SessionSelector<'a> {
    /// The most recent session
    Latest,
    /// A session by id
    Name(&'a str),
    /// Ask the callback; it returns an index into the candidates
    Prompt(&'a dyn Fn(&[SessionRecord]) -> Option<usize>),
}

/// Pick a restore target from `candidates` (oldest first)
pub fn select_session(
    candidates: &[SessionRecord],
    selector: SessionSelector<'_>,
) -> BackupResult<SessionRecord> {
    if candidates.is_empty() {
        return Err(BackupError::session_not_found("(no sessions available)"));
    }

    let (found, identifier) = match selector {
        SessionSelector::Latest => (candidates.last(), "latest".to_string()),
        SessionSelector::Name(id) => (candidates.iter().find(|s| s.id == id), id.to_string()),
        SessionSelector::Prompt(ask) => {
            let index = ask(candidates)
                .ok_or_else(|| BackupError::Cancelled("no session selected".into()))?;
            (candidates.get(index), format!("#{}", index + 1))
        }
    };

    found
        .cloned()
        .ok_or_else(|| BackupError::session_not_found(identifier))
}

/// Sessions needed to rebuild `target_id`, oldest first
///
/// Differentials are cumulative, so a differential needs only its parent full.
pub fn resolve_chain(chain: &BackupChain, target_id: &str) -> BackupResult<Vec<SessionRecord>> {
    let target = chain
        .get(target_id)
        .ok_or_else(|| BackupError::session_not_found(target_id))?;

    if target.is_full() {
        return Ok(vec![target.clone()]);
    }

    let parent_id = target
        .parent_full_id
        .as_deref()
        .ok_or_else(|| BackupError::ChainBroken {
            target: target_id.to_string(),
            missing: target_id.to_string(),
            reason: "has no parent full backup".to_string(),
        })?;

    match chain.get(parent_id) {
        Some(parent) if parent.is_full() => Ok(vec![parent.clone(), target.clone()]),
        _ => Err(BackupError::missing_link(target_id, parent_id)),
    }
}

/// Outcome of a restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub target_id: String,
    /// Sessions replayed, in order
    pub sessions_applied: Vec<String>,
    /// Distinct files written
    pub files_restored: usize,
    /// Files removed under the `remove` deletion policy
    pub files_removed: usize,
    pub destination: PathBuf,
}

/// Restores sessions of one backup destination
pub struct RestoreEngine {
    paths: DestinationPaths,
    store: ChainStore,
    format: Box<dyn ArchiveFormat>,
    deletions: DeletionPolicy,
    sink: Arc<dyn EventSink>,
}

impl RestoreEngine {
    pub fn new(config: BackupConfig, sink: Arc<dyn EventSink>) -> Self {
        let paths = config.destination();
        let store = ChainStore::new(paths.chain_file());
        Self {
            paths,
            store,
            format: config.format.create_format(),
            deletions: config.restore_deletions,
            sink,
        }
    }

    pub fn with_deletion_policy(mut self, policy: DeletionPolicy) -> Self {
        self.deletions = policy;
        self
    }

    pub fn chain(&self) -> BackupResult<BackupChain> {
        Ok(self.store.load()?.chain)
    }

    pub fn resolve_chain(&self, target_id: &str) -> BackupResult<Vec<SessionRecord>> {
        resolve_chain(&self.chain()?, target_id)
    }

    /// Resolve and restore `target_id` in one step
    pub fn restore_target(
        &self,
        target_id: &str,
        destination: &Path,
        selected_folders: Option<&[String]>,
        cancel: &CancelToken,
    ) -> BackupResult<RestoreReport> {
        let sessions = match self.resolve_chain(target_id) {
            Ok(sessions) => sessions,
            Err(err) => {
                self.emit_failure(target_id, &err);
                return Err(err);
            }
        };
        self.restore(&sessions, destination, selected_folders, cancel)
    }

    /// Replay `sessions` (oldest first) into `destination`
    ///
    /// Every archive is checked before anything is written; a missing or
    /// damaged one fails the whole restore with `ChainBroken`.
    pub fn restore(
        &self,
        sessions: &[SessionRecord],
        destination: &Path,
        selected_folders: Option<&[String]>,
        cancel: &CancelToken,
    ) -> BackupResult<RestoreReport> {
        let target_id = sessions
            .last()
            .map(|s| s.id.clone())
            .ok_or_else(|| BackupError::Config("no sessions to restore".into()))?;

        let result = DestinationLock::acquire(&self.paths.lock_file()).and_then(|_lock| {
            self.restore_locked(&target_id, sessions, destination, selected_folders, cancel)
        });

        match &result {
            Ok(report) => {
                let event = ChainEvent::success(
                    Operation::Restore,
                    &target_id,
                    format!(
                        "{} files from {} session(s) into {}",
                        report.files_restored,
                        report.sessions_applied.len(),
                        destination.display()
                    ),
                );
                if let Err(e) = self.sink.emit(&event) {
                    warn!("Failed to record restore event: {}", e);
                }
            }
            Err(err) => self.emit_failure(&target_id, err),
        }

        result
    }

    fn restore_locked(
        &self,
        target_id: &str,
        sessions: &[SessionRecord],
        destination: &Path,
        selected_folders: Option<&[String]>,
        cancel: &CancelToken,
    ) -> BackupResult<RestoreReport> {
        for session in sessions {
            self.check_link(target_id, session)?;
        }

        let folders = selected_folders.map(normalize_folders);
        let selected = |path: &str| match &folders {
            Some(folders) => folders.iter().any(|f| in_folder(path, f)),
            None => true,
        };
        if let Some(folders) = &folders {
            self.check_selection(sessions, folders)?;
        }

        fs::create_dir_all(destination).map_err(|e| {
            BackupError::Io(format!(
                "Failed to create restore destination {}: {}",
                destination.display(),
                e
            ))
        })?;

        let mut restored = BTreeSet::new();
        let mut applied = Vec::with_capacity(sessions.len());
        for session in sessions {
            let archive = self.paths.resolve(&session.archive_path);
            let written = self.format.unpack(&archive, destination, &selected, cancel)?;
            info!("Applied {} ({} files)", session.id, written.len());
            restored.extend(written);
            applied.push(session.id.clone());
        }

        let mut files_removed = 0;
        if self.deletions == DeletionPolicy::Remove {
            if let Some(target) = sessions.last() {
                for path in target.deleted_paths.iter().filter(|p| selected(p.as_str())) {
                    let Some(file) = contained_path(destination, path) else {
                        warn!("Ignoring unsafe deleted path {}", path);
                        continue;
                    };
                    if file.is_file() {
                        fs::remove_file(&file)?;
                        restored.remove(path);
                        files_removed += 1;
                    }
                }
            }
        }

        // Later sessions may have replaced a restored file with a directory
        restored.retain(|path| destination.join(path).is_file());

        Ok(RestoreReport {
            target_id: target_id.to_string(),
            sessions_applied: applied,
            files_restored: restored.len(),
            files_removed,
            destination: destination.to_path_buf(),
        })
    }

    /// A session's archive must exist, be marked verified and pass verification
    fn check_link(&self, target_id: &str, session: &SessionRecord) -> BackupResult<()> {
        let archive = self.paths.resolve(&session.archive_path);
        let broken = |reason: String| BackupError::ChainBroken {
            target: target_id.to_string(),
            missing: session.id.clone(),
            reason,
        };

        if !archive.exists() {
            return Err(broken(format!("archive {} is missing", archive.display())));
        }
        if !session.verified {
            return Err(broken("failed verification".to_string()));
        }
        self.format
            .verify(&archive)
            .map_err(|e| broken(format!("failed integrity check: {}", e)))
    }

    /// Every selected folder must hold at least one entry of the chain
    fn check_selection(&self, sessions: &[SessionRecord], folders: &[String]) -> BackupResult<()> {
        let mut unmatched: Vec<&String> = folders.iter().collect();
        for session in sessions {
            let archive = self.paths.resolve(&session.archive_path);
            for entry in self.format.entries(&archive)? {
                unmatched.retain(|f| !in_folder(&entry.relative_path, f));
            }
        }

        match unmatched.first() {
            None => Ok(()),
            Some(folder) => Err(BackupError::NotFound {
                entity_type: "Folder",
                identifier: format!(
                    "{} (folders are named by their archive label, e.g. `docs/reports`)",
                    folder
                ),
            }),
        }
    }

    fn emit_failure(&self, target_id: &str, err: &BackupError) {
        let event = ChainEvent::failure(
            Operation::Restore,
            Some(target_id.to_string()),
            err.to_string(),
        );
        if let Err(e) = self.sink.emit(&event) {
            warn!("Failed to record restore event: {}", e);
        }
    }
}

/// `/`-separated folder names without trailing separators
fn normalize_folders(folders: &[String]) -> Vec<String> {
    folders
        .iter()
        .map(|f| f.replace('\\', "/").trim_end_matches('/').to_string())
        .filter(|f| !f.is_empty())
        .collect()
}

fn in_folder(path: &str, folder: &str) -> bool {
    path == folder
        || path
            .strip_prefix(folder)
            .map_or(false, |rest| rest.starts_with('/'))
}

/// `root/relative`, unless `relative` could escape `root`
fn contained_path(root: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then(|| root.join(relative))
}
