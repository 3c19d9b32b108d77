//! Retention manager for diffback
//!
//! Pruning works on whole segments (a full backup and its differentials),
//! oldest first, so no differential ever outlives the full it depends on.
//! Selection is a pure function over the chain; applying it is the only
//! part that touches the filesystem.

use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;

use tracing::{info, warn};

use crate::audit::{ChainEvent, EventSink, Operation};
use crate::config::paths::DestinationPaths;
use crate::config::BackupConfig;
use crate::error::BackupResult;
use crate::models::{BackupChain, SessionRecord};
use crate::storage::{ChainStore, DestinationLock};

/// Sessions selected for removal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrunePlan {
    pub sessions: Vec<SessionRecord>,
}

impl PrunePlan {
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.id.clone()).collect()
    }
}

/// Select whole segments to remove until at most `max_backups` records remain
///
/// The current (most recent) segment is never selected, even when it alone
/// exceeds the limit. Differentials whose full is already gone are always
/// selected since they cannot be restored. `max_backups <= 0` disables
/// pruning.
pub fn plan_prune(chain: &BackupChain, max_backups: i64) -> PrunePlan {
    if max_backups <= 0 {
        return PrunePlan::default();
    }
    let limit = max_backups as usize;

    let mut sessions: Vec<SessionRecord> = chain.orphans().into_iter().cloned().collect();
    let mut remaining = chain.len() - sessions.len();

    let segments = chain.segments();
    let older = segments.len().saturating_sub(1);
    for segment in &segments[..older] {
        if remaining <= limit {
            break;
        }
        remaining -= segment.record_count();
        sessions.extend(segment.records().into_iter().cloned());
    }

    PrunePlan { sessions }
}

/// Applies retention to one destination
pub struct RetentionManager {
    config: BackupConfig,
    paths: DestinationPaths,
    store: ChainStore,
    sink: Arc<dyn EventSink>,
}

impl RetentionManager {
    pub fn new(config: BackupConfig, sink: Arc<dyn EventSink>) -> Self {
        let paths = config.destination();
        let store = ChainStore::new(paths.chain_file());
        Self {
            config,
            paths,
            store,
            sink,
        }
    }

    /// Plan against the stored chain, using `max_backups` or the configured limit
    pub fn plan(&self, max_backups: Option<i64>) -> BackupResult<PrunePlan> {
        let metadata = self.store.load()?;
        Ok(plan_prune(
            &metadata.chain,
            max_backups.unwrap_or(self.config.max_backups),
        ))
    }

    /// Remove the planned sessions; returns the records removed
    pub fn apply(&self, plan: &PrunePlan) -> BackupResult<Vec<SessionRecord>> {
        if plan.is_empty() {
            return Ok(Vec::new());
        }
        let _lock = DestinationLock::acquire(&self.paths.lock_file())?;
        self.apply_locked(plan)
    }

    /// Plan and apply under one lock
    pub fn prune(&self, max_backups: Option<i64>) -> BackupResult<Vec<SessionRecord>> {
        let _lock = DestinationLock::acquire(&self.paths.lock_file())?;
        let plan = self.plan(max_backups)?;
        if plan.is_empty() {
            return Ok(Vec::new());
        }
        self.apply_locked(&plan)
    }

    fn apply_locked(&self, plan: &PrunePlan) -> BackupResult<Vec<SessionRecord>> {
        let mut metadata = self.store.load()?;
        let removed = metadata.chain.remove_all(&plan.ids());
        if removed.is_empty() {
            return Ok(removed);
        }

        let baseline_removed = metadata
            .baseline
            .as_ref()
            .map_or(false, |b| removed.iter().any(|r| r.id == b.full_id));
        if baseline_removed {
            metadata.baseline = None;
        }

        // Records go first; an archive without a record is only wasted space
        self.store.save(&metadata)?;

        for record in &removed {
            let archive = self.paths.resolve(&record.archive_path);
            match fs::remove_file(&archive) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!("Archive {} was already gone", archive.display());
                }
                Err(e) => warn!("Failed to delete archive {}: {}", archive.display(), e),
            }

            let event = ChainEvent::success(
                Operation::Prune,
                &record.id,
                format!("{} session removed", record.backup_type),
            );
            if let Err(e) = self.sink.emit(&event) {
                warn!("Failed to record prune event: {}", e);
            }
        }

        info!("Pruned {} session(s)", removed.len());
        Ok(removed)
    }
}
