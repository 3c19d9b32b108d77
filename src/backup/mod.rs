//! Differential backup engine for diffback
//!
//! Maintains a chain of backup sessions per destination: full snapshots and
//! differentials that each hold every file changed since their parent full.
//!
//! # Architecture
//!
//! - `FingerprintStore`: scans sources and diffs them against the baseline
//!   of the last full backup
//! - `SessionWriter`: streams files into a verified archive
//! - `ChainManager`: decides full vs differential and commits sessions
//! - `RetentionManager`: prunes whole segments, oldest first
//! - `RestoreEngine`: resolves and replays the chain to a target session
//!
//! All of them take a `BackupConfig` value and report chain mutations to an
//! `EventSink`. Every run holds the destination lock from start to commit.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use diffback::audit::EventLog;
//! use diffback::backup::{CancelToken, ChainManager, RetentionManager};
//!
//! let sink = Arc::new(EventLog::new(config.destination().events_log()));
//! let manager = ChainManager::new(config.clone(), sink.clone());
//! let report = manager.run_backup(&CancelToken::new())?;
//!
//! RetentionManager::new(config, sink).prune(None)?;
//! ```

mod fingerprint;
mod manager;
mod restore;
mod retention;
mod writer;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use fingerprint::{archive_path, hash_file, FingerprintScan, FingerprintStore};
pub use manager::{decide_backup_type, ChainManager, Decision, VerifyResult};
pub use restore::{
    resolve_chain, select_session, RestoreEngine, RestoreReport, SessionSelector,
};
pub use retention::{plan_prune, PrunePlan, RetentionManager};
pub use writer::{
    partial_path, remove_stale_partials, ArchiveEntry, ArchiveFormat, ArchiveInput,
    SessionWriter, WriteSummary, ZipFormat, MANIFEST_NAME,
};

use crate::error::{BackupError, BackupResult};
use crate::models::SessionRecord;

/// Cooperative cancellation flag shared between a run and its caller
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; running operations stop at the next file boundary
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with `Cancelled` if cancellation was requested
    pub fn check(&self, what: &str) -> BackupResult<()> {
        if self.is_cancelled() {
            Err(BackupError::Cancelled(what.to_string()))
        } else {
            Ok(())
        }
    }
}

/// What a backup run produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// A new session was committed
    Created(SessionRecord),
    /// Nothing changed since the parent full; no archive, no record
    NoChanges { parent_full_id: String },
}

/// Result of `ChainManager::run_backup`
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub outcome: BackupOutcome,
    /// Configured sources that did not exist
    pub missing_sources: Vec<PathBuf>,
    /// Files that disappeared before they could be archived
    pub skipped_files: Vec<String>,
}

impl BackupReport {
    /// The committed session, if any
    pub fn session(&self) -> Option<&SessionRecord> {
        match &self.outcome {
            BackupOutcome::Created(record) => Some(record),
            BackupOutcome::NoChanges { .. } => None,
        }
    }
}
