//! Chain manager for diffback
//!
//! Decides whether a run is a full or a differential backup, drives the
//! fingerprint store and session writer, and commits the resulting session
//! record to the chain metadata.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::fingerprint::{FingerprintScan, FingerprintStore};
use super::writer::{remove_stale_partials, ArchiveInput, SessionWriter, WriteSummary};
use super::{BackupOutcome, BackupReport, CancelToken};
use crate::audit::{ChainEvent, EventSink, Operation, Outcome};
use crate::config::paths::DestinationPaths;
use crate::config::{BackupConfig, ConfiguredType};
use crate::error::{BackupError, BackupResult};
use crate::models::{session_id_for, BackupChain, BackupType, Baseline, SessionRecord};
use crate::storage::{ChainMetadata, ChainStore, DestinationLock};

/// What the next run should be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Full,
    Differential { parent_full_id: String },
}

/// Pick the backup type for a run at `now`
///
/// A full backup is forced by configuration, by the lack of a usable
/// baseline, or by the full backup interval having elapsed.
pub fn decide_backup_type(
    config: &BackupConfig,
    metadata: &ChainMetadata,
    now: DateTime<Utc>,
) -> Decision {
    if config.backup_type == ConfiguredType::Full {
        return Decision::Full;
    }

    let Some(last_full) = metadata.chain.last_full() else {
        return Decision::Full;
    };

    if metadata.baseline_for(&last_full.id).is_none() {
        warn!(
            "No baseline stored for full backup {}, starting a new full",
            last_full.id
        );
        return Decision::Full;
    }

    // An interval too large to represent never elapses
    let elapsed = config
        .full_backup_interval()
        .map_or(false, |interval| now - last_full.created_at >= interval);
    if elapsed {
        return Decision::Full;
    }

    Decision::Differential {
        parent_full_id: last_full.id.clone(),
    }
}

/// Result of re-verifying one archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyResult {
    pub session_id: String,
    pub archive: PathBuf,
    pub intact: bool,
    /// Why the check failed
    pub detail: Option<String>,
}

/// Runs backups against one destination
pub struct ChainManager {
    config: BackupConfig,
    paths: DestinationPaths,
    store: ChainStore,
    writer: SessionWriter,
    sink: Arc<dyn EventSink>,
}

impl ChainManager {
    pub fn new(config: BackupConfig, sink: Arc<dyn EventSink>) -> Self {
        let paths = config.destination();
        let store = ChainStore::new(paths.chain_file());
        let writer = SessionWriter::for_kind(config.format);
        Self {
            config,
            paths,
            store,
            writer,
            sink,
        }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn paths(&self) -> &DestinationPaths {
        &self.paths
    }

    /// Run a backup now
    pub fn run_backup(&self, cancel: &CancelToken) -> BackupResult<BackupReport> {
        self.run_backup_at(Utc::now(), cancel)
    }

    /// Run a backup as if the current time were `now`
    pub fn run_backup_at(
        &self,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> BackupResult<BackupReport> {
        let started = Instant::now();
        let result = self.run_exclusive(now, cancel);

        match &result {
            Ok(report) => info!(
                "Backup run finished in {:.1}s ({})",
                started.elapsed().as_secs_f64(),
                describe_outcome(&report.outcome)
            ),
            Err(err) => {
                self.emit(ChainEvent::failure(Operation::Backup, None, err.to_string()).at(now))
            }
        }

        result
    }

    /// Session records, oldest first
    pub fn list_sessions(&self) -> BackupResult<Vec<SessionRecord>> {
        Ok(self.load_chain()?.sessions().to_vec())
    }

    pub fn load_chain(&self) -> BackupResult<BackupChain> {
        Ok(self.store.load()?.chain)
    }

    /// Re-verify archives and record the result in each session's `verified` flag
    ///
    /// With `session_id`, only that session is checked.
    pub fn verify_archives(&self, session_id: Option<&str>) -> BackupResult<Vec<VerifyResult>> {
        let _lock = DestinationLock::acquire(&self.paths.lock_file())?;
        let mut metadata = self.store.load()?;

        let ids: Vec<String> = match session_id {
            Some(id) => {
                if !metadata.chain.contains(id) {
                    return Err(BackupError::session_not_found(id));
                }
                vec![id.to_string()]
            }
            None => metadata.chain.sessions().iter().map(|s| s.id.clone()).collect(),
        };

        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(record) = metadata.chain.get_mut(&id) else {
                continue;
            };
            let archive = self.paths.resolve(&record.archive_path);
            let detail = if archive.exists() {
                self.writer.format().verify(&archive).err().map(|e| e.to_string())
            } else {
                Some(format!("archive {} is missing", archive.display()))
            };
            let intact = detail.is_none();
            record.verified = intact;

            let event = if intact {
                ChainEvent::success(Operation::Verify, &id, "archive intact")
            } else {
                ChainEvent::failure(
                    Operation::Verify,
                    Some(id.clone()),
                    detail.clone().unwrap_or_default(),
                )
            };
            self.emit(event);

            results.push(VerifyResult {
                session_id: id,
                archive,
                intact,
                detail,
            });
        }

        self.store.save(&metadata)?;
        Ok(results)
    }

    fn run_exclusive(
        &self,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> BackupResult<BackupReport> {
        self.paths.ensure_directories()?;
        let _lock = DestinationLock::acquire(&self.paths.lock_file())?;

        let stale = remove_stale_partials(&self.paths.sessions_dir())?;
        if stale > 0 {
            info!("Removed {} partial archive(s) from an interrupted run", stale);
        }

        let mut metadata = self.store.load()?;
        let hasher = FingerprintStore::new(self.config.hash_workers)?;

        match decide_backup_type(&self.config, &metadata, now) {
            Decision::Full => self.run_full(&hasher, &mut metadata, now, cancel),
            Decision::Differential { parent_full_id } => {
                self.run_differential(&hasher, &mut metadata, parent_full_id, now, cancel)
            }
        }
    }

    fn run_full(
        &self,
        hasher: &FingerprintStore,
        metadata: &mut ChainMetadata,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> BackupResult<BackupReport> {
        info!("Starting full backup");
        let scan = hasher.compute_fingerprints(&self.config.folders, cancel)?;
        self.ensure_sources(&scan)?;
        debug!(
            "Scanned {} files ({} bytes)",
            scan.fingerprints.len(),
            scan.fingerprints.total_size()
        );

        let inputs = scan.all_inputs();
        let id = metadata.chain.unique_id(&session_id_for(now));
        let (archive_path, archive, summary) =
            self.write_archive(&id, BackupType::Full, &inputs, cancel)?;

        if summary.file_count == 0 && !inputs.is_empty() {
            remove_archive(&archive);
            return Err(BackupError::SourceMissing {
                paths: inputs.iter().map(|i| i.source_path.clone()).collect(),
            });
        }

        let mut fingerprints = scan.fingerprints.clone();
        for skipped in &summary.skipped {
            fingerprints.remove(skipped);
        }

        let record = SessionRecord {
            id: id.clone(),
            backup_type: BackupType::Full,
            created_at: now,
            parent_full_id: None,
            archive_path,
            file_count: summary.file_count,
            size_bytes: summary.size_bytes,
            verified: true,
            deleted_paths: Vec::new(),
        };

        metadata.chain.insert(record.clone());
        metadata.baseline = Some(Baseline {
            full_id: id.clone(),
            fingerprints,
        });
        self.commit(metadata, &archive)?;

        self.emit(
            ChainEvent::success(
                Operation::Backup,
                &id,
                format!("full, {} files, {} bytes", record.file_count, record.size_bytes),
            )
            .at(now),
        );

        Ok(report(BackupOutcome::Created(record), scan, summary.skipped))
    }

    fn run_differential(
        &self,
        hasher: &FingerprintStore,
        metadata: &mut ChainMetadata,
        parent_full_id: String,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> BackupResult<BackupReport> {
        info!("Starting differential backup against {}", parent_full_id);
        let baseline = metadata
            .baseline_for(&parent_full_id)
            .map(|b| b.fingerprints.clone())
            .ok_or_else(|| {
                BackupError::Storage(format!("No baseline stored for {}", parent_full_id))
            })?;

        let scan = hasher.compute_against(
            &self.config.folders,
            &baseline,
            self.config.strict_hashing,
            cancel,
        )?;
        self.ensure_sources(&scan)?;
        debug!("Hashed {} of {} files", scan.hashed, scan.fingerprints.len());

        let diff = FingerprintStore::diff(&scan.fingerprints, &baseline);
        if diff.changed.is_empty() {
            let detail = if diff.deleted.is_empty() {
                "no changes since last full".to_string()
            } else {
                format!(
                    "no changed files since last full ({} deleted)",
                    diff.deleted.len()
                )
            };
            self.emit(
                ChainEvent::new(
                    Operation::Backup,
                    Some(parent_full_id.clone()),
                    Outcome::Skipped,
                    detail,
                )
                .at(now),
            );
            return Ok(report(
                BackupOutcome::NoChanges { parent_full_id },
                scan,
                Vec::new(),
            ));
        }

        let inputs = scan.inputs_for(&diff.changed);
        let id = metadata.chain.unique_id(&session_id_for(now));
        let (archive_path, archive, summary) =
            self.write_archive(&id, BackupType::Differential, &inputs, cancel)?;

        if summary.file_count == 0 {
            remove_archive(&archive);
            return Err(BackupError::SourceMissing {
                paths: inputs.iter().map(|i| i.source_path.clone()).collect(),
            });
        }

        let record = SessionRecord {
            id: id.clone(),
            backup_type: BackupType::Differential,
            created_at: now,
            parent_full_id: Some(parent_full_id.clone()),
            archive_path,
            file_count: summary.file_count,
            size_bytes: summary.size_bytes,
            verified: true,
            deleted_paths: diff.deleted.into_iter().collect(),
        };

        metadata.chain.insert(record.clone());
        self.commit(metadata, &archive)?;

        self.emit(
            ChainEvent::success(
                Operation::Backup,
                &id,
                format!(
                    "differential on {}, {} files, {} bytes",
                    parent_full_id, record.file_count, record.size_bytes
                ),
            )
            .at(now),
        );

        Ok(report(BackupOutcome::Created(record), scan, summary.skipped))
    }

    /// Fail when no configured source exists
    fn ensure_sources(&self, scan: &FingerprintScan) -> BackupResult<()> {
        if !scan.missing_sources.is_empty()
            && scan.missing_sources.len() >= self.config.folders.len()
        {
            return Err(BackupError::SourceMissing {
                paths: scan.missing_sources.clone(),
            });
        }
        Ok(())
    }

    /// Returns the stored (relative) path, the absolute path and the summary
    fn write_archive(
        &self,
        id: &str,
        backup_type: BackupType,
        inputs: &[ArchiveInput],
        cancel: &CancelToken,
    ) -> BackupResult<(PathBuf, PathBuf, WriteSummary)> {
        let relative = self
            .paths
            .relative_archive_path(id, backup_type, self.writer.extension());
        let archive = self.paths.resolve(&relative);
        let summary = self.writer.write(inputs, &archive, cancel)?;
        Ok((relative, archive, summary))
    }

    /// Commit metadata; an uncommitted archive is removed
    fn commit(&self, metadata: &ChainMetadata, archive: &Path) -> BackupResult<()> {
        if let Err(err) = self.store.save(metadata) {
            remove_archive(archive);
            return Err(err);
        }
        Ok(())
    }

    fn emit(&self, event: ChainEvent) {
        if let Err(e) = self.sink.emit(&event) {
            warn!("Failed to record {} event: {}", event.operation, e);
        }
    }
}

fn report(outcome: BackupOutcome, scan: FingerprintScan, skipped: Vec<String>) -> BackupReport {
    let mut skipped_files: Vec<String> = scan
        .vanished
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    skipped_files.extend(skipped);

    BackupReport {
        outcome,
        missing_sources: scan.missing_sources,
        skipped_files,
    }
}

fn remove_archive(archive: &Path) {
    if let Err(e) = fs::remove_file(archive) {
        warn!("Failed to remove archive {}: {}", archive.display(), e);
    }
}

fn describe_outcome(outcome: &BackupOutcome) -> String {
    match outcome {
        BackupOutcome::Created(record) => format!("{} {}", record.backup_type, record.id),
        BackupOutcome::NoChanges { .. } => "no changes".to_string(),
    }
}
