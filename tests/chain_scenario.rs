//! End-to-end chain lifecycle through the library API

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;

use diffback::audit::{MemorySink, Operation, Outcome};
use diffback::backup::{BackupOutcome, CancelToken, ChainManager, RestoreEngine, RetentionManager};
use diffback::config::BackupConfig;
use diffback::models::{BackupSource, BackupType, SessionRecord};
use diffback::BackupError;

fn created(outcome: BackupOutcome) -> SessionRecord {
    match outcome {
        BackupOutcome::Created(record) => record,
        other => panic!("expected a new session, got {:?}", other),
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn test_weekly_chain_lifecycle() {
    let temp = TempDir::new().unwrap();
    let docs = temp.path().join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(docs.join("notes.txt"), "first draft").unwrap();
    fs::write(docs.join("todo.txt"), "buy milk").unwrap();

    let mut config = BackupConfig::new(
        temp.path().join("backups"),
        vec![BackupSource::new(&docs, true)],
    );
    config.full_backup_interval = 7;
    config.max_backups = 2;

    let sink = Arc::new(MemorySink::new());
    let manager = ChainManager::new(config.clone(), sink.clone());
    let cancel = CancelToken::new();
    let day0 = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();

    // Day 0: first run is a full backup
    let f1 = created(manager.run_backup_at(day0, &cancel).unwrap().outcome);
    assert_eq!(f1.backup_type, BackupType::Full);
    assert_eq!(f1.file_count, 2);

    // Day 1: a new file lands in a differential
    fs::write(docs.join("x.txt"), "new file").unwrap();
    let d1 = created(
        manager
            .run_backup_at(day0 + Duration::days(1), &cancel)
            .unwrap()
            .outcome,
    );
    assert_eq!(d1.backup_type, BackupType::Differential);
    assert_eq!(d1.parent_full_id.as_deref(), Some(f1.id.as_str()));
    assert_eq!(d1.file_count, 1);

    // Day 8: interval exceeded, fresh full
    let f2 = created(
        manager
            .run_backup_at(day0 + Duration::days(8), &cancel)
            .unwrap()
            .outcome,
    );
    assert_eq!(f2.backup_type, BackupType::Full);
    assert_eq!(f2.file_count, 3);

    // Day 9: nothing changed, no record
    let report = manager
        .run_backup_at(day0 + Duration::days(9), &cancel)
        .unwrap();
    match report.outcome {
        BackupOutcome::NoChanges { parent_full_id } => assert_eq!(parent_full_id, f2.id),
        other => panic!("expected no changes, got {:?}", other),
    }

    let ids: Vec<String> = manager
        .list_sessions()
        .unwrap()
        .into_iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, vec![f1.id.clone(), d1.id.clone(), f2.id.clone()]);

    // Resolve D1 before its segment goes away
    let restore = RestoreEngine::new(config.clone(), sink.clone());
    let d1_chain = restore.resolve_chain(&d1.id).unwrap();
    assert_eq!(d1_chain.len(), 2);

    let removed = RetentionManager::new(config.clone(), sink.clone())
        .prune(None)
        .unwrap();
    let removed_ids: Vec<&str> = removed.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(removed_ids, vec![f1.id.as_str(), d1.id.as_str()]);

    let remaining = manager.list_sessions().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, f2.id);

    // The pruned differential can no longer be restored
    let out = temp.path().join("out-d1");
    let err = restore
        .restore(&d1_chain, &out, None, &cancel)
        .unwrap_err();
    match err {
        BackupError::ChainBroken { missing, .. } => assert_eq!(missing, f1.id),
        other => panic!("expected a broken chain, got {:?}", other),
    }
    assert!(!out.exists());
    assert!(restore.resolve_chain(&d1.id).unwrap_err().is_not_found());

    // The surviving full restores every file
    let out = temp.path().join("out-f2");
    let report = restore.restore_target(&f2.id, &out, None, &cancel).unwrap();
    assert_eq!(report.files_restored, 3);
    assert_eq!(read(&out.join("docs/notes.txt")), "first draft");
    assert_eq!(read(&out.join("docs/x.txt")), "new file");

    let events = sink.events();
    assert!(events
        .iter()
        .any(|e| e.operation == Operation::Backup && e.outcome == Outcome::Skipped));
    assert_eq!(
        events
            .iter()
            .filter(|e| e.operation == Operation::Prune)
            .count(),
        2
    );
    assert!(events
        .iter()
        .any(|e| e.operation == Operation::Restore && e.outcome == Outcome::Failure));
}

#[test]
fn test_differential_restores_from_two_archives() {
    let temp = TempDir::new().unwrap();
    let docs = temp.path().join("docs");
    fs::create_dir_all(docs.join("sub")).unwrap();
    fs::write(docs.join("a.txt"), "a").unwrap();
    fs::write(docs.join("sub/b.txt"), "b").unwrap();

    let config = BackupConfig::new(
        temp.path().join("backups"),
        vec![BackupSource::new(&docs, true)],
    );
    let sink = Arc::new(MemorySink::new());
    let manager = ChainManager::new(config.clone(), sink.clone());
    let cancel = CancelToken::new();
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();

    let full = created(manager.run_backup_at(start, &cancel).unwrap().outcome);

    fs::write(docs.join("a.txt"), "a, revised").unwrap();
    let first = created(
        manager
            .run_backup_at(start + Duration::hours(1), &cancel)
            .unwrap()
            .outcome,
    );

    fs::write(docs.join("c.txt"), "c").unwrap();
    let second = created(
        manager
            .run_backup_at(start + Duration::hours(2), &cancel)
            .unwrap()
            .outcome,
    );

    // Differentials are cumulative against the full, not each other
    assert_eq!(first.file_count, 1);
    assert_eq!(second.file_count, 2);
    assert_eq!(second.parent_full_id.as_deref(), Some(full.id.as_str()));

    let restore = RestoreEngine::new(config, sink);
    let chain = restore.resolve_chain(&second.id).unwrap();
    let ids: Vec<&str> = chain.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec![full.id.as_str(), second.id.as_str()]);

    let out = temp.path().join("out");
    restore.restore(&chain, &out, None, &cancel).unwrap();
    assert_eq!(read(&out.join("docs/a.txt")), "a, revised");
    assert_eq!(read(&out.join("docs/sub/b.txt")), "b");
    assert_eq!(read(&out.join("docs/c.txt")), "c");
}
