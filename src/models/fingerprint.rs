//! File fingerprint models
//!
//! A fingerprint is the compact descriptor used to decide whether a file
//! changed since the last full backup.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Change descriptor for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    /// Label-rooted path inside the archive, `/`-separated
    pub relative_path: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified_at: DateTime<Utc>,
    /// Lowercase hex SHA-256 of the contents
    pub content_hash: String,
}

impl FileFingerprint {
    /// Size and modification time match, contents not compared
    pub fn same_metadata(&self, other: &FileFingerprint) -> bool {
        self.size == other.size && self.modified_at == other.modified_at
    }

    /// Whether this file counts as changed relative to `baseline`
    pub fn differs_from(&self, baseline: &FileFingerprint) -> bool {
        !self.same_metadata(baseline) || self.content_hash != baseline.content_hash
    }
}

/// Fingerprints keyed by relative path
///
/// Keying by path keeps relative paths unique within a set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintSet(BTreeMap<String, FileFingerprint>);

impl FingerprintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fingerprint, replacing any previous one for the same path
    pub fn insert(&mut self, fingerprint: FileFingerprint) {
        self.0.insert(fingerprint.relative_path.clone(), fingerprint);
    }

    pub fn get(&self, relative_path: &str) -> Option<&FileFingerprint> {
        self.0.get(relative_path)
    }

    pub fn remove(&mut self, relative_path: &str) -> Option<FileFingerprint> {
        self.0.remove(relative_path)
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.0.contains_key(relative_path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate fingerprints in path order
    pub fn iter(&self) -> impl Iterator<Item = &FileFingerprint> {
        self.0.values()
    }

    /// Iterate relative paths in order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Total size of all fingerprinted files
    pub fn total_size(&self) -> u64 {
        self.0.values().map(|f| f.size).sum()
    }
}

impl FromIterator<FileFingerprint> for FingerprintSet {
    fn from_iter<I: IntoIterator<Item = FileFingerprint>>(iter: I) -> Self {
        let mut set = FingerprintSet::new();
        for fingerprint in iter {
            set.insert(fingerprint);
        }
        set
    }
}

/// Result of comparing a scan against the baseline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintDiff {
    /// Modified and new files
    pub changed: BTreeSet<String>,
    /// Files in the baseline that are gone now
    pub deleted: BTreeSet<String>,
}

impl FingerprintDiff {
    /// No modified, new or deleted files
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

/// The fingerprint set of the active full backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Baseline {
    /// Id of the full session this baseline belongs to
    pub full_id: String,
    pub fingerprints: FingerprintSet,
}
