//! Chain metadata persistence
//!
//! `chain.json` is the single source of truth for a destination: every
//! session record plus the fingerprint baseline of the active full backup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::file_io::{read_json, write_json_atomic};
use crate::error::BackupResult;
use crate::models::{BackupChain, Baseline};

const SCHEMA_VERSION: u32 = 1;

/// Contents of `chain.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMetadata {
    pub schema_version: u32,

    #[serde(rename = "sessions", default)]
    pub chain: BackupChain,

    /// Fingerprints of the most recent full backup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<Baseline>,
}

impl Default for ChainMetadata {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            chain: BackupChain::new(),
            baseline: None,
        }
    }
}

impl ChainMetadata {
    /// Baseline for `full_id`, if it is the one stored
    pub fn baseline_for(&self, full_id: &str) -> Option<&Baseline> {
        self.baseline.as_ref().filter(|b| b.full_id == full_id)
    }
}

/// Loads and commits chain metadata for one destination
#[derive(Debug, Clone)]
pub struct ChainStore {
    path: PathBuf,
}

impl ChainStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load metadata; a destination without `chain.json` has an empty chain
    pub fn load(&self) -> BackupResult<ChainMetadata> {
        read_json(&self.path)
    }

    /// Commit metadata in one atomic step
    pub fn save(&self, metadata: &ChainMetadata) -> BackupResult<()> {
        write_json_atomic(&self.path, metadata)
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}
