//! Backup configuration for diffback
//!
//! The configuration is a plain value object: it is loaded once (JSON or YAML)
//! and handed to the chain manager, retention manager and restore engine.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use super::paths::{expand_env_vars, DestinationPaths};
use crate::error::BackupError;
use crate::models::BackupSource;

/// Backup type preference from the `type` option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfiguredType {
    /// Every run is a full backup
    #[serde(alias = "Full")]
    Full,
    /// Differentials chained off the last full, with periodic fulls (default)
    #[default]
    #[serde(alias = "Differential")]
    Differential,
}

/// Archive container kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    /// Deflate-compressed zip
    #[default]
    Zip,
}

/// What a restore does with files deleted since the parent full backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeletionPolicy {
    /// Leave restored copies of deleted files in place (default)
    #[default]
    Keep,
    /// Remove files the target session recorded as deleted
    Remove,
}

/// Backup configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Directory holding the chain metadata and session archives
    pub backup_destination: PathBuf,

    /// Forced full backups or the differential chain
    #[serde(default, rename = "type")]
    pub backup_type: ConfiguredType,

    /// Days after which the next run starts a new full backup
    #[serde(default = "default_full_backup_interval")]
    pub full_backup_interval: i64,

    /// Upper bound on session records kept (<= 0 disables pruning)
    #[serde(default = "default_max_backups")]
    pub max_backups: i64,

    /// Archive container kind
    #[serde(default)]
    pub format: ArchiveKind,

    /// Folders to back up
    #[serde(default)]
    pub folders: Vec<BackupSource>,

    /// Hash every file on differential runs instead of trusting size + mtime
    #[serde(default)]
    pub strict_hashing: bool,

    /// Hashing threads (0 = one per CPU)
    #[serde(default)]
    pub hash_workers: usize,

    /// Deleted-file handling on restore
    #[serde(default)]
    pub restore_deletions: DeletionPolicy,
}

fn default_schema_version() -> u32 {
    1
}

fn default_full_backup_interval() -> i64 {
    7
}

fn default_max_backups() -> i64 {
    10
}

impl BackupConfig {
    /// Create a configuration with defaults for everything but destination and folders
    pub fn new(backup_destination: impl Into<PathBuf>, folders: Vec<BackupSource>) -> Self {
        Self {
            schema_version: default_schema_version(),
            backup_destination: backup_destination.into(),
            backup_type: ConfiguredType::default(),
            full_backup_interval: default_full_backup_interval(),
            max_backups: default_max_backups(),
            format: ArchiveKind::default(),
            folders,
            strict_hashing: false,
            hash_workers: 0,
            restore_deletions: DeletionPolicy::default(),
        }
    }

    /// Load configuration from a JSON or YAML file
    ///
    /// Environment variables in the destination and folder paths are expanded
    /// and the result is validated.
    pub fn load(path: &Path) -> Result<Self, BackupError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            BackupError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut config: BackupConfig = if is_yaml(path) {
            serde_yaml::from_str(&contents).map_err(|e| {
                BackupError::Config(format!("Failed to parse config file: {}", e))
            })?
        } else {
            serde_json::from_str(&contents).map_err(|e| {
                BackupError::Config(format!("Failed to parse config file: {}", e))
            })?
        };

        config.expand_env();
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the engine cannot work with
    pub fn validate(&self) -> Result<(), BackupError> {
        if self.backup_destination.as_os_str().is_empty() {
            return Err(BackupError::Config(
                "backup_destination must not be empty".into(),
            ));
        }
        if self.folders.is_empty() {
            return Err(BackupError::Config(
                "at least one folder must be configured".into(),
            ));
        }
        if self.full_backup_interval < 0 {
            return Err(BackupError::Config(format!(
                "full_backup_interval must not be negative (got {})",
                self.full_backup_interval
            )));
        }
        if self.full_backup_interval().is_none() {
            return Err(BackupError::Config(format!(
                "full_backup_interval of {} days is out of range",
                self.full_backup_interval
            )));
        }
        Ok(())
    }

    /// Expand environment variable references in all configured paths
    pub fn expand_env(&mut self) {
        self.backup_destination = expand_path(&self.backup_destination);
        for folder in &mut self.folders {
            folder.path = expand_path(&folder.path);
        }
    }

    /// The full backup interval as a duration, `None` if it is too large to represent
    pub fn full_backup_interval(&self) -> Option<TimeDelta> {
        TimeDelta::try_days(self.full_backup_interval)
    }

    /// Layout of the backup destination
    pub fn destination(&self) -> DestinationPaths {
        DestinationPaths::new(&self.backup_destination)
    }
}

fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(expand_env_vars(&path.to_string_lossy()))
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext == "yaml" || ext == "yml")
}
