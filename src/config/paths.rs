//! Path management for diffback
//!
//! Resolves where the configuration file lives and how a backup destination
//! is laid out on disk.
//!
//! ## Config File Resolution Order
//!
//! 1. An explicit `--config` path
//! 2. `DIFFBACK_CONFIG` environment variable (if set)
//! 3. The platform config directory (`~/.config/diffback/config.json` on Linux)
//!
//! ## Destination Layout
//!
//! ```text
//! <backup_destination>/
//!   chain.json            session records + active baseline
//!   events.log            JSONL chain events
//!   .diffback.lock        present while a run holds the destination
//!   sessions/
//!     <id>-full.zip
//!     <id>-diff.zip
//! ```

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::error::BackupError;
use crate::models::BackupType;

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "DIFFBACK_CONFIG";

/// Manages all paths inside one backup destination
#[derive(Debug, Clone)]
pub struct DestinationPaths {
    /// Root of the backup destination
    base_dir: PathBuf,
}

impl DestinationPaths {
    /// Create paths rooted at a backup destination
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the destination root
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the chain metadata file
    pub fn chain_file(&self) -> PathBuf {
        self.base_dir.join("chain.json")
    }

    /// Get the structured event log
    pub fn events_log(&self) -> PathBuf {
        self.base_dir.join("events.log")
    }

    /// Get the destination lock file
    pub fn lock_file(&self) -> PathBuf {
        self.base_dir.join(".diffback.lock")
    }

    /// Get the directory holding session archives
    pub fn sessions_dir(&self) -> PathBuf {
        self.base_dir.join("sessions")
    }

    /// Archive path for a session, relative to the destination root
    pub fn relative_archive_path(
        &self,
        id: &str,
        backup_type: BackupType,
        extension: &str,
    ) -> PathBuf {
        let suffix = match backup_type {
            BackupType::Full => "full",
            BackupType::Differential => "diff",
        };
        PathBuf::from("sessions").join(format!("{}-{}.{}", id, suffix, extension))
    }

    /// Resolve a stored (relative) archive path against the destination root
    pub fn resolve(&self, stored: &Path) -> PathBuf {
        if stored.is_absolute() {
            stored.to_path_buf()
        } else {
            self.base_dir.join(stored)
        }
    }

    /// Ensure the destination and its sessions directory exist
    pub fn ensure_directories(&self) -> Result<(), BackupError> {
        std::fs::create_dir_all(&self.base_dir).map_err(|e| {
            BackupError::Io(format!(
                "Failed to create backup destination {}: {}",
                self.base_dir.display(),
                e
            ))
        })?;

        std::fs::create_dir_all(self.sessions_dir())
            .map_err(|e| BackupError::Io(format!("Failed to create sessions directory: {}", e)))?;

        Ok(())
    }
}

/// Resolve the configuration file to use
pub fn resolve_config_file(explicit: Option<&Path>) -> Result<PathBuf, BackupError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Ok(custom) = std::env::var(CONFIG_ENV_VAR) {
        if !custom.trim().is_empty() {
            return Ok(PathBuf::from(custom));
        }
    }

    let dirs = ProjectDirs::from("", "", "diffback").ok_or_else(|| {
        BackupError::Config("Could not determine the platform config directory".into())
    })?;
    Ok(dirs.config_dir().join("config.json"))
}

/// Expand `$VAR`, `${VAR}` and `%VAR%` references from the environment
///
/// Unknown variables are left untouched.
pub fn expand_env_vars(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '$' if i + 1 < chars.len() && chars[i + 1] == '{' => {
                if let Some(len) = chars[i + 2..].iter().position(|&c| c == '}') {
                    let name: String = chars[i + 2..i + 2 + len].iter().collect();
                    push_var(&mut out, &name, &format!("${{{}}}", name));
                    i += len + 3;
                    continue;
                }
            }
            '$' => {
                let len = chars[i + 1..]
                    .iter()
                    .take_while(|c| c.is_ascii_alphanumeric() || **c == '_')
                    .count();
                if len > 0 {
                    let name: String = chars[i + 1..i + 1 + len].iter().collect();
                    push_var(&mut out, &name, &format!("${}", name));
                    i += len + 1;
                    continue;
                }
            }
            '%' => {
                if let Some(len) = chars[i + 1..].iter().position(|&c| c == '%') {
                    let name: String = chars[i + 1..i + 1 + len].iter().collect();
                    if len > 0 && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        push_var(&mut out, &name, &format!("%{}%", name));
                        i += len + 2;
                        continue;
                    }
                }
            }
            _ => {}
        }
        out.push(chars[i]);
        i += 1;
    }

    out
}

fn push_var(out: &mut String, name: &str, original: &str) {
    match std::env::var(name) {
        Ok(value) => out.push_str(&value),
        Err(_) => out.push_str(original),
    }
}
