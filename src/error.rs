//! Custom error types for diffback
//!
//! This module defines the error hierarchy for the backup-chain engine using
//! thiserror for ergonomic error definitions. The "no changes" outcome of a
//! differential run is not an error; see `backup::BackupOutcome`.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for diffback operations
#[derive(Error, Debug)]
pub enum BackupError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Chain metadata storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Archive format errors (zip container)
    #[error("Archive error: {0}")]
    Archive(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// Configured source folders do not exist
    #[error("Source folder(s) missing: {}", format_paths(.paths))]
    SourceMissing { paths: Vec<PathBuf> },

    /// An archive failed post-write or pre-restore verification
    #[error("Integrity check failed for {}: {detail}", .archive.display())]
    Integrity { archive: PathBuf, detail: String },

    /// A restore target cannot be reached because a link is missing or corrupt
    #[error("Backup chain broken for '{target}': session '{missing}' {reason}")]
    ChainBroken {
        target: String,
        missing: String,
        reason: String,
    },

    /// Another run holds the destination lock
    #[error("Backup destination is locked ({}): {holder}", .lock_path.display())]
    LockContention { lock_path: PathBuf, holder: String },

    /// The operation was interrupted through its cancel token
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl BackupError {
    /// Create a "not found" error for sessions
    pub fn session_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Session",
            identifier: identifier.into(),
        }
    }

    /// Create a chain-broken error for a missing link
    pub fn missing_link(target: impl Into<String>, missing: impl Into<String>) -> Self {
        Self::ChainBroken {
            target: target.into(),
            missing: missing.into(),
            reason: "is missing".to_string(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a broken-chain error
    pub fn is_chain_broken(&self) -> bool {
        matches!(self, Self::ChainBroken { .. })
    }

    /// Check if this is an integrity error
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }

    /// Lock contention is the only error a caller is expected to retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockContention { .. })
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<zip::result::ZipError> for BackupError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

impl From<walkdir::Error> for BackupError {
    fn from(err: walkdir::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type alias for diffback operations
pub type BackupResult<T> = Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BackupError::Config("test error".into());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_not_found_error() {
        let err = BackupError::session_not_found("20250101-000000-000");
        assert_eq!(err.to_string(), "Session not found: 20250101-000000-000");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_chain_broken_names_missing_link() {
        let err = BackupError::missing_link("D1", "F1");
        assert!(err.is_chain_broken());
        assert_eq!(
            err.to_string(),
            "Backup chain broken for 'D1': session 'F1' is missing"
        );
    }

    #[test]
    fn test_source_missing_lists_paths() {
        let err = BackupError::SourceMissing {
            paths: vec![PathBuf::from("/a"), PathBuf::from("/b")],
        };
        assert_eq!(err.to_string(), "Source folder(s) missing: /a, /b");
    }

    #[test]
    fn test_lock_contention_is_retryable() {
        let err = BackupError::LockContention {
            lock_path: PathBuf::from("/backups/.diffback.lock"),
            holder: "pid 42".into(),
        };
        assert!(err.is_retryable());
        assert!(!BackupError::Io("x".into()).is_retryable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BackupError = io_err.into();
        assert!(matches!(err, BackupError::Io(_)));
    }
}
