//! Session record model
//!
//! One record per completed backup run, full or differential.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of backup session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    /// Complete snapshot, baseline for differentials
    Full,
    /// Files changed since the parent full
    Differential,
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupType::Full => write!(f, "Full"),
            BackupType::Differential => write!(f, "Differential"),
        }
    }
}

/// Metadata of one backup session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Timestamp-derived id (`YYYYMMDD-HHMMSS-mmm`)
    pub id: String,

    #[serde(rename = "type")]
    pub backup_type: BackupType,

    pub created_at: DateTime<Utc>,

    /// Full session this differential chains off; `None` for fulls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_full_id: Option<String>,

    /// Archive location, relative to the backup destination
    pub archive_path: PathBuf,

    pub file_count: u64,

    /// Archive size on disk
    pub size_bytes: u64,

    /// Archive passed integrity verification
    pub verified: bool,

    /// Files deleted since the parent full (differentials only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted_paths: Vec<String>,
}

impl SessionRecord {
    pub fn is_full(&self) -> bool {
        self.backup_type == BackupType::Full
    }

    pub fn is_differential(&self) -> bool {
        self.backup_type == BackupType::Differential
    }
}

/// Derive a session id from its creation time
pub fn session_id_for(created_at: DateTime<Utc>) -> String {
    format!(
        "{}-{:03}",
        created_at.format("%Y%m%d-%H%M%S"),
        created_at.timestamp_subsec_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_session_id_format() {
        let at = Utc.with_ymd_and_hms(2025, 11, 27, 14, 30, 22).unwrap()
            + chrono::Duration::milliseconds(456);
        assert_eq!(session_id_for(at), "20251127-143022-456");
    }

    #[test]
    fn test_full_record_omits_parent() {
        let record = SessionRecord {
            id: "20250101-000000-000".into(),
            backup_type: BackupType::Full,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            parent_full_id: None,
            archive_path: PathBuf::from("sessions/20250101-000000-000-full.zip"),
            file_count: 3,
            size_bytes: 1024,
            verified: true,
            deleted_paths: Vec::new(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "full");
        assert!(json.get("parent_full_id").is_none());
        assert!(record.is_full());
    }
}
