//! Backup chain model
//!
//! The chain is every session record of one destination, ordered by creation
//! time and partitioned into segments: one full followed by the
//! differentials that reference it.

use serde::{Deserialize, Serialize};

use super::session::{BackupType, SessionRecord};

/// A full session and its dependent differentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment<'a> {
    pub full: &'a SessionRecord,
    pub differentials: Vec<&'a SessionRecord>,
}

impl<'a> Segment<'a> {
    /// Number of session records in this segment
    pub fn record_count(&self) -> usize {
        1 + self.differentials.len()
    }

    /// All records, full first
    pub fn records(&self) -> Vec<&'a SessionRecord> {
        let mut records = Vec::with_capacity(self.record_count());
        records.push(self.full);
        records.extend(self.differentials.iter().copied());
        records
    }
}

/// Ordered session history of a destination
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupChain {
    sessions: Vec<SessionRecord>,
}

impl BackupChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a chain from records in any order
    pub fn from_records(mut sessions: Vec<SessionRecord>) -> Self {
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Self { sessions }
    }

    /// Records, oldest first
    pub fn sessions(&self) -> &[SessionRecord] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SessionRecord> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut SessionRecord> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// The most recent full session, which anchors the current segment
    pub fn last_full(&self) -> Option<&SessionRecord> {
        self.sessions
            .iter()
            .rev()
            .find(|s| s.backup_type == BackupType::Full)
    }

    /// Append a record, keeping creation-time order
    pub fn insert(&mut self, record: SessionRecord) {
        let position = self
            .sessions
            .iter()
            .rposition(|s| s.created_at <= record.created_at)
            .map_or(0, |i| i + 1);
        self.sessions.insert(position, record);
    }

    /// Remove records by id, returning the removed ones
    pub fn remove_all(&mut self, ids: &[String]) -> Vec<SessionRecord> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.sessions)
            .into_iter()
            .partition(|s| ids.contains(&s.id));
        self.sessions = kept;
        removed
    }

    /// Segments, oldest first
    pub fn segments(&self) -> Vec<Segment<'_>> {
        self.sessions
            .iter()
            .filter(|s| s.is_full())
            .map(|full| Segment {
                full,
                differentials: self
                    .sessions
                    .iter()
                    .filter(|s| {
                        s.is_differential()
                            && s.parent_full_id.as_deref() == Some(full.id.as_str())
                    })
                    .collect(),
            })
            .collect()
    }

    /// Differentials whose parent full is not in the chain
    pub fn orphans(&self) -> Vec<&SessionRecord> {
        self.sessions
            .iter()
            .filter(|s| s.is_differential())
            .filter(|s| {
                s.parent_full_id
                    .as_deref()
                    .and_then(|parent| self.get(parent))
                    .map_or(true, |parent| !parent.is_full())
            })
            .collect()
    }

    /// An id derived from `base` that no record uses yet
    pub fn unique_id(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{}-{}", base, n))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::path::PathBuf;

    pub(crate) fn record(id: &str, day: i64, parent: Option<&str>) -> SessionRecord {
        let backup_type = if parent.is_some() {
            BackupType::Differential
        } else {
            BackupType::Full
        };
        SessionRecord {
            id: id.to_string(),
            backup_type,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::days(day),
            parent_full_id: parent.map(str::to_string),
            archive_path: PathBuf::from(format!("sessions/{}.zip", id)),
            file_count: 1,
            size_bytes: 100,
            verified: true,
            deleted_paths: Vec::new(),
        }
    }

    #[test]
    fn test_from_records_sorts_by_creation() {
        let chain = BackupChain::from_records(vec![
            record("F2", 8, None),
            record("F1", 0, None),
            record("D1", 1, Some("F1")),
        ]);
        let ids: Vec<_> = chain.sessions().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["F1", "D1", "F2"]);
    }

    #[test]
    fn test_last_full_and_segments() {
        let chain = BackupChain::from_records(vec![
            record("F1", 0, None),
            record("D1", 1, Some("F1")),
            record("D2", 2, Some("F1")),
            record("F2", 8, None),
        ]);

        assert_eq!(chain.last_full().unwrap().id, "F2");

        let segments = chain.segments();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].full.id, "F1");
        assert_eq!(segments[0].record_count(), 3);
        assert_eq!(segments[1].differentials.len(), 0);
    }

    #[test]
    fn test_insert_keeps_order() {
        let mut chain = BackupChain::from_records(vec![record("F1", 0, None), record("F2", 8, None)]);
        chain.insert(record("D1", 1, Some("F1")));
        let ids: Vec<_> = chain.sessions().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["F1", "D1", "F2"]);
    }

    #[test]
    fn test_orphans() {
        let chain = BackupChain::from_records(vec![record("D1", 1, Some("F1")), record("F2", 8, None)]);
        let orphans = chain.orphans();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, "D1");
    }

    #[test]
    fn test_unique_id() {
        let chain = BackupChain::from_records(vec![record("20250101-000000-000", 0, None)]);
        assert_eq!(chain.unique_id("20250101-000000-000"), "20250101-000000-000-1");
        assert_eq!(chain.unique_id("20250102-000000-000"), "20250102-000000-000");
    }

    #[test]
    fn test_remove_all() {
        let mut chain = BackupChain::from_records(vec![
            record("F1", 0, None),
            record("D1", 1, Some("F1")),
            record("F2", 8, None),
        ]);
        let removed = chain.remove_all(&["F1".to_string(), "D1".to_string()]);
        assert_eq!(removed.len(), 2);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.sessions()[0].id, "F2");
    }
}
