//! Chain event data structures
//!
//! Defines the structured events the engine emits for every chain mutation.
//! The engine never formats log text; sinks decide how events are stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chain mutations that produce an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// A backup run finished (created, skipped or failed)
    Backup,
    /// A session was removed by retention
    Prune,
    /// A restore was performed or attempted
    Restore,
    /// Archives were re-verified
    Verify,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Backup => write!(f, "BACKUP"),
            Operation::Prune => write!(f, "PRUNE"),
            Operation::Restore => write!(f, "RESTORE"),
            Operation::Verify => write!(f, "VERIFY"),
        }
    }
}

/// How the operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// Nothing to do (no changes since the last full)
    Skipped,
    Failure,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Skipped => write!(f, "skipped"),
            Outcome::Failure => write!(f, "failure"),
        }
    }
}

/// A single chain event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    /// When the event occurred (UTC)
    pub timestamp: DateTime<Utc>,

    pub operation: Operation,

    /// Session the event concerns, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    pub outcome: Outcome,

    /// Free-form detail (counts, error message)
    pub detail: String,
}

impl ChainEvent {
    pub fn new(
        operation: Operation,
        session_id: Option<String>,
        outcome: Outcome,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            session_id,
            outcome,
            detail: detail.into(),
        }
    }

    /// A successful operation on a session
    pub fn success(
        operation: Operation,
        session_id: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(operation, Some(session_id.into()), Outcome::Success, detail)
    }

    /// A failed operation, optionally tied to a session
    pub fn failure(
        operation: Operation,
        session_id: Option<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::new(operation, session_id, Outcome::Failure, detail)
    }

    /// Override the timestamp (runs with an injected clock)
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_fields() {
        let event = ChainEvent::success(Operation::Backup, "20250101-000000-000", "full, 3 files");

        assert_eq!(event.operation, Operation::Backup);
        assert_eq!(event.outcome, Outcome::Success);
        assert_eq!(event.session_id.as_deref(), Some("20250101-000000-000"));
    }

    #[test]
    fn test_serialization_shape() {
        let event = ChainEvent::new(Operation::Backup, None, Outcome::Skipped, "no changes");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["operation"], "backup");
        assert_eq!(json["outcome"], "skipped");
        assert!(json.get("session_id").is_none());
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn test_display() {
        assert_eq!(Operation::Prune.to_string(), "PRUNE");
        assert_eq!(Outcome::Failure.to_string(), "failure");
    }
}
