//! Chain event reporting for diffback
//!
//! Every chain mutation (backup created, skipped or failed, session pruned,
//! restore performed) is reported as a structured `ChainEvent` to an
//! `EventSink`.
//!
//! # Architecture
//!
//! - `ChainEvent`: timestamp, operation, session id, outcome and detail.
//! - `EventSink`: where the engine sends events. The engine never formats
//!   log text itself.
//! - `EventLog`: the shipped sink, an append-only JSONL file in the backup
//!   destination.
//! - `MemorySink`: collects events in memory, for embedding and tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use diffback::audit::{ChainEvent, EventLog, EventSink, Operation};
//!
//! let log = EventLog::new(paths.events_log());
//! log.emit(&ChainEvent::success(Operation::Backup, &record.id, "full, 12 files"))?;
//! ```

mod entry;
mod logger;

use std::sync::Mutex;

pub use entry::{ChainEvent, Operation, Outcome};
pub use logger::EventLog;

use crate::error::BackupResult;

/// Destination for chain events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ChainEvent) -> BackupResult<()>;
}

/// Sink that keeps events in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ChainEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events emitted so far
    pub fn events(&self) -> Vec<ChainEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &ChainEvent) -> BackupResult<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}
