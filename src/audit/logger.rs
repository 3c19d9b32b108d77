//! Event log for append-only chain events
//!
//! Provides the `EventLog` sink that writes chain events to a log file in the
//! backup destination. Each event is written as a single JSON line and
//! flushed immediately.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use tracing::info;

use crate::error::{BackupError, BackupResult};

use super::entry::ChainEvent;
use super::EventSink;

/// Handles writing chain events to the event log file
///
/// The log file uses a line-delimited JSON format (JSONL) where each line
/// is a complete JSON object representing one event.
pub struct EventLog {
    /// Path to the event log file
    log_path: PathBuf,
}

impl EventLog {
    /// Create a new EventLog that writes to the specified path
    pub fn new(log_path: PathBuf) -> Self {
        Self { log_path }
    }

    /// Append an event as a JSON line
    pub fn log(&self, event: &ChainEvent) -> BackupResult<()> {
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| BackupError::Io(format!("Failed to open event log: {}", e)))?;

        let json = serde_json::to_string(event)
            .map_err(|e| BackupError::Json(format!("Failed to serialize event: {}", e)))?;

        writeln!(file, "{}", json)
            .map_err(|e| BackupError::Io(format!("Failed to write event: {}", e)))?;

        file.flush()
            .map_err(|e| BackupError::Io(format!("Failed to flush event log: {}", e)))?;

        Ok(())
    }

    /// Read all events from the log file, oldest first
    pub fn read_all(&self) -> BackupResult<Vec<ChainEvent>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.log_path)
            .map_err(|e| BackupError::Io(format!("Failed to open event log: {}", e)))?;

        let reader = BufReader::new(file);
        let mut events = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| {
                BackupError::Io(format!("Failed to read event log line {}: {}", line_num + 1, e))
            })?;

            if line.trim().is_empty() {
                continue;
            }

            let event: ChainEvent = serde_json::from_str(&line).map_err(|e| {
                BackupError::Json(format!(
                    "Failed to parse event at line {}: {}",
                    line_num + 1,
                    e
                ))
            })?;

            events.push(event);
        }

        Ok(events)
    }

    /// Read the most recent N events from the log
    pub fn read_recent(&self, count: usize) -> BackupResult<Vec<ChainEvent>> {
        let all_events = self.read_all()?;
        let start = all_events.len().saturating_sub(count);
        Ok(all_events[start..].to_vec())
    }

    /// Get the path to the event log file
    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: &ChainEvent) -> BackupResult<()> {
        info!(
            operation = %event.operation,
            session = event.session_id.as_deref().unwrap_or("-"),
            outcome = %event.outcome,
            "{}",
            event.detail
        );
        self.log(event)
    }
}
