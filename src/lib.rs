//! diffback - differential file-system backups
//!
//! This library backs up a set of source folders into a chain of sessions:
//! full sessions capture every file, differential sessions capture every
//! file changed since the most recent full session. Any session can be
//! restored from its own archive plus at most one parent full archive.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration loading and destination layout
//! - `error`: Custom error types
//! - `models`: Session records, fingerprints and the backup chain
//! - `storage`: Atomic chain metadata persistence and the destination lock
//! - `audit`: Chain event log
//! - `backup`: Fingerprinting, archive writing, chain management, retention
//!   and restore
//! - `cli`: Command handlers
//! - `display`: Terminal formatting
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use diffback::audit::EventLog;
//! use diffback::backup::{CancelToken, ChainManager};
//! use diffback::config::BackupConfig;
//!
//! let config = BackupConfig::load(path)?;
//! let sink = Arc::new(EventLog::new(config.destination().events_log()));
//! let report = ChainManager::new(config, sink).run_backup(&CancelToken::new())?;
//! ```

pub mod audit;
pub mod backup;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod logging;
pub mod models;
pub mod storage;

pub use error::{BackupError, BackupResult};
