//! Configuration module for diffback
//!
//! This module provides configuration management including:
//! - Config file resolution and environment expansion
//! - The backup configuration value object
//! - Backup destination layout

pub mod paths;
pub mod settings;

pub use paths::DestinationPaths;
pub use settings::{ArchiveKind, BackupConfig, ConfiguredType, DeletionPolicy};
