//! CLI command handlers
//!
//! This module contains the implementation of CLI commands,
//! bridging the clap argument parsing with the backup engine.

pub mod backup;
pub mod restore;

pub use backup::{
    event_sink, handle_backup_command, handle_config_command, handle_events_command,
    handle_list_command, handle_prune_command, handle_verify_command,
};
pub use restore::{handle_restore_command, RestoreArgs};
