//! Storage layer for diffback
//!
//! Provides the chain metadata store, atomic JSON writes and the
//! destination lock.

pub mod chain_store;
pub mod file_io;
pub mod lock;

pub use chain_store::{ChainMetadata, ChainStore};
pub use file_io::{read_json, write_json_atomic};
pub use lock::DestinationLock;
