//! Core data models for diffback
//!
//! Sources, file fingerprints, session records and the backup chain they
//! form. All models serialize to the chain metadata file with serde.

pub mod chain;
pub mod fingerprint;
pub mod session;
pub mod source;

pub use chain::{BackupChain, Segment};
pub use fingerprint::{Baseline, FileFingerprint, FingerprintDiff, FingerprintSet};
pub use session::{session_id_for, BackupType, SessionRecord};
pub use source::{label_sources, BackupSource, LabelledSource};
