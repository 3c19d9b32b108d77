//! Display formatting for terminal output
//!
//! Provides utilities for formatting session records and chain events as
//! tables and detail views.

pub mod session;

pub use session::{
    format_duration, format_event_list, format_session_details, format_session_list, format_size,
};
