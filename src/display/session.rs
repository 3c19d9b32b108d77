//! Session display formatting
//!
//! Formats session records and chain events for terminal output.

use chrono::{DateTime, Utc};

use crate::audit::ChainEvent;
use crate::models::SessionRecord;

/// Format sessions (oldest first) as a numbered table
///
/// The numbers are the ones accepted by the interactive restore prompt.
pub fn format_session_list(sessions: &[SessionRecord], now: DateTime<Utc>) -> String {
    if sessions.is_empty() {
        return "No backups found.".to_string();
    }

    let id_width = sessions
        .iter()
        .map(|s| s.id.len())
        .max()
        .unwrap_or(2)
        .max(2);

    let mut output = String::new();
    output.push_str(&format!(
        "{:>3}  {:<id_width$}  {:<12}  {:<19}  {:>6}  {:>10}  {}\n",
        "#",
        "ID",
        "Type",
        "Created (UTC)",
        "Age",
        "Size",
        "Files",
        id_width = id_width,
    ));
    output.push_str(&format!(
        "{:->3}  {:-<id_width$}  {:-<12}  {:-<19}  {:->6}  {:->10}  {:-<5}\n",
        "",
        "",
        "",
        "",
        "",
        "",
        "",
        id_width = id_width,
    ));

    for (i, session) in sessions.iter().enumerate() {
        let marker = if session.verified { "" } else { "  [unverified]" };
        output.push_str(&format!(
            "{:>3}  {:<id_width$}  {:<12}  {:<19}  {:>6}  {:>10}  {}{}\n",
            i + 1,
            session.id,
            session.backup_type.to_string(),
            session.created_at.format("%Y-%m-%d %H:%M:%S"),
            format_duration(now.signed_duration_since(session.created_at)),
            format_size(session.size_bytes),
            session.file_count,
            marker,
            id_width = id_width,
        ));
    }

    output.push_str(&format!("\nTotal: {} session(s)", sessions.len()));
    output
}

/// Format one session with its chain details
pub fn format_session_details(session: &SessionRecord) -> String {
    let mut output = String::new();
    output.push_str(&format!("Session: {}\n", session.id));
    output.push_str(&format!("  Type:     {}\n", session.backup_type));
    output.push_str(&format!(
        "  Created:  {}\n",
        session.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(parent) = &session.parent_full_id {
        output.push_str(&format!("  Parent:   {}\n", parent));
    }
    output.push_str(&format!("  Archive:  {}\n", session.archive_path.display()));
    output.push_str(&format!("  Files:    {}\n", session.file_count));
    output.push_str(&format!("  Size:     {}\n", format_size(session.size_bytes)));
    output.push_str(&format!(
        "  Verified: {}\n",
        if session.verified { "yes" } else { "no" }
    ));
    if !session.deleted_paths.is_empty() {
        output.push_str(&format!(
            "  Deleted since parent: {}\n",
            session.deleted_paths.len()
        ));
        for path in &session.deleted_paths {
            output.push_str(&format!("    - {}\n", path));
        }
    }
    output
}

/// Format chain events one per line
pub fn format_event_list(events: &[ChainEvent]) -> String {
    if events.is_empty() {
        return "No events recorded.".to_string();
    }

    events
        .iter()
        .map(|e| {
            format!(
                "{}  {:<7}  {:<8}  {:<21}  {}",
                e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                e.operation.to_string(),
                e.outcome.to_string(),
                e.session_id.as_deref().unwrap_or("-"),
                e.detail
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format a duration in human-readable form
pub fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);

    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = hours / 24;
    if days < 30 {
        return format!("{}d", days);
    }

    format!("{}mo", days / 30)
}

/// Format a file size in human-readable form
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
