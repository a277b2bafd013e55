use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// RFC3339 timestamp in UTC (for error-tracker events).
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

static TOKEN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Process-unique token for scratch and temp-file names.
///
/// Combines pid, wall-clock millis and a per-process counter, so two calls never
/// return the same value even within the same millisecond.
pub fn unique_token() -> String {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let seq = TOKEN_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{millis}-{seq}", std::process::id())
}

/// Uppercase the first character (`playing` -> `Playing`).
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
