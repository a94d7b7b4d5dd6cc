//! Shared primitive identifiers and clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Monotonic revision number, for both documents and file stores.
pub type RevNum = u64;
/// Caret session identifier.
pub type SessionId = String;
/// Author identifier attached to changes and carets.
pub type AuthorId = String;
/// Milliseconds since the Unix epoch.
pub type TimestampMs = u64;

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// True when `s` is a non-empty identifier made of ASCII alphanumerics,
/// `_` and `-`, not starting with a digit or `-`.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
