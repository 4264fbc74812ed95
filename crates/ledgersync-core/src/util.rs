//! Shared utility functions used across multiple modules.

use chrono::{DateTime, SecondsFormat, Utc};

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Format an instant the way every timestamp column is stored.
///
/// Fixed millisecond precision with a `Z` suffix keeps lexical and
/// chronological order identical.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current UTC time in storage format.
pub fn timestamp_now() -> String {
    format_timestamp(Utc::now())
}

/// Parse an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Validate a tenant identifier so it is safe to use as a file name.
pub fn validate_tenant_id(value: &str) -> Result<String, String> {
    const MAX_LENGTH: usize = 64;

    let value = value.trim();
    if value.is_empty() {
        return Err("tenant id cannot be empty".to_string());
    }
    if value.len() > MAX_LENGTH {
        return Err(format!("tenant id exceeds {MAX_LENGTH} characters"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err("tenant id may only contain a-z, A-Z, 0-9, '-' and '_'".to_string());
    }
    Ok(value.to_string())
}
