//! Shared utility functions for the Switchyard crate.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a record id such as `LOCK-3F9A0C11B2D4`.
pub fn generate_id(prefix: &str) -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &simple[..12]).to_uppercase()
}

/// Hours elapsed between `since` and `now`, fractional.
pub fn hours_between(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - since).num_milliseconds() as f64 / 3_600_000.0
}

/// Make a string safe to use as a single path component / git ref segment.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '-');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}
