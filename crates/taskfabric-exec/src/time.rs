//! Timestamp parsing shared by the dispatcher and the session.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Parse an ISO-8601 timestamp, treating naïve stamps as UTC.
pub fn parse_iso8601_utc(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = value.parse::<NaiveDateTime>() {
        return Some(Utc.from_utc_datetime(&naive));
    }
    None
}
