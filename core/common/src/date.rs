//! Timestamp parsing for provider metadata.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Parse a provider timestamp.
///
/// Accepts RFC 2822 (`Tue, 05 Mar 2024 10:00:00 GMT`, as sent in WebDAV
/// `getlastmodified`) and RFC 3339 (`2024-03-05T10:00:00Z`).
pub fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|date| date.with_timezone(&Utc))
        .map_err(|e| Error::InvalidResponse(format!("Invalid date \"{}\": {}", value, e)))
}
