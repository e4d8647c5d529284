//! Textual timestamp codec used at the store boundary.
//!
//! Timestamps are written as UTC `YYYY-MM-DDTHH:MM:SSZ`. RFC 3339 text with an
//! explicit offset is also accepted on read and normalized to UTC.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::StoreError;

/// Format used for every timestamp written by a store.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Format a timestamp for storage.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp.
///
/// Failure is a load error; callers must not skip the row.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    match NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT) {
        Ok(naive) => Ok(naive.and_utc()),
        Err(_) => DateTime::parse_from_rfc3339(value)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|source| StoreError::MalformedTimestamp {
                value: value.to_string(),
                source,
            }),
    }
}
