//! Core data models for the gateway.
//!
//! Barrels are the logical backends, files are what clients upload, and file
//! locations are the per-barrel replicas of a file. Timestamps are persisted
//! as milliseconds since epoch and surfaced as UTC instants.

pub mod barrel;
pub mod file;
pub mod location;
pub mod message;

use chrono::{DateTime, Utc};

/// Milliseconds since epoch for an instant.
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Instant for a stored millisecond timestamp. Out-of-range values collapse
/// to the epoch.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Current instant truncated to millisecond precision, so values survive a
/// round trip through storage unchanged.
pub fn now_millis() -> DateTime<Utc> {
    from_millis(to_millis(Utc::now()))
}
