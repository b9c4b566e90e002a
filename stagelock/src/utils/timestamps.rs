//! Timestamp helpers.
//!
//! Every persisted timestamp is UTC so records read back identically
//! regardless of the host's local zone.

use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Returns the current UTC time as an RFC 3339 string with microseconds.
///
/// # Examples
///
/// ```
/// use stagelock::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with('Z'));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    format_iso8601(&now_utc())
}

/// Formats a timestamp as RFC 3339 with microseconds and a `Z` suffix.
#[must_use]
pub fn format_iso8601(dt: &Timestamp) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Converts a duration to whole milliseconds, rounding up.
///
/// A non-zero duration never becomes zero. Saturates at `u64::MAX`.
#[must_use]
pub fn duration_to_millis_ceil(duration: Duration) -> u64 {
    let nanos = duration.as_nanos();
    let millis = nanos / 1_000_000 + u128::from(nanos % 1_000_000 != 0);
    u64::try_from(millis).unwrap_or(u64::MAX)
}
