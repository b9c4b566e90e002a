//! Utility functions for UUID generation and timestamp handling.

pub mod timestamps;

use uuid::Uuid;

pub use timestamps::{duration_to_millis_ceil, format_iso8601, iso_timestamp, now_utc, Timestamp};

/// Generates a new random UUID (v4).
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Generates a new time-ordered UUID (v7).
#[must_use]
pub fn generate_uuid_v7() -> Uuid {
    Uuid::now_v7()
}
