//! Timestamp helpers.

use chrono::{DateTime, Utc};
use std::time::Instant;

/// A UTC timestamp as stored on job records.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time as an RFC 3339 string with microseconds.
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Milliseconds elapsed since `start`.
#[must_use]
pub fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
