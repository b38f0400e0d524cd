//! Utility functions for ids, timestamps and input fingerprints.

mod fingerprint;
pub mod timestamps;

pub use fingerprint::fingerprint;
pub use timestamps::{elapsed_ms, iso_timestamp, Timestamp};

use uuid::Uuid;

/// Generates a new UUID v7 (time-ordered) for a job.
#[must_use]
pub fn generate_job_uuid() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_uuids_are_v7_and_ordered() {
        let a = generate_job_uuid();
        let b = generate_job_uuid();
        assert_eq!(a.get_version_num(), 7);
        assert!(a < b);
    }
}
