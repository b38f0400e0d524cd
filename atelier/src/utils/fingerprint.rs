//! Input fingerprints for duplicate detection.

use crate::core::JobInput;
use sha2::{Digest, Sha256};

/// Returns the SHA-256 hex digest of the input's canonical JSON.
///
/// Struct fields serialize in declaration order, so equal inputs always
/// hash equal.
#[must_use]
pub fn fingerprint(input: &JobInput) -> String {
    let canonical = serde_json::to_vec(input).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}
