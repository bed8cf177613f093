//! Per-chunk integrity: SHA-256 over payload bytes, hex digest on the wire.

use sha2::{Digest, Sha256};

/// Checksum of a chunk payload as a lowercase hex digest.
pub fn compute_checksum(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// Recompute the digest of `payload` and compare with the transmitted one.
pub fn verify_checksum(payload: &[u8], expected: &str) -> bool {
    compute_checksum(payload) == expected
}
