//! Canonical content fingerprints
//!
//! Identical study requests must land on the same cached artifact, so the
//! fingerprint is computed over normalized input: trimmed, lowercased, with
//! the input kind and language mixed in through NUL separators.

use sha2::{Digest, Sha256};

/// Normalize raw input for fingerprinting: trim surrounding whitespace and
/// lowercase. Total over all strings.
fn normalize(raw_input: &str) -> String {
    raw_input.trim().to_lowercase()
}

/// Compute the 64-char lower-hex fingerprint of a study request.
pub fn fingerprint(input_kind: &str, raw_input: &str, language: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input_kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize(raw_input).as_bytes());
    hasher.update([0u8]);
    hasher.update(language.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash a device fingerprint before persistence; raw device fingerprints are
/// never stored.
pub fn hash_device_fingerprint(device_fp: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(device_fp.as_bytes());
    hex::encode(hasher.finalize())
}
