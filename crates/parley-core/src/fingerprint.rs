//! Content fingerprints.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `content`. Leading and trailing whitespace is
/// ignored so that an accidental trailing newline does not count as a change.
pub fn content_fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Fingerprint of an ordered set of texts (e.g. all witness messages).
pub fn joined_fingerprint<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.trim().as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
