//! Content-addressed hashing helpers.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of `content`.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// First `len` hex characters of [`content_hash`].
pub fn short_hash(content: &str, len: usize) -> String {
    let mut digest = content_hash(content);
    digest.truncate(len.min(digest.len()));
    digest
}
