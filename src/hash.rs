//! Content hashing for cache keys.
//!
//! Submitted text is keyed by its SHA-256 digest: two requests carrying the
//! same text map to the same prompt row regardless of context. The hash is a
//! cache key only, not a security boundary.

use sha2::{Digest, Sha256};

/// Compute the lowercase hex SHA-256 digest of a text string.
///
/// Deterministic and pure; always returns 64 hex characters.
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
