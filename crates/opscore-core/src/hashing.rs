// crates/opscore-core/src/hashing.rs
// ============================================================================
// Module: Canonical Hashing
// Description: Deterministic content hashing for events and trust digests.
// Purpose: Give the contract layer and trust engine a single canonicalization
//          path so identical logical content always hashes identically.
// Dependencies: serde, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! Event payloads and trust-score component sets are hashed via RFC 8785 JSON
//! Canonicalization (JCS) before SHA-256, so that two structurally-equal
//! values with differently ordered object keys still hash identically. This
//! mirrors the teacher crate's `hashing::canonical_json_bytes` +
//! `hash_bytes` split.

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

/// Errors produced while canonicalizing or hashing a value.
#[derive(Debug, thiserror::Error)]
pub enum HashingError {
    /// The value could not be serialized to canonical JSON.
    #[error("canonicalization failed: {0}")]
    Canonicalize(String),
}

/// A SHA-256 digest rendered as a lowercase hex string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct HashDigest(String);

impl HashDigest {
    /// Returns the digest as a lowercase hex string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HashDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Serializes `value` to canonical (RFC 8785) JSON bytes.
///
/// # Errors
///
/// Returns [`HashingError::Canonicalize`] when `value` cannot be serialized.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, HashingError> {
    serde_jcs::to_vec(value).map_err(|err| HashingError::Canonicalize(err.to_string()))
}

/// Hashes raw bytes with SHA-256, returning a lowercase hex digest.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> HashDigest {
    let digest = Sha256::digest(bytes);
    HashDigest(hex_encode(&digest))
}

/// Canonicalizes then hashes `value`.
///
/// # Errors
///
/// Returns [`HashingError::Canonicalize`] when `value` cannot be serialized.
pub fn hash_value<T: Serialize>(value: &T) -> Result<HashDigest, HashingError> {
    canonical_json_bytes(value).map(|bytes| hash_bytes(&bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::hash_value;

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(hash_value(&a).unwrap(), hash_value(&b).unwrap());
    }

    #[test]
    fn different_content_hashes_differently() {
        let a = serde_json::json!({"a": 1});
        let b = serde_json::json!({"a": 2});
        assert_ne!(hash_value(&a).unwrap(), hash_value(&b).unwrap());
    }
}
