// crates/survey-sync-core/src/core/hashing.rs
// ============================================================================
// Module: Survey Sync Content Hashing
// Description: Content checksums for transmitted artifacts.
// Purpose: Provide deterministic digests for idempotent uploads and integrity checks.
// Dependencies: hex, serde, sha2
// ============================================================================

//! ## Overview
//! Every artifact handed to the upload stage carries a checksum computed over
//! its raw bytes. The remote store keys idempotence on that checksum, so a
//! retried upload of unchanged content never produces a second object.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

// ============================================================================
// SECTION: Hash Algorithm
// ============================================================================

/// Supported checksum algorithms for artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// SHA-256 hashing.
    Sha256,
}

impl HashAlgorithm {
    /// Returns the label stored beside persisted checksums.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }

    /// Parses a stored label. Unknown labels return `None`.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "sha256" => Some(Self::Sha256),
            _ => None,
        }
    }
}

/// Checksum algorithm used for artifacts and stored form definitions.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

// ============================================================================
// SECTION: Hash Digest
// ============================================================================

/// Content checksum of an artifact or stored definition.
///
/// The remote store compares `value` against object metadata to decide
/// whether an upload is already present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashDigest {
    /// Hash algorithm identifier.
    pub algorithm: HashAlgorithm,
    /// Lowercase hex-encoded digest bytes.
    pub value: String,
}

impl HashDigest {
    /// Computes the default checksum of artifact bytes.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        hash_bytes(DEFAULT_HASH_ALGORITHM, bytes)
    }

    /// Returns true when `bytes` hash to this digest.
    #[must_use]
    pub fn matches(&self, bytes: &[u8]) -> bool {
        hash_bytes(self.algorithm, bytes).value == self.value
    }
}

impl fmt::Display for HashDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.value)
    }
}

/// Hashes raw bytes using the provided algorithm.
#[must_use]
pub fn hash_bytes(algorithm: HashAlgorithm, bytes: &[u8]) -> HashDigest {
    let value = match algorithm {
        HashAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
    };
    HashDigest {
        algorithm,
        value,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;

    #[test]
    fn sha256_of_empty_input_matches_known_vector() {
        let digest = hash_bytes(HashAlgorithm::Sha256, b"");
        assert_eq!(
            digest.value,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(digest.to_string(), format!("sha256:{}", digest.value));
    }

    #[test]
    fn identical_content_yields_identical_digest() {
        let first = hash_bytes(DEFAULT_HASH_ALGORITHM, b"survey payload");
        let second = hash_bytes(DEFAULT_HASH_ALGORITHM, b"survey payload");
        let changed = hash_bytes(DEFAULT_HASH_ALGORITHM, b"survey payload!");
        assert_eq!(first, second);
        assert_ne!(first, changed);
    }

    #[test]
    fn digest_verifies_only_its_own_content() {
        let digest = HashDigest::of(b"photo bytes");
        assert!(digest.matches(b"photo bytes"));
        assert!(!digest.matches(b"photo bytez"));
    }

    #[test]
    fn stored_labels_round_trip_and_unknown_labels_are_rejected() {
        let label = HashAlgorithm::Sha256.as_str();
        assert_eq!(HashAlgorithm::parse(label), Some(HashAlgorithm::Sha256));
        assert_eq!(HashAlgorithm::parse("md5"), None);
    }
}
