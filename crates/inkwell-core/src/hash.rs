//! Content fingerprinting used to detect no-op saves.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex-encoded SHA-256 of a document's content.
///
/// Persisted next to each draft, so the encoding must stay stable across
/// process restarts and releases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ContentHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Fingerprint document content.
#[must_use]
pub fn hash_content(content: &str) -> ContentHash {
    ContentHash(format!("{:x}", Sha256::digest(content.as_bytes())))
}
