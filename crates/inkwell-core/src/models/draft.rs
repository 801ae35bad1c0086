//! Draft model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::hash::{hash_content, ContentHash};
use crate::util::unix_millis_now;

/// Opaque key-value bag carried with a draft (e.g. the owning user id).
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Identifier of an edited document.
///
/// Ids come from the surrounding application (`essay-42`, a UUID, ...), so
/// any non-empty string is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is blank and cannot key a document
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl FromStr for DocumentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("document id must not be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// The latest written content for a document plus metadata and sync status.
///
/// `last_content_hash` always equals the hash of `content` as last written
/// to the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    /// Document this draft belongs to
    pub document_id: DocumentId,
    /// Current text
    pub content: String,
    /// Opaque metadata
    pub metadata: Metadata,
    /// Fingerprint of `content`
    pub last_content_hash: ContentHash,
    /// Last write timestamp (Unix ms)
    pub updated_at: i64,
    /// Whether the remote store has acknowledged this exact content
    pub synced: bool,
}

impl Draft {
    /// Build an unsynced draft stamped with the current time
    #[must_use]
    pub fn new(document_id: DocumentId, content: impl Into<String>, metadata: Metadata) -> Self {
        let content = content.into();
        Self {
            last_content_hash: hash_content(&content),
            document_id,
            content,
            metadata,
            updated_at: unix_millis_now(),
            synced: false,
        }
    }

    /// Content size in bytes
    #[must_use]
    pub fn content_len(&self) -> usize {
        self.content.len()
    }
}
