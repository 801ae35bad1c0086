//! Snapshot model

use serde::{Deserialize, Serialize};

use super::DocumentId;
use crate::delta::DeltaRecord;

/// Storage form of a snapshot payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    Full,
    Delta,
}

/// An immutable recorded history point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub document_id: DocumentId,
    /// Monotonic per-document index
    pub sequence: u64,
    /// Full content, or a delta against the snapshot directly below this one
    pub payload: DeltaRecord,
    /// User-triggered checkpoint rather than an interval snapshot
    pub is_manual: bool,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
}

impl Snapshot {
    pub const fn kind(&self) -> SnapshotKind {
        match self.payload {
            DeltaRecord::Full { .. } => SnapshotKind::Full,
            DeltaRecord::Delta { .. } => SnapshotKind::Delta,
        }
    }
}
