//! Two-stack undo/redo history for a single document.
//!
//! ```text
//! undo:  [FULL] ◄─ δ ◄─ δ ◄─ δ   (top = current state)
//! redo:  δ ◄─ δ                  (top = next state to redo)
//! ```
//!
//! Every DELTA entry is encoded against the entry directly below it on the
//! undo stack. Undo and redo only ever move the top entry between stacks, so
//! that base relationship holds for entries on either stack.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::delta::{apply_delta, calculate_delta, DeltaRecord};
use crate::models::{DocumentId, Snapshot};

/// Maximum number of entries kept on a document's undo stack.
pub const MAX_HISTORY_LEN: usize = 50;

/// Serialized form of a document's two stacks.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersistedHistory {
    /// Oldest first; the last entry is the current state
    pub undo: Vec<Snapshot>,
    /// Oldest first; the last entry is the next one to redo
    pub redo: Vec<Snapshot>,
    pub next_sequence: u64,
}

pub(crate) struct DocumentHistory {
    document_id: DocumentId,
    undo: VecDeque<Snapshot>,
    redo: Vec<Snapshot>,
    next_sequence: u64,
    /// Reconstructed content of the undo top
    head: Option<String>,
    last_snapshot_at: Option<Instant>,
    /// Set once replay fails; the document's history is unusable until cleared
    corrupted: Option<String>,
}

impl DocumentHistory {
    pub(crate) fn new(document_id: DocumentId) -> Self {
        Self {
            document_id,
            undo: VecDeque::with_capacity(MAX_HISTORY_LEN + 1),
            redo: Vec::new(),
            next_sequence: 0,
            head: None,
            last_snapshot_at: None,
            corrupted: None,
        }
    }

    /// Rebuild from persisted stacks, verifying the chain replays.
    pub(crate) fn restore(document_id: DocumentId, persisted: PersistedHistory) -> Self {
        let mut history = Self::new(document_id);
        history.undo = persisted.undo.into();
        history.redo = persisted.redo;
        history.next_sequence = persisted.next_sequence;

        if let Some(top) = history.undo.len().checked_sub(1) {
            match history.content_at(top) {
                Ok(content) => history.head = Some(content),
                Err(reason) => history.corrupted = Some(reason),
            }
        }
        history
    }

    pub(crate) fn to_persisted(&self) -> PersistedHistory {
        PersistedHistory {
            undo: self.undo.iter().cloned().collect(),
            redo: self.redo.clone(),
            next_sequence: self.next_sequence,
        }
    }

    pub(crate) fn corruption(&self) -> Option<&str> {
        self.corrupted.as_deref()
    }

    pub(crate) fn mark_corrupted(&mut self, reason: String) {
        self.corrupted = Some(reason);
    }

    pub(crate) fn head(&self) -> Option<&str> {
        self.head.as_deref()
    }

    pub(crate) fn undo_depth(&self) -> usize {
        self.undo.len()
    }

    pub(crate) fn redo_depth(&self) -> usize {
        self.redo.len()
    }

    pub(crate) const fn last_snapshot_at(&self) -> Option<Instant> {
        self.last_snapshot_at
    }

    pub(crate) fn snapshots(&self) -> Vec<Snapshot> {
        self.undo.iter().cloned().collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.undo.is_empty() && self.redo.is_empty()
    }

    /// Record `content` as the new top and drop the redo branch.
    pub(crate) fn push(
        &mut self,
        content: &str,
        is_manual: bool,
        created_at: i64,
    ) -> Result<Snapshot, String> {
        let payload = match &self.head {
            Some(previous) => calculate_delta(previous, content),
            None => DeltaRecord::Full {
                content: content.to_string(),
            },
        };

        let snapshot = Snapshot {
            document_id: self.document_id.clone(),
            sequence: self.next_sequence,
            payload,
            is_manual,
            created_at,
        };
        self.next_sequence += 1;
        self.undo.push_back(snapshot.clone());
        self.redo.clear();
        self.head = Some(content.to_string());
        self.last_snapshot_at = Some(Instant::now());

        self.trim()?;
        Ok(snapshot)
    }

    /// Move the top entry to the redo stack and return the new top's content.
    ///
    /// The current state is the undo top itself, so at least one earlier
    /// snapshot is required; `None` otherwise.
    pub(crate) fn undo(&mut self) -> Result<Option<String>, String> {
        if self.undo.len() <= 1 {
            return Ok(None);
        }
        let Some(top) = self.undo.pop_back() else {
            return Ok(None);
        };
        self.redo.push(top);

        let content = self.content_at(self.undo.len() - 1)?;
        self.head = Some(content.clone());
        Ok(Some(content))
    }

    /// Move the redo top back onto the undo stack and return its content.
    pub(crate) fn redo(&mut self) -> Result<Option<String>, String> {
        let Some(next) = self.redo.pop() else {
            return Ok(None);
        };
        self.undo.push_back(next);

        let top = self.undo.len() - 1;
        let content = match (&self.head, &self.undo[top].payload) {
            (Some(base), payload) => apply_delta(base, payload).map_err(|error| {
                format!(
                    "snapshot {} does not apply to its base: {error}",
                    self.undo[top].sequence
                )
            })?,
            (None, _) => self.content_at(top)?,
        };
        self.head = Some(content.clone());
        Ok(Some(content))
    }

    /// Drop the oldest entries beyond the limit, re-basing the new oldest
    /// entry as FULL so the stack stays replayable from its own first entry.
    fn trim(&mut self) -> Result<(), String> {
        while self.undo.len() > MAX_HISTORY_LEN {
            let rebased = if self.undo[1].payload.is_delta() {
                Some(self.content_at(1)?)
            } else {
                None
            };

            if let Some(evicted) = self.undo.pop_front() {
                tracing::debug!(
                    "Trimmed snapshot {} from history of {}",
                    evicted.sequence,
                    self.document_id
                );
            }
            if let (Some(content), Some(front)) = (rebased, self.undo.front_mut()) {
                tracing::debug!(
                    "Re-based snapshot {} of {} as full content",
                    front.sequence,
                    self.document_id
                );
                front.payload = DeltaRecord::Full { content };
            }
        }
        Ok(())
    }

    /// Replay the undo stack from the nearest FULL entry up to `index`.
    fn content_at(&self, index: usize) -> Result<String, String> {
        let base = (0..=index)
            .rev()
            .find(|&i| !self.undo[i].payload.is_delta())
            .ok_or_else(|| {
                format!(
                    "snapshot {} has no full snapshot beneath it",
                    self.undo[index].sequence
                )
            })?;

        let mut content = String::new();
        for snapshot in self.undo.range(base..=index) {
            content = apply_delta(&content, &snapshot.payload).map_err(|error| {
                format!(
                    "snapshot {} does not apply to its base: {error}",
                    snapshot.sequence
                )
            })?;
        }
        Ok(content)
    }
}
