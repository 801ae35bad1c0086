//! Remote store boundary and an in-memory implementation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::ContentHash;
use crate::models::{DocumentId, Metadata};

/// Failure reported by a remote store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Network or server trouble; worth retrying
    #[error("Transient remote failure: {0}")]
    Transient(String),
    /// The remote rejected the request; retrying will not help
    #[error("Remote rejected request: {0}")]
    Fatal(String),
}

impl RemoteError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Parent record of a synced draft.
///
/// Small drafts carry their content inline. Large drafts leave `content`
/// empty and store `chunk_count` ordered [`RemoteChunk`]s tagged with
/// `content_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub document_id: DocumentId,
    pub content: Option<String>,
    pub metadata: Metadata,
    pub content_hash: ContentHash,
    pub chunk_count: usize,
    pub updated_at: i64,
}

impl RemoteDocument {
    #[must_use]
    pub const fn is_chunked(&self) -> bool {
        self.content.is_none()
    }
}

/// One ordered slice of a large draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteChunk {
    pub index: usize,
    pub total: usize,
    /// Hash of the full content this chunk belongs to
    pub version: ContentHash,
    pub content: String,
}

/// Remote persistence target for drafts.
///
/// Implementations must make `upsert_document` and `append_chunk` idempotent:
/// the sync pipeline re-sends both on retry.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create or replace the parent record
    async fn upsert_document(&self, document: &RemoteDocument) -> Result<(), RemoteError>;

    /// Store one chunk under the document, keyed by `(version, index)`
    async fn append_chunk(
        &self,
        document_id: &DocumentId,
        chunk: &RemoteChunk,
    ) -> Result<(), RemoteError>;

    async fn fetch_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<RemoteDocument>, RemoteError>;

    /// Chunks of one content version, in any order
    async fn fetch_chunks(
        &self,
        document_id: &DocumentId,
        version: &ContentHash,
    ) -> Result<Vec<RemoteChunk>, RemoteError>;
}

/// In-process remote store with failure injection, for tests and offline
/// development.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    documents: DashMap<DocumentId, RemoteDocument>,
    chunks: DashMap<DocumentId, Vec<RemoteChunk>>,
    scripted_failures: Mutex<VecDeque<RemoteError>>,
    offline: AtomicBool,
    calls: AtomicUsize,
    document_writes: AtomicUsize,
    operations: Mutex<Vec<String>>,
}

impl MemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call (of any kind) with `error`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, error: RemoteError) {
        self.scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// While offline every call fails transiently.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Calls that reached the store, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Successful parent-record writes.
    pub fn document_writes(&self) -> usize {
        self.document_writes.load(Ordering::SeqCst)
    }

    /// Successful writes in order, as `document:<id>` or
    /// `chunk:<id>:<index>`.
    pub fn operations(&self) -> Vec<String> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn document(&self, document_id: &DocumentId) -> Option<RemoteDocument> {
        self.documents
            .get(document_id)
            .map(|document| document.value().clone())
    }

    fn enter(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Transient("remote store unreachable".into()));
        }
        let scripted = self
            .scripted_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        scripted.map_or(Ok(()), Err)
    }

    fn record(&self, operation: String) {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(operation);
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn upsert_document(&self, document: &RemoteDocument) -> Result<(), RemoteError> {
        self.enter()?;

        // Chunks of superseded versions are unreachable once the parent moves on.
        if let Some(mut chunks) = self.chunks.get_mut(&document.document_id) {
            chunks.retain(|chunk| document.is_chunked() && chunk.version == document.content_hash);
        }
        self.documents
            .insert(document.document_id.clone(), document.clone());
        self.document_writes.fetch_add(1, Ordering::SeqCst);
        self.record(format!("document:{}", document.document_id));
        Ok(())
    }

    async fn append_chunk(
        &self,
        document_id: &DocumentId,
        chunk: &RemoteChunk,
    ) -> Result<(), RemoteError> {
        self.enter()?;

        let mut chunks = self.chunks.entry(document_id.clone()).or_default();
        chunks.retain(|existing| {
            !(existing.version == chunk.version && existing.index == chunk.index)
        });
        chunks.push(chunk.clone());
        drop(chunks);

        self.record(format!("chunk:{document_id}:{}", chunk.index));
        Ok(())
    }

    async fn fetch_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<RemoteDocument>, RemoteError> {
        self.enter()?;
        Ok(self.document(document_id))
    }

    async fn fetch_chunks(
        &self,
        document_id: &DocumentId,
        version: &ContentHash,
    ) -> Result<Vec<RemoteChunk>, RemoteError> {
        self.enter()?;
        Ok(self
            .chunks
            .get(document_id)
            .map(|chunks| {
                chunks
                    .iter()
                    .filter(|chunk| &chunk.version == version)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
