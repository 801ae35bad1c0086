//! Remote replication of persisted drafts.
//!
//! The [`SyncPipeline`] consumes drafts (directly or from
//! [`crate::AutosaveEvent`]s), consults the [`CircuitBreaker`] before each
//! attempt and writes to a [`RemoteStore`], chunking large content.

mod breaker;
mod chunk;
mod http;
mod pipeline;
mod remote;

use std::time::Duration;

use thiserror::Error;

use crate::hash::ContentHash;
use crate::models::DocumentId;

pub use breaker::{Admission, CircuitBreaker, CircuitState};
pub use chunk::{build_chunks, reassemble, split_chunks};
pub use http::HttpRemoteStore;
pub use pipeline::{SyncPipeline, SyncQueueEntry};
pub use remote::{MemoryRemoteStore, RemoteChunk, RemoteDocument, RemoteError, RemoteStore};

/// Result of one sync run that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The remote store acknowledged the draft
    Synced,
    /// Circuit open; nothing was sent
    Deferred { retry_after: Duration },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync of {document_id} gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        document_id: DocumentId,
        attempts: u32,
        last_error: RemoteError,
    },

    #[error("Remote store rejected {document_id}: {message}")]
    Fatal {
        document_id: DocumentId,
        message: String,
    },

    #[error("Failed to read {document_id} from the remote store: {source}")]
    Fetch {
        document_id: DocumentId,
        source: RemoteError,
    },

    #[error(transparent)]
    Local(#[from] crate::error::Error),
}

/// Observable sync progress, one event per finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Synced {
        document_id: DocumentId,
        content_hash: ContentHash,
    },
    Deferred {
        document_id: DocumentId,
        retry_after: Duration,
    },
    /// The entry was dropped; the local draft stays unsynced
    Failed {
        document_id: DocumentId,
        reason: String,
    },
}
