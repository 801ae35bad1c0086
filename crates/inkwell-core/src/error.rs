//! Error types for inkwell-core

use thiserror::Error;

use crate::models::DocumentId;

/// Result type alias using inkwell-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in inkwell-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A debounced save could not be written to the local store.
    ///
    /// The draft hash is not advanced, so saving the same content again
    /// retries the write instead of being deduplicated.
    #[error("Failed to write draft {document_id}: {reason}")]
    StorageWrite {
        document_id: DocumentId,
        reason: String,
    },

    /// The pending save was dropped before its write completed
    #[error("Save for {0} was aborted before it was written")]
    SaveAborted(DocumentId),

    /// History was used before `HistoryEngine::init` completed
    #[error("History engine is not initialized")]
    HistoryNotInitialized,

    /// A document's delta chain cannot be replayed
    #[error("History for {document_id} is corrupted: {reason}")]
    HistoryCorruption {
        document_id: DocumentId,
        reason: String,
    },
}
