//! Storage collaborators shared by the engines.
//!
//! The engines only see these traits, so tests and embedding applications
//! can swap the libSQL store for anything that persists drafts durably.

mod local_store;

use async_trait::async_trait;

use crate::error::Result;
use crate::hash::ContentHash;
use crate::history::PersistedHistory;
use crate::models::{DocumentId, Draft};

pub use local_store::LocalStore;

/// Local durable store for drafts, keyed by document id.
#[async_trait]
pub trait DraftStore: Send + Sync {
    /// Read the latest written draft
    async fn get(&self, id: &DocumentId) -> Result<Option<Draft>>;

    /// Durably write a draft, replacing any previous one for the same id
    async fn put(&self, draft: &Draft) -> Result<()>;

    /// Flag the draft synced when its stored hash still equals `hash`.
    ///
    /// Returns `false` when a newer local write replaced that content.
    async fn mark_synced(&self, id: &DocumentId, hash: &ContentHash) -> Result<bool>;

    /// Drafts not yet acknowledged by the remote store
    async fn list_unsynced(&self) -> Result<Vec<Draft>>;
}

/// Durable storage for per-document undo/redo stacks.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn load_histories(&self) -> Result<Vec<(DocumentId, PersistedHistory)>>;

    async fn save_history(&self, id: &DocumentId, history: &PersistedHistory) -> Result<()>;

    async fn delete_history(&self, id: &DocumentId) -> Result<()>;
}
