//! libSQL-backed local store shared by the autosave and history engines.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{DraftStore, HistoryStore};
use crate::db::{
    Database, DraftRepository, HistoryRepository, LibSqlDraftRepository, LibSqlHistoryRepository,
};
use crate::error::Result;
use crate::hash::ContentHash;
use crate::history::PersistedHistory;
use crate::models::{DocumentId, Draft};

/// Thread-safe handle to the local database.
///
/// Cloning is cheap; all clones share one connection. That shared
/// connection is the one place where writes of different documents
/// serialize behind each other.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open (or create) the store at the given filesystem path.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::open(&db_path).await?;
        tracing::info!("Local store opened at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Filesystem path of the store, `None` when in memory.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }
}

#[async_trait]
impl DraftStore for LocalStore {
    async fn get(&self, id: &DocumentId) -> Result<Option<Draft>> {
        let db = self.db.lock().await;
        let repo = LibSqlDraftRepository::new(db.connection());
        repo.get(id).await
    }

    async fn put(&self, draft: &Draft) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlDraftRepository::new(db.connection());
        repo.upsert(draft).await
    }

    async fn mark_synced(&self, id: &DocumentId, hash: &ContentHash) -> Result<bool> {
        let db = self.db.lock().await;
        let repo = LibSqlDraftRepository::new(db.connection());
        repo.mark_synced(id, hash).await
    }

    async fn list_unsynced(&self) -> Result<Vec<Draft>> {
        let db = self.db.lock().await;
        let repo = LibSqlDraftRepository::new(db.connection());
        repo.list_unsynced().await
    }
}

#[async_trait]
impl HistoryStore for LocalStore {
    async fn load_histories(&self) -> Result<Vec<(DocumentId, PersistedHistory)>> {
        let db = self.db.lock().await;
        let repo = LibSqlHistoryRepository::new(db.connection());
        repo.load_all().await
    }

    async fn save_history(&self, id: &DocumentId, history: &PersistedHistory) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlHistoryRepository::new(db.connection());
        repo.save(id, history).await
    }

    async fn delete_history(&self, id: &DocumentId) -> Result<()> {
        let db = self.db.lock().await;
        let repo = LibSqlHistoryRepository::new(db.connection());
        repo.delete(id).await
    }
}
