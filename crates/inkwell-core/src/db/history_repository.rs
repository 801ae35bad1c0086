//! History repository implementation

use crate::error::Result;
use crate::history::PersistedHistory;
use crate::models::DocumentId;
use crate::util::unix_millis_now;
use libsql::{params, Connection};

/// Trait for persisted undo/redo history (async)
#[allow(async_fn_in_trait)]
pub trait HistoryRepository {
    /// Load every persisted document history
    async fn load_all(&self) -> Result<Vec<(DocumentId, PersistedHistory)>>;

    /// Replace the persisted history of one document
    async fn save(&self, id: &DocumentId, history: &PersistedHistory) -> Result<()>;

    /// Remove the persisted history of one document
    async fn delete(&self, id: &DocumentId) -> Result<()>;
}

/// libSQL implementation of `HistoryRepository`
pub struct LibSqlHistoryRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlHistoryRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl HistoryRepository for LibSqlHistoryRepository<'_> {
    async fn load_all(&self) -> Result<Vec<(DocumentId, PersistedHistory)>> {
        let mut rows = self
            .conn
            .query("SELECT document_id, state FROM history", ())
            .await?;

        let mut histories = Vec::new();
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            let state: String = row.get(1)?;
            histories.push((DocumentId::from(id), serde_json::from_str(&state)?));
        }
        Ok(histories)
    }

    async fn save(&self, id: &DocumentId, history: &PersistedHistory) -> Result<()> {
        let state = serde_json::to_string(history)?;
        let now = unix_millis_now();
        self.conn
            .execute(
                "INSERT OR REPLACE INTO history (document_id, state, updated_at) VALUES (?, ?, ?)",
                params![id.as_str(), state, now],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &DocumentId) -> Result<()> {
        self.conn
            .execute("DELETE FROM history WHERE document_id = ?", [id.as_str()])
            .await?;
        Ok(())
    }
}
