//! Draft repository implementation

use crate::error::Result;
use crate::hash::ContentHash;
use crate::models::{DocumentId, Draft, Metadata};
use libsql::{params, Connection, Row};

/// Trait for draft storage operations (async)
#[allow(async_fn_in_trait)]
pub trait DraftRepository {
    /// Get a draft by document id
    async fn get(&self, id: &DocumentId) -> Result<Option<Draft>>;

    /// Insert or replace the draft for its document id
    async fn upsert(&self, draft: &Draft) -> Result<()>;

    /// Mark a draft synced if its stored hash still equals `hash`
    async fn mark_synced(&self, id: &DocumentId, hash: &ContentHash) -> Result<bool>;

    /// List drafts the remote store has not acknowledged, oldest first
    async fn list_unsynced(&self) -> Result<Vec<Draft>>;
}

/// libSQL implementation of `DraftRepository`
pub struct LibSqlDraftRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlDraftRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a draft from a database row
    fn parse_draft(row: &Row) -> Result<Draft> {
        let document_id: String = row.get(0)?;
        let metadata: String = row.get(2)?;
        let last_content_hash: String = row.get(3)?;
        Ok(Draft {
            document_id: DocumentId::from(document_id),
            content: row.get(1)?,
            metadata: serde_json::from_str::<Metadata>(&metadata)?,
            last_content_hash: ContentHash::from(last_content_hash),
            updated_at: row.get(4)?,
            synced: row.get::<i64>(5)? != 0,
        })
    }
}

impl DraftRepository for LibSqlDraftRepository<'_> {
    async fn get(&self, id: &DocumentId) -> Result<Option<Draft>> {
        let mut rows = self
            .conn
            .query(
                "SELECT document_id, content, metadata, last_content_hash, updated_at, synced
                 FROM drafts WHERE document_id = ?",
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_draft(&row)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, draft: &Draft) -> Result<()> {
        let metadata = serde_json::to_string(&draft.metadata)?;
        self.conn
            .execute(
                "INSERT INTO drafts (document_id, content, metadata, last_content_hash, updated_at, synced)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(document_id) DO UPDATE SET
                    content = excluded.content,
                    metadata = excluded.metadata,
                    last_content_hash = excluded.last_content_hash,
                    updated_at = excluded.updated_at,
                    synced = excluded.synced",
                params![
                    draft.document_id.as_str(),
                    draft.content.as_str(),
                    metadata,
                    draft.last_content_hash.as_str(),
                    draft.updated_at,
                    i64::from(draft.synced)
                ],
            )
            .await?;
        Ok(())
    }

    async fn mark_synced(&self, id: &DocumentId, hash: &ContentHash) -> Result<bool> {
        let rows = self
            .conn
            .execute(
                "UPDATE drafts SET synced = 1 WHERE document_id = ? AND last_content_hash = ?",
                [id.as_str(), hash.as_str()],
            )
            .await?;
        Ok(rows > 0)
    }

    async fn list_unsynced(&self) -> Result<Vec<Draft>> {
        let mut rows = self
            .conn
            .query(
                "SELECT document_id, content, metadata, last_content_hash, updated_at, synced
                 FROM drafts WHERE synced = 0
                 ORDER BY updated_at ASC",
                (),
            )
            .await?;

        let mut drafts = Vec::new();
        while let Some(row) = rows.next().await? {
            drafts.push(Self::parse_draft(&row)?);
        }
        Ok(drafts)
    }
}
