//! Snapshot/history engine: bounded per-document undo/redo.
//!
//! Snapshots are stored as deltas against the previous snapshot (see
//! [`crate::delta`]), with the oldest retained entry always kept as full
//! content. Undo and redo are in-memory stack moves; only [`HistoryEngine::init`]
//! and [`HistoryEngine::persist`] touch the [`HistoryStore`].

mod stack;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;

use crate::config::HistoryConfig;
use crate::error::{Error, Result};
use crate::models::{DocumentId, Snapshot};
use crate::services::HistoryStore;
use crate::util::unix_millis_now;

use stack::DocumentHistory;
pub use stack::{PersistedHistory, MAX_HISTORY_LEN};

/// How a snapshot was triggered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotOptions {
    /// User checkpoint. Automatic snapshots are rate-limited by
    /// `auto_snapshot_interval` and skipped when nothing changed.
    pub manual: bool,
}

impl SnapshotOptions {
    pub const fn manual() -> Self {
        Self { manual: true }
    }

    pub const fn automatic() -> Self {
        Self { manual: false }
    }
}

type Slot = Arc<Mutex<DocumentHistory>>;

/// Per-document undo/redo history.
pub struct HistoryEngine {
    config: HistoryConfig,
    store: Option<Arc<dyn HistoryStore>>,
    documents: DashMap<DocumentId, Slot>,
    initialized: AtomicBool,
}

impl HistoryEngine {
    /// History kept only in memory.
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            store: None,
            documents: DashMap::new(),
            initialized: AtomicBool::new(false),
        }
    }

    /// History that can be persisted to and restored from `store`.
    pub fn with_store(config: HistoryConfig, store: Arc<dyn HistoryStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new(config)
        }
    }

    /// Restore persisted histories. Must complete before any other call.
    pub async fn init(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        if let Some(store) = &self.store {
            let histories = store.load_histories().await?;
            let restored = histories.len();
            for (id, persisted) in histories {
                let history = DocumentHistory::restore(id.clone(), persisted);
                if let Some(reason) = history.corruption() {
                    tracing::error!("History for {id} failed to restore: {reason}");
                }
                self.documents.insert(id, Arc::new(Mutex::new(history)));
            }
            tracing::info!("Restored history for {restored} documents");
        }

        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Record a history point for `content`.
    ///
    /// Returns `None` when an automatic snapshot is skipped because the
    /// interval has not elapsed or the content is unchanged.
    pub fn create_snapshot(
        &self,
        document_id: &DocumentId,
        content: &str,
        options: SnapshotOptions,
    ) -> Result<Option<Snapshot>> {
        let slot = self.slot(document_id)?;
        let mut history = lock(&slot);
        check_corruption(document_id, &history)?;

        if !options.manual {
            let interval = self.config.auto_snapshot_interval();
            let too_soon = history
                .last_snapshot_at()
                .is_some_and(|at| at.elapsed() < interval);
            if too_soon || history.head() == Some(content) {
                return Ok(None);
            }
        }

        let created_at = unix_millis_now();
        match history.push(content, options.manual, created_at) {
            Ok(snapshot) => {
                tracing::debug!(
                    "Snapshot {} ({:?}, manual: {}) recorded for {document_id}",
                    snapshot.sequence,
                    snapshot.kind(),
                    snapshot.is_manual
                );
                Ok(Some(snapshot))
            }
            Err(reason) => Err(corrupt(document_id, &mut history, reason)),
        }
    }

    /// Step back one snapshot and return the content to display.
    ///
    /// Returns `None` when there is no snapshot before the current one.
    pub fn undo(&self, document_id: &DocumentId) -> Result<Option<String>> {
        let slot = self.slot(document_id)?;
        let mut history = lock(&slot);
        check_corruption(document_id, &history)?;
        history
            .undo()
            .map_err(|reason| corrupt(document_id, &mut history, reason))
    }

    /// Re-apply the most recently undone snapshot.
    pub fn redo(&self, document_id: &DocumentId) -> Result<Option<String>> {
        let slot = self.slot(document_id)?;
        let mut history = lock(&slot);
        check_corruption(document_id, &history)?;
        history
            .redo()
            .map_err(|reason| corrupt(document_id, &mut history, reason))
    }

    /// Content of the current (top) snapshot.
    pub fn current(&self, document_id: &DocumentId) -> Result<Option<String>> {
        let slot = self.slot(document_id)?;
        let history = lock(&slot);
        check_corruption(document_id, &history)?;
        Ok(history.head().map(ToString::to_string))
    }

    pub fn can_undo(&self, document_id: &DocumentId) -> bool {
        self.undo_depth(document_id) > 1
    }

    pub fn can_redo(&self, document_id: &DocumentId) -> bool {
        self.redo_depth(document_id) > 0
    }

    pub fn undo_depth(&self, document_id: &DocumentId) -> usize {
        self.peek(document_id, DocumentHistory::undo_depth)
    }

    pub fn redo_depth(&self, document_id: &DocumentId) -> usize {
        self.peek(document_id, DocumentHistory::redo_depth)
    }

    /// Undo stack entries, oldest first.
    pub fn snapshots(&self, document_id: &DocumentId) -> Vec<Snapshot> {
        self.peek(document_id, DocumentHistory::snapshots)
    }

    /// Drop both stacks for a document, including a corrupted history.
    pub fn clear(&self, document_id: &DocumentId) {
        if let Some(slot) = self.documents.get(document_id) {
            *lock(&slot) = DocumentHistory::new(document_id.clone());
            tracing::debug!("Cleared history for {document_id}");
        }
    }

    /// Write a document's stacks to the history store.
    ///
    /// An empty history removes the persisted entry. No-op without a store.
    pub async fn persist(&self, document_id: &DocumentId) -> Result<()> {
        self.ensure_initialized()?;
        let Some(store) = &self.store else {
            return Ok(());
        };

        let state = self
            .documents
            .get(document_id)
            .map(|slot| {
                let history = lock(&slot);
                (!history.is_empty()).then(|| history.to_persisted())
            })
            .unwrap_or_default();

        match state {
            Some(state) => store.save_history(document_id, &state).await,
            None => store.delete_history(document_id).await,
        }
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::HistoryNotInitialized)
        }
    }

    fn slot(&self, document_id: &DocumentId) -> Result<Slot> {
        self.ensure_initialized()?;
        if document_id.is_blank() {
            return Err(Error::InvalidInput("document id must not be empty".into()));
        }
        Ok(self
            .documents
            .entry(document_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(DocumentHistory::new(document_id.clone()))))
            .clone())
    }

    fn peek<T: Default>(
        &self,
        document_id: &DocumentId,
        read: impl FnOnce(&DocumentHistory) -> T,
    ) -> T {
        self.documents
            .get(document_id)
            .map(|slot| {
                let history = lock(&slot);
                read(&history)
            })
            .unwrap_or_default()
    }
}

fn lock(slot: &Slot) -> MutexGuard<'_, DocumentHistory> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn check_corruption(document_id: &DocumentId, history: &DocumentHistory) -> Result<()> {
    match history.corruption() {
        Some(reason) => Err(Error::HistoryCorruption {
            document_id: document_id.clone(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

fn corrupt(document_id: &DocumentId, history: &mut DocumentHistory, reason: String) -> Error {
    tracing::error!("History for {document_id} is corrupted: {reason}");
    history.mark_corrupted(reason.clone());
    Error::HistoryCorruption {
        document_id: document_id.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::calculate_delta;
    use crate::services::LocalStore;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    async fn engine() -> HistoryEngine {
        let engine = HistoryEngine::new(HistoryConfig::default());
        engine.init().await.unwrap();
        engine
    }

    #[tokio::test]
    async fn undo_and_redo_between_two_manual_versions() {
        let engine = engine().await;
        let id = DocumentId::from("e1");

        engine
            .create_snapshot(&id, "Version 1", SnapshotOptions::manual())
            .unwrap();
        engine
            .create_snapshot(&id, "Version 2", SnapshotOptions::manual())
            .unwrap();

        assert_eq!(engine.undo(&id).unwrap().as_deref(), Some("Version 1"));
        assert_eq!(engine.redo(&id).unwrap().as_deref(), Some("Version 2"));
    }

    #[tokio::test]
    async fn calls_before_init_fail() {
        let engine = HistoryEngine::new(HistoryConfig::default());
        let error = engine
            .create_snapshot(&"e1".into(), "text", SnapshotOptions::manual())
            .unwrap_err();
        assert!(matches!(error, Error::HistoryNotInitialized));
        assert!(matches!(
            engine.undo(&"e1".into()),
            Err(Error::HistoryNotInitialized)
        ));
    }

    #[tokio::test]
    async fn single_snapshot_cannot_be_undone() {
        let engine = engine().await;
        let id = DocumentId::from("e1");
        engine
            .create_snapshot(&id, "only version", SnapshotOptions::manual())
            .unwrap();

        assert!(!engine.can_undo(&id));
        assert_eq!(engine.undo(&id).unwrap(), None);
        assert_eq!(engine.current(&id).unwrap().as_deref(), Some("only version"));
    }

    #[tokio::test]
    async fn sixty_snapshots_keep_fifty_replayable_entries() {
        let engine = engine().await;
        let id = DocumentId::from("e1");
        for i in 0..60 {
            engine
                .create_snapshot(
                    &id,
                    &format!("Common App essay draft, paragraph one. Edit {i}"),
                    SnapshotOptions::manual(),
                )
                .unwrap();
        }

        assert_eq!(engine.undo_depth(&id), MAX_HISTORY_LEN);
        assert_eq!(
            engine.undo(&id).unwrap().as_deref(),
            Some("Common App essay draft, paragraph one. Edit 58")
        );

        let mut last = None;
        while let Some(content) = engine.undo(&id).unwrap() {
            last = Some(content);
        }
        assert_eq!(
            last.as_deref(),
            Some("Common App essay draft, paragraph one. Edit 10")
        );
    }

    #[tokio::test]
    async fn redo_inverts_undo_at_every_depth() {
        let engine = engine().await;
        let id = DocumentId::from("e1");
        let versions: Vec<String> = (0..8)
            .map(|i| format!("Why this college? Because of reason number {i}."))
            .collect();
        for version in &versions {
            engine
                .create_snapshot(&id, version, SnapshotOptions::manual())
                .unwrap();
        }

        for depth in 1..versions.len() {
            for _ in 0..depth {
                engine.undo(&id).unwrap();
            }
            for _ in 0..depth {
                engine.redo(&id).unwrap();
            }
            assert_eq!(engine.current(&id).unwrap().as_ref(), versions.last());
        }
        assert!(!engine.can_redo(&id));
    }

    #[tokio::test]
    async fn documents_are_independent() {
        let engine = engine().await;
        let a = DocumentId::from("a");
        let b = DocumentId::from("b");

        engine.create_snapshot(&a, "a1", SnapshotOptions::manual()).unwrap();
        engine.create_snapshot(&a, "a2", SnapshotOptions::manual()).unwrap();
        engine.create_snapshot(&b, "b1", SnapshotOptions::manual()).unwrap();

        assert_eq!(engine.undo(&a).unwrap().as_deref(), Some("a1"));
        assert_eq!(engine.undo(&b).unwrap(), None);
        assert_eq!(engine.current(&b).unwrap().as_deref(), Some("b1"));
    }

    #[tokio::test(start_paused = true)]
    async fn automatic_snapshots_respect_interval_and_skip_unchanged() {
        let engine = HistoryEngine::new(HistoryConfig {
            auto_snapshot_interval_ms: 1_000,
        });
        engine.init().await.unwrap();
        let id = DocumentId::from("e1");

        assert!(engine
            .create_snapshot(&id, "draft one", SnapshotOptions::automatic())
            .unwrap()
            .is_some());
        assert!(engine
            .create_snapshot(&id, "draft two", SnapshotOptions::automatic())
            .unwrap()
            .is_none());

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert!(engine
            .create_snapshot(&id, "draft one", SnapshotOptions::automatic())
            .unwrap()
            .is_none());
        assert!(engine
            .create_snapshot(&id, "draft two", SnapshotOptions::automatic())
            .unwrap()
            .is_some());

        // Manual checkpoints are never rate-limited.
        assert!(engine
            .create_snapshot(&id, "draft two", SnapshotOptions::manual())
            .unwrap()
            .is_some());
        assert_eq!(engine.undo_depth(&id), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn persisted_history_survives_a_new_engine() {
        let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
        let id = DocumentId::from("e1");

        let engine = HistoryEngine::with_store(HistoryConfig::default(), store.clone());
        engine.init().await.unwrap();
        engine
            .create_snapshot(&id, "Version 1", SnapshotOptions::manual())
            .unwrap();
        engine
            .create_snapshot(&id, "Version 2", SnapshotOptions::manual())
            .unwrap();
        engine.persist(&id).await.unwrap();

        let restored = HistoryEngine::with_store(HistoryConfig::default(), store);
        restored.init().await.unwrap();
        assert_eq!(restored.undo_depth(&id), 2);
        assert_eq!(restored.undo(&id).unwrap().as_deref(), Some("Version 1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn corrupted_chain_fails_loudly_for_that_document_only() {
        let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
        let broken = DocumentId::from("broken");
        let healthy = DocumentId::from("healthy");

        let dangling = PersistedHistory {
            undo: vec![
                Snapshot {
                    document_id: broken.clone(),
                    sequence: 3,
                    payload: calculate_delta("aaaXbbb", "aaaYbbb"),
                    is_manual: true,
                    created_at: 0,
                },
                Snapshot {
                    document_id: broken.clone(),
                    sequence: 4,
                    payload: calculate_delta("aaaYbbb", "aaaZbbb"),
                    is_manual: true,
                    created_at: 0,
                },
            ],
            redo: Vec::new(),
            next_sequence: 5,
        };
        store.save_history(&broken, &dangling).await.unwrap();

        let engine = HistoryEngine::with_store(HistoryConfig::default(), store);
        engine.init().await.unwrap();

        assert!(matches!(
            engine.undo(&broken),
            Err(Error::HistoryCorruption { .. })
        ));
        assert!(matches!(
            engine.create_snapshot(&broken, "new", SnapshotOptions::manual()),
            Err(Error::HistoryCorruption { .. })
        ));

        engine
            .create_snapshot(&healthy, "fine", SnapshotOptions::manual())
            .unwrap();
        assert_eq!(engine.current(&healthy).unwrap().as_deref(), Some("fine"));

        engine.clear(&broken);
        engine
            .create_snapshot(&broken, "fresh start", SnapshotOptions::manual())
            .unwrap();
        assert_eq!(
            engine.current(&broken).unwrap().as_deref(),
            Some("fresh start")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn persisting_an_empty_history_removes_it() {
        let store = Arc::new(LocalStore::open_in_memory().await.unwrap());
        let id = DocumentId::from("e1");

        let engine = HistoryEngine::with_store(HistoryConfig::default(), store.clone());
        engine.init().await.unwrap();
        engine
            .create_snapshot(&id, "text", SnapshotOptions::manual())
            .unwrap();
        engine.persist(&id).await.unwrap();
        engine.clear(&id);
        engine.persist(&id).await.unwrap();

        assert!(store.load_histories().await.unwrap().is_empty());
    }
}
