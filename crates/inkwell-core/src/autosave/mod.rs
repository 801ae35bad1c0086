//! Autosave engine: debounced, deduplicated writes to the local store.
//!
//! Each document id owns one slot holding at most one pending save and one
//! timer handle. A new edit inside the debounce window replaces the pending
//! content and re-arms the timer (abort + respawn), so a window produces
//! exactly one durable write carrying the latest content. Every caller that
//! joined the window receives the outcome of that write.
//!
//! Successful writes are published as [`AutosaveEvent::DraftPersisted`]; the
//! sync pipeline subscribes to those instead of being called directly, so a
//! sync failure can never fail a save.

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::config::AutosaveConfig;
use crate::error::{Error, Result};
use crate::hash::{hash_content, ContentHash};
use crate::models::{DocumentId, Draft, Metadata};
use crate::services::DraftStore;

/// Messages published by the autosave engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutosaveEvent {
    /// A draft was durably written to the local store
    DraftPersisted(Draft),
}

type SaveOutcome = std::result::Result<Draft, String>;

struct PendingSave {
    generation: u64,
    content: String,
    metadata: Metadata,
    waiters: Vec<oneshot::Sender<SaveOutcome>>,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct SaveSlot {
    /// Hash of the content last written; `None` until loaded from the store
    last_hash: Option<Option<ContentHash>>,
    pending: Option<PendingSave>,
    generation: u64,
}

struct Inner {
    store: Arc<dyn DraftStore>,
    config: AutosaveConfig,
    slots: DashMap<DocumentId, Arc<AsyncMutex<SaveSlot>>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<AutosaveEvent>>>,
}

/// Debouncing write-through layer in front of a [`DraftStore`].
///
/// Cloning is cheap; clones share slots and subscribers.
#[derive(Clone)]
pub struct AutosaveEngine {
    inner: Arc<Inner>,
}

impl AutosaveEngine {
    pub fn new(store: Arc<dyn DraftStore>, config: AutosaveConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                slots: DashMap::new(),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Receive an event for every successful durable write.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<AutosaveEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Request a save of `content` and wait for the debounced write.
    ///
    /// Content identical to the last written content resolves immediately
    /// without a write. A store failure is returned as
    /// [`Error::StorageWrite`] and leaves the dedup hash untouched, so the
    /// same content can be saved again.
    pub async fn save_draft(
        &self,
        document_id: DocumentId,
        content: impl Into<String>,
        metadata: Metadata,
    ) -> Result<Draft> {
        if document_id.is_blank() {
            return Err(Error::InvalidInput("document id must not be empty".into()));
        }
        let content = content.into();
        let hash = hash_content(&content);
        let slot = self.inner.slot(&document_id);

        let outcome = {
            let mut slot = slot.lock().await;
            if slot.last_hash.is_none() {
                let stored = self.inner.store.get(&document_id).await?;
                slot.last_hash = Some(stored.map(|draft| draft.last_content_hash));
            }

            if slot.last_hash.as_ref().is_some_and(|last| last.as_ref() == Some(&hash)) {
                let current = self
                    .inner
                    .store
                    .get(&document_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(document_id.to_string()))?;
                if let Some(pending) = slot.pending.take() {
                    // The newest request matches what is stored, so the open
                    // window would only write stale intermediate content.
                    pending.timer.abort();
                    for waiter in pending.waiters {
                        let _ = waiter.send(Ok(current.clone()));
                    }
                    tracing::debug!("Cancelled pending save for {document_id}: content reverted");
                }
                tracing::debug!("Skipping save for {document_id}: content unchanged");
                return Ok(current);
            }

            slot.generation += 1;
            let generation = slot.generation;
            let timer = self.inner.arm_timer(document_id.clone(), generation);
            let (tx, rx) = oneshot::channel();

            match slot.pending.as_mut() {
                Some(pending) => {
                    pending.timer.abort();
                    pending.timer = timer;
                    pending.generation = generation;
                    pending.content = content;
                    pending.metadata = metadata;
                    pending.waiters.push(tx);
                }
                None => {
                    slot.pending = Some(PendingSave {
                        generation,
                        content,
                        metadata,
                        waiters: vec![tx],
                        timer,
                    });
                }
            }
            rx
        };

        outcome
            .await
            .map_err(|_| Error::SaveAborted(document_id.clone()))?
            .map_err(|reason| Error::StorageWrite {
                document_id,
                reason,
            })
    }

    /// Read the latest *written* draft, ignoring any open debounce window.
    pub async fn get_draft(&self, document_id: &DocumentId) -> Result<Option<Draft>> {
        self.inner.store.get(document_id).await
    }

    /// Write a document's pending save now instead of waiting for its timer.
    ///
    /// Returns `None` when nothing was pending.
    pub async fn flush(&self, document_id: &DocumentId) -> Result<Option<Draft>> {
        let Some(slot) = self.inner.slots.get(document_id).map(|slot| Arc::clone(&slot)) else {
            return Ok(None);
        };
        let mut slot = slot.lock().await;
        let Some(pending) = slot.pending.take() else {
            return Ok(None);
        };
        pending.timer.abort();
        self.inner
            .write(document_id, &mut slot, pending)
            .await
            .map(Some)
    }

    /// Flush every open debounce window, e.g. before shutdown.
    ///
    /// Stops at the first failed write.
    pub async fn flush_all(&self) -> Result<usize> {
        let ids: Vec<DocumentId> = self
            .inner
            .slots
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut flushed = 0;
        for id in ids {
            if self.flush(&id).await?.is_some() {
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Number of documents with an open debounce window.
    pub async fn pending_count(&self) -> usize {
        let slots: Vec<_> = self
            .inner
            .slots
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut count = 0;
        for slot in slots {
            if slot.lock().await.pending.is_some() {
                count += 1;
            }
        }
        count
    }
}

impl Inner {
    fn slot(&self, document_id: &DocumentId) -> Arc<AsyncMutex<SaveSlot>> {
        Arc::clone(
            &self
                .slots
                .entry(document_id.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(SaveSlot::default()))),
        )
    }

    fn arm_timer(self: &Arc<Self>, document_id: DocumentId, generation: u64) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        let delay = self.config.debounce_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire(document_id, generation).await;
        })
    }

    /// Timer expiry: write the pending save if it is still this generation.
    async fn fire(&self, document_id: DocumentId, generation: u64) {
        let Some(slot) = self.slots.get(&document_id).map(|slot| Arc::clone(&slot)) else {
            return;
        };
        let mut slot = slot.lock().await;
        let due = slot
            .pending
            .as_ref()
            .is_some_and(|pending| pending.generation == generation);
        if !due {
            return;
        }
        if let Some(pending) = slot.pending.take() {
            // Failures were already delivered to the waiting callers.
            let _ = self.write(&document_id, &mut slot, pending).await;
        }
    }

    /// Write while holding the document's slot, so writes for one id never
    /// interleave.
    async fn write(
        &self,
        document_id: &DocumentId,
        slot: &mut SaveSlot,
        pending: PendingSave,
    ) -> Result<Draft> {
        let draft = Draft::new(document_id.clone(), pending.content, pending.metadata);

        match self.store.put(&draft).await {
            Ok(()) => {
                slot.last_hash = Some(Some(draft.last_content_hash.clone()));
                tracing::debug!(
                    "Autosaved {document_id} ({} bytes, {} edits coalesced)",
                    draft.content_len(),
                    pending.waiters.len()
                );
                for waiter in pending.waiters {
                    let _ = waiter.send(Ok(draft.clone()));
                }
                self.publish(&AutosaveEvent::DraftPersisted(draft.clone()));
                Ok(draft)
            }
            Err(error) => {
                let reason = error.to_string();
                tracing::warn!("Autosave of {document_id} failed: {reason}");
                for waiter in pending.waiters {
                    let _ = waiter.send(Err(reason.clone()));
                }
                Err(Error::StorageWrite {
                    document_id: document_id.clone(),
                    reason,
                })
            }
        }
    }

    fn publish(&self, event: &AutosaveEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::LocalStore;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    const DEBOUNCE_MS: u64 = 50;

    /// Local store that counts writes and can fail the next `n` of them.
    struct CountingStore {
        inner: LocalStore,
        puts: AtomicUsize,
        failures_left: AtomicUsize,
    }

    impl CountingStore {
        async fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: LocalStore::open_in_memory().await.unwrap(),
                puts: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(0),
            })
        }

        fn puts(&self) -> usize {
            self.puts.load(Ordering::SeqCst)
        }

        fn fail_next(&self, n: usize) {
            self.failures_left.store(n, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl DraftStore for CountingStore {
        async fn get(&self, id: &DocumentId) -> Result<Option<Draft>> {
            self.inner.get(id).await
        }

        async fn put(&self, draft: &Draft) -> Result<()> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(Error::Database("disk full".into()));
            }
            self.inner.put(draft).await
        }

        async fn mark_synced(&self, id: &DocumentId, hash: &ContentHash) -> Result<bool> {
            self.inner.mark_synced(id, hash).await
        }

        async fn list_unsynced(&self) -> Result<Vec<Draft>> {
            self.inner.list_unsynced().await
        }
    }

    fn engine(store: Arc<CountingStore>) -> AutosaveEngine {
        AutosaveEngine::new(
            store,
            AutosaveConfig {
                debounce_delay_ms: DEBOUNCE_MS,
            },
        )
    }

    fn metadata() -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("userId".to_string(), serde_json::json!("student-1"));
        metadata
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rapid_saves_coalesce_into_one_write_with_latest_content() {
        let store = CountingStore::new().await;
        let engine = engine(store.clone());
        let id = DocumentId::from("e1");

        let mut handles = Vec::new();
        for i in 1..=5 {
            let engine = engine.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                engine.save_draft(id, format!("v{i}"), metadata()).await
            }));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        for handle in handles {
            let draft = handle.await.unwrap().unwrap();
            assert_eq!(draft.content, "v5");
        }
        assert_eq!(store.puts(), 1);
        let stored = engine.get_draft(&id).await.unwrap().unwrap();
        assert_eq!(stored.content, "v5");
        assert_eq!(stored.metadata, metadata());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn identical_content_is_written_once() {
        let store = CountingStore::new().await;
        let engine = engine(store.clone());
        let content = "x".repeat(1000);

        engine
            .save_draft("e2".into(), content.clone(), metadata())
            .await
            .unwrap();
        assert_eq!(store.puts(), 1);

        let second = engine
            .save_draft("e2".into(), content.clone(), metadata())
            .await
            .unwrap();
        assert_eq!(second.content, content);
        assert_eq!(store.puts(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_content_is_saved() {
        let store = CountingStore::new().await;
        let engine = engine(store.clone());

        let draft = engine
            .save_draft("e1".into(), "", Metadata::new())
            .await
            .unwrap();
        assert_eq!(draft.content, "");
        assert_eq!(store.puts(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn get_draft_sees_written_state_not_requested_state() {
        let store = CountingStore::new().await;
        let engine = engine(store.clone());
        let id = DocumentId::from("e1");

        let pending = {
            let engine = engine.clone();
            let id = id.clone();
            tokio::spawn(async move { engine.save_draft(id, "draft", Metadata::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(engine.get_draft(&id).await.unwrap().is_none());
        assert_eq!(engine.pending_count().await, 1);

        pending.await.unwrap().unwrap();
        assert_eq!(
            engine.get_draft(&id).await.unwrap().unwrap().content,
            "draft"
        );
        assert_eq!(engine.pending_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_write_is_reported_and_retried_on_identical_save() {
        let store = CountingStore::new().await;
        let engine = engine(store.clone());
        store.fail_next(1);

        let error = engine
            .save_draft("e1".into(), "essay", Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::StorageWrite { .. }));
        assert!(error.to_string().contains("disk full"));

        engine
            .save_draft("e1".into(), "essay", Metadata::new())
            .await
            .unwrap();
        assert_eq!(store.puts(), 2);
        assert_eq!(
            engine.get_draft(&"e1".into()).await.unwrap().unwrap().content,
            "essay"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn documents_debounce_independently() {
        let store = CountingStore::new().await;
        let engine = engine(store.clone());

        let (a, b) = tokio::join!(
            engine.save_draft("a".into(), "alpha", Metadata::new()),
            engine.save_draft("b".into(), "beta", Metadata::new()),
        );
        assert_eq!(a.unwrap().content, "alpha");
        assert_eq!(b.unwrap().content, "beta");
        assert_eq!(store.puts(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reverting_to_stored_content_cancels_pending_write() {
        let store = CountingStore::new().await;
        let engine = engine(store.clone());
        let id = DocumentId::from("e1");

        engine
            .save_draft(id.clone(), "original", Metadata::new())
            .await
            .unwrap();

        let typo = {
            let engine = engine.clone();
            let id = id.clone();
            tokio::spawn(async move { engine.save_draft(id, "originalx", Metadata::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let reverted = engine
            .save_draft(id.clone(), "original", Metadata::new())
            .await
            .unwrap();
        assert_eq!(reverted.content, "original");
        assert_eq!(typo.await.unwrap().unwrap().content, "original");

        tokio::time::sleep(Duration::from_millis(DEBOUNCE_MS * 2)).await;
        assert_eq!(store.puts(), 1);
        assert_eq!(engine.get_draft(&id).await.unwrap().unwrap().content, "original");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn flush_writes_pending_save_immediately() {
        let store = CountingStore::new().await;
        let engine = AutosaveEngine::new(
            store.clone(),
            AutosaveConfig {
                debounce_delay_ms: 60_000,
            },
        );
        let id = DocumentId::from("e1");

        let waiting = {
            let engine = engine.clone();
            let id = id.clone();
            tokio::spawn(async move { engine.save_draft(id, "closing tab", Metadata::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(engine.flush_all().await.unwrap(), 1);
        assert_eq!(waiting.await.unwrap().unwrap().content, "closing tab");
        assert_eq!(store.puts(), 1);
        assert!(engine.flush(&id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn subscribers_receive_persisted_drafts() {
        let store = CountingStore::new().await;
        let engine = engine(store);
        let mut events = engine.subscribe();

        engine
            .save_draft("e1".into(), "hello", Metadata::new())
            .await
            .unwrap();

        let AutosaveEvent::DraftPersisted(draft) = events.recv().await.unwrap();
        assert_eq!(draft.document_id.as_str(), "e1");
        assert_eq!(draft.content, "hello");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blank_document_id_is_rejected() {
        let store = CountingStore::new().await;
        let engine = engine(store.clone());
        let error = engine
            .save_draft(" ".into(), "text", Metadata::new())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
        assert_eq!(store.puts(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn saved_draft_is_retrievable_after_restart() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("inkwell.db");

        {
            let store = Arc::new(LocalStore::open_path(&path).await.unwrap());
            let engine = AutosaveEngine::new(store, AutosaveConfig::default());
            engine
                .save_draft("e1".into(), "survives restarts", metadata())
                .await
                .unwrap();
        }

        let store = Arc::new(LocalStore::open_path(&path).await.unwrap());
        let engine = AutosaveEngine::new(store, AutosaveConfig::default());
        let draft = engine.get_draft(&"e1".into()).await.unwrap().unwrap();
        assert_eq!(draft.content, "survives restarts");
        assert_eq!(draft.metadata, metadata());
        assert!(!draft.synced);
    }
}
