//! Sync pipeline: per-document queue, retry with backoff, chunking.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::breaker::{Admission, CircuitBreaker};
use super::chunk::{build_chunks, reassemble};
use super::remote::{RemoteDocument, RemoteError, RemoteStore};
use super::{SyncError, SyncEvent, SyncOutcome};
use crate::autosave::AutosaveEvent;
use crate::config::SyncConfig;
use crate::error::Error;
use crate::hash::hash_content;
use crate::models::{DocumentId, Draft};
use crate::services::DraftStore;
use crate::state::SyncState;

/// A draft waiting for (or between) remote attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncQueueEntry {
    /// Copy of the draft at enqueue time
    pub draft: Draft,
    /// Remote attempts made so far, across deferrals
    pub attempts: u32,
    pub next_attempt_at: Option<Instant>,
    /// Call order within the document; an entry never overwrites a newer one
    pub sequence: u64,
}

impl SyncQueueEntry {
    #[must_use]
    pub const fn new(draft: Draft) -> Self {
        Self {
            draft,
            attempts: 0,
            next_attempt_at: None,
            sequence: 0,
        }
    }
}

#[derive(Default)]
struct DocumentQueue {
    pending: Option<SyncQueueEntry>,
    /// A worker task is draining this document
    running: bool,
    issued: u64,
}

enum Step {
    Run(SyncQueueEntry),
    /// The parked entry is not due yet
    Wait(Instant),
    Idle,
}

impl DocumentQueue {
    fn issue(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    fn has_newer_than(&self, sequence: u64) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|pending| pending.sequence > sequence)
    }

    fn next_step(&mut self) -> Step {
        if let Some(due) = self.pending.as_ref().and_then(|entry| entry.next_attempt_at) {
            if due > Instant::now() {
                return Step::Wait(due);
            }
        }
        match self.pending.take() {
            Some(entry) => Step::Run(entry),
            None => {
                self.running = false;
                Step::Idle
            }
        }
    }
}

/// Queue state of one document plus the lock held by every remote write
/// for it, queued or direct.
#[derive(Default)]
struct DocumentSlot {
    queue: Mutex<DocumentQueue>,
    writer: AsyncMutex<()>,
}

struct Inner {
    remote: Arc<dyn RemoteStore>,
    local: Option<Arc<dyn DraftStore>>,
    breaker: CircuitBreaker,
    config: SyncConfig,
    queues: DashMap<DocumentId, Arc<DocumentSlot>>,
    statuses: DashMap<DocumentId, SyncState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<SyncEvent>>>,
}

/// Best-effort replication of persisted drafts to a [`RemoteStore`].
///
/// Each document id has at most one queued entry and at most one worker
/// task. Queuing a newer draft replaces the waiting entry, and the worker
/// finishes its current entry before taking the next, so remote writes for
/// one document are never reordered. Failures end up in [`SyncEvent`]s and
/// [`SyncState`], never in the caller's save path.
#[derive(Clone)]
pub struct SyncPipeline {
    inner: Arc<Inner>,
}

impl SyncPipeline {
    /// Pipeline without a local store; successful syncs are not recorded
    /// locally.
    pub fn new(remote: Arc<dyn RemoteStore>, config: SyncConfig) -> Self {
        Self::build(remote, None, config)
    }

    /// Pipeline that flags drafts synced in `local` and can re-queue
    /// unsynced drafts after a restart.
    pub fn with_local_store(
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn DraftStore>,
        config: SyncConfig,
    ) -> Self {
        Self::build(remote, Some(local), config)
    }

    fn build(
        remote: Arc<dyn RemoteStore>,
        local: Option<Arc<dyn DraftStore>>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                local,
                breaker: CircuitBreaker::from_config(&config),
                config,
                queues: DashMap::new(),
                statuses: DashMap::new(),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Last known sync status of a document, `None` if never queued.
    pub fn status(&self, document_id: &DocumentId) -> Option<SyncState> {
        self.inner
            .statuses
            .get(document_id)
            .map(|status| *status.value())
    }

    /// Queue `draft` for remote persistence and return immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn queue_sync(&self, draft: Draft) {
        let document_id = draft.document_id.clone();
        let slot = self.inner.slot(&document_id);

        let start_worker = {
            let mut queue = lock(&slot.queue);
            let mut entry = SyncQueueEntry::new(draft);
            entry.sequence = queue.issue();
            if queue.pending.replace(entry).is_some() {
                tracing::debug!("Replaced queued sync for {document_id}");
            }
            !std::mem::replace(&mut queue.running, true)
        };
        self.inner.set_status(&document_id, SyncState::Syncing);

        if start_worker {
            self.inner.spawn_worker(document_id);
        }
    }

    /// Feed every `DraftPersisted` event into [`Self::queue_sync`].
    ///
    /// The task ends when the autosave engine is dropped.
    pub fn attach(&self, mut events: mpsc::UnboundedReceiver<AutosaveEvent>) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    AutosaveEvent::DraftPersisted(draft) => pipeline.queue_sync(draft),
                }
            }
            tracing::debug!("Autosave event stream closed, sync subscriber stopped");
        })
    }

    /// Run one draft through the remote write path now and wait for the
    /// result.
    ///
    /// A write already in flight for the same document finishes first, and
    /// an older queued draft is dropped instead of being written afterwards.
    /// An open circuit yields [`SyncOutcome::Deferred`] without any network
    /// call; the draft is then parked in the queue and retried after the
    /// cooldown.
    pub async fn sync_to_remote(&self, draft: &Draft) -> Result<SyncOutcome, SyncError> {
        let document_id = draft.document_id.clone();
        if document_id.is_blank() {
            return Err(Error::InvalidInput("document id must not be empty".into()).into());
        }
        let slot = self.inner.slot(&document_id);
        let mut entry = SyncQueueEntry::new(draft.clone());
        entry.sequence = lock(&slot.queue).issue();

        let _writer = slot.writer.lock().await;
        let result = self.inner.process(&mut entry).await;

        let start_worker = {
            let mut queue = lock(&slot.queue);
            let newer_queued = queue.has_newer_than(entry.sequence);
            match &result {
                Ok(SyncOutcome::Deferred { retry_after }) if !newer_queued => {
                    entry.next_attempt_at = Some(Instant::now() + *retry_after);
                    queue.pending = Some(entry);
                    !std::mem::replace(&mut queue.running, true)
                }
                _ => {
                    if !newer_queued && queue.pending.take().is_some() {
                        tracing::debug!("Dropped queued sync of {document_id}, superseded");
                    }
                    false
                }
            }
        };
        if start_worker {
            self.inner.spawn_worker(document_id);
        }
        result
    }

    /// Queue every local draft the remote has not acknowledged.
    pub async fn requeue_unsynced(&self) -> Result<usize, SyncError> {
        let Some(local) = &self.inner.local else {
            return Ok(0);
        };
        let drafts = local.list_unsynced().await?;
        let count = drafts.len();
        for draft in drafts {
            self.queue_sync(draft);
        }
        if count > 0 {
            tracing::info!("Re-queued {count} unsynced drafts");
        }
        Ok(count)
    }

    /// Read a document back from the remote store, reassembling chunks and
    /// verifying the content hash.
    pub async fn fetch_remote(&self, document_id: &DocumentId) -> Result<Option<Draft>, SyncError> {
        let fetch_error = |source: RemoteError| SyncError::Fetch {
            document_id: document_id.clone(),
            source,
        };
        let remote = &self.inner.remote;

        let Some(document) = remote
            .fetch_document(document_id)
            .await
            .map_err(fetch_error)?
        else {
            return Ok(None);
        };

        let content = match document.content {
            Some(content) => content,
            None => {
                let chunks = remote
                    .fetch_chunks(document_id, &document.content_hash)
                    .await
                    .map_err(fetch_error)?;
                reassemble(chunks, document.chunk_count, &document.content_hash)
                    .map_err(fetch_error)?
            }
        };

        if hash_content(&content) != document.content_hash {
            return Err(fetch_error(RemoteError::Fatal(
                "content does not match its hash".into(),
            )));
        }

        Ok(Some(Draft {
            document_id: document.document_id,
            last_content_hash: document.content_hash,
            content,
            metadata: document.metadata,
            updated_at: document.updated_at,
            synced: true,
        }))
    }
}

impl Inner {
    fn slot(&self, document_id: &DocumentId) -> Arc<DocumentSlot> {
        Arc::clone(&self.queues.entry(document_id.clone()).or_default())
    }

    fn spawn_worker(self: &Arc<Self>, document_id: DocumentId) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.drain(document_id).await });
    }

    fn set_status(&self, document_id: &DocumentId, status: SyncState) {
        self.statuses.insert(document_id.clone(), status);
    }

    fn publish(&self, event: &SyncEvent) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Worker loop for one document: take the queued entry, run it to
    /// completion, repeat until the queue is empty.
    ///
    /// Entries are taken and parked only while holding the document's
    /// writer lock, so a direct sync can never interleave with them.
    async fn drain(self: Arc<Self>, document_id: DocumentId) {
        let slot = self.slot(&document_id);
        loop {
            let writer = slot.writer.lock().await;
            let step = lock(&slot.queue).next_step();
            match step {
                Step::Idle => return,
                Step::Wait(due) => {
                    drop(writer);
                    tokio::time::sleep_until(due).await;
                }
                Step::Run(mut entry) => {
                    // Errors were already published by `process`.
                    let outcome = self.process(&mut entry).await;
                    if let Ok(SyncOutcome::Deferred { retry_after }) = outcome {
                        entry.next_attempt_at = Some(Instant::now() + retry_after);
                        let mut queue = lock(&slot.queue);
                        // A newer draft queued meanwhile supersedes the parked one.
                        if queue.pending.is_none() {
                            queue.pending = Some(entry);
                        }
                    }
                    drop(writer);
                }
            }
        }
    }

    /// Attempt an entry, then record the outcome in status and events.
    async fn process(&self, entry: &mut SyncQueueEntry) -> Result<SyncOutcome, SyncError> {
        let document_id = entry.draft.document_id.clone();
        self.set_status(&document_id, SyncState::Syncing);

        let result = self.run_attempts(entry).await;
        match &result {
            Ok(SyncOutcome::Synced) => {
                self.set_status(&document_id, SyncState::Synced);
                self.publish(&SyncEvent::Synced {
                    document_id,
                    content_hash: entry.draft.last_content_hash.clone(),
                });
            }
            Ok(SyncOutcome::Deferred { retry_after }) => {
                tracing::info!("Sync of {document_id} deferred for {retry_after:?}: circuit open");
                self.set_status(&document_id, SyncState::Offline);
                self.publish(&SyncEvent::Deferred {
                    document_id,
                    retry_after: *retry_after,
                });
            }
            Err(error) => {
                tracing::warn!("Dropping sync of {document_id}: {error}");
                self.set_status(&document_id, SyncState::Error);
                self.publish(&SyncEvent::Failed {
                    document_id,
                    reason: error.to_string(),
                });
            }
        }
        result
    }

    /// Remote attempts for one entry, capped at `max_retries` in total.
    async fn run_attempts(&self, entry: &mut SyncQueueEntry) -> Result<SyncOutcome, SyncError> {
        let max_attempts = self.config.max_retries.max(1);
        loop {
            if let Admission::Defer { retry_after } = self.breaker.check().await {
                return Ok(SyncOutcome::Deferred { retry_after });
            }

            entry.attempts += 1;
            entry.next_attempt_at = None;
            let document_id = &entry.draft.document_id;
            tracing::debug!("Sync attempt {} for {document_id}", entry.attempts);

            match self.push(&entry.draft).await {
                Ok(()) => {
                    self.breaker.record_success().await;
                    self.acknowledge(&entry.draft).await;
                    return Ok(SyncOutcome::Synced);
                }
                Err(RemoteError::Fatal(message)) => {
                    // A rejection still proves the remote is reachable.
                    self.breaker.record_success().await;
                    return Err(SyncError::Fatal {
                        document_id: document_id.clone(),
                        message,
                    });
                }
                Err(error) => {
                    self.breaker.record_failure().await;
                    if entry.attempts >= max_attempts {
                        return Err(SyncError::RetriesExhausted {
                            document_id: document_id.clone(),
                            attempts: entry.attempts,
                            last_error: error,
                        });
                    }

                    let delay = backoff_delay(self.config.base_delay(), entry.attempts - 1);
                    tracing::warn!(
                        "Sync attempt {} for {document_id} failed ({error}), retrying in {delay:?}",
                        entry.attempts
                    );
                    entry.next_attempt_at = Some(Instant::now() + delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One remote write: chunks first, then the parent record pointing at them.
    async fn push(&self, draft: &Draft) -> Result<(), RemoteError> {
        let chunk_size = self.config.chunk_size_bytes;
        let (content, chunk_count) = if draft.content.len() > chunk_size {
            let chunks = build_chunks(&draft.content, &draft.last_content_hash, chunk_size);
            for chunk in &chunks {
                self.remote.append_chunk(&draft.document_id, chunk).await?;
            }
            tracing::debug!(
                "Wrote {} chunks for {} ({} bytes)",
                chunks.len(),
                draft.document_id,
                draft.content_len()
            );
            (None, chunks.len())
        } else {
            (Some(draft.content.clone()), 0)
        };

        self.remote
            .upsert_document(&RemoteDocument {
                document_id: draft.document_id.clone(),
                content,
                metadata: draft.metadata.clone(),
                content_hash: draft.last_content_hash.clone(),
                chunk_count,
                updated_at: draft.updated_at,
            })
            .await
    }

    async fn acknowledge(&self, draft: &Draft) {
        let Some(local) = &self.local else {
            return;
        };
        match local
            .mark_synced(&draft.document_id, &draft.last_content_hash)
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::debug!(
                "{} changed locally since this sync, leaving it unsynced",
                draft.document_id
            ),
            // The draft stays unsynced and is picked up by the next requeue.
            Err(error) => tracing::warn!(
                "Synced {} but failed to record it locally: {error}",
                draft.document_id
            ),
        }
    }
}

/// `base * 2^retry`, saturating.
fn backoff_delay(base: Duration, retry: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retry))
}

fn lock(queue: &Mutex<DocumentQueue>) -> MutexGuard<'_, DocumentQueue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}
