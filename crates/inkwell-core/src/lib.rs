//! inkwell-core - Core library for Inkwell
//!
//! This crate keeps in-progress writing safe, synchronized, and reversible:
//! an autosave engine that debounces edits into durable local writes, a sync
//! pipeline that pushes those writes to a remote store despite network
//! failures, and a bounded undo/redo history built on compact deltas.
//!
//! ```text
//! edit ─► AutosaveEngine ─► LocalStore (libSQL) ─► DraftPersisted ─► SyncPipeline ─► RemoteStore
//!                                                                        │
//!                                                                  CircuitBreaker
//!
//! checkpoint ─► HistoryEngine (delta codec) ─► undo / redo
//! ```

pub mod autosave;
pub mod config;
pub mod db;
pub mod delta;
pub mod error;
pub mod hash;
pub mod history;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use autosave::{AutosaveEngine, AutosaveEvent};
pub use config::{AutosaveConfig, Config, HistoryConfig, SyncConfig};
pub use delta::{apply_delta, calculate_delta, DeltaRecord};
pub use error::{Error, Result};
pub use hash::{hash_content, ContentHash};
pub use history::{HistoryEngine, SnapshotOptions, MAX_HISTORY_LEN};
pub use models::{DocumentId, Draft, Metadata, Snapshot, SnapshotKind};
pub use services::{DraftStore, HistoryStore, LocalStore};
pub use state::SyncState;
pub use sync::{
    CircuitBreaker, CircuitState, HttpRemoteStore, MemoryRemoteStore, RemoteError, RemoteStore,
    SyncError, SyncEvent, SyncOutcome, SyncPipeline,
};
