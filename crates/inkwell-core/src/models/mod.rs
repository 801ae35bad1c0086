//! Data models for Inkwell

mod draft;
mod snapshot;

pub use draft::{DocumentId, Draft, Metadata};
pub use snapshot::{Snapshot, SnapshotKind};
