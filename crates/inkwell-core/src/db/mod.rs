//! Database layer for Inkwell's local durable store

mod connection;
mod draft_repository;
mod history_repository;
mod migrations;

pub use connection::Database;
pub use draft_repository::{DraftRepository, LibSqlDraftRepository};
pub use history_repository::{HistoryRepository, LibSqlHistoryRepository};
