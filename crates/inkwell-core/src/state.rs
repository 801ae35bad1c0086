//! Shared sync status type.

use serde::{Deserialize, Serialize};

/// Per-document sync status, shown as a non-blocking indicator next to the
/// editor. None of these states ever means the local save failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Waiting for the remote store to come back (circuit open)
    Offline,
    /// Queued or in flight
    #[default]
    Syncing,
    Synced,
    /// Retries exhausted or rejected; the local copy is still intact
    Error,
}

impl SyncState {
    /// Whether a remote write is still outstanding.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Offline | Self::Syncing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_states() {
        assert!(SyncState::Offline.is_pending());
        assert!(SyncState::Syncing.is_pending());
        assert!(!SyncState::Synced.is_pending());
        assert!(!SyncState::Error.is_pending());
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SyncState::Offline).unwrap(),
            "\"offline\""
        );
    }
}
