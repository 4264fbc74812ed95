//! Shared cross-platform state types.

use serde::Serialize;

use crate::models::QueueStatistics;

/// Unified sync state for status displays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Offline,
    Syncing,
    Synced,
    Pending,
    Error,
}

impl SyncState {
    /// Derive the state from queue statistics.
    ///
    /// Exhausted entries need manual attention and win over everything else.
    pub const fn from_statistics(stats: &QueueStatistics, online: bool) -> Self {
        if stats.exhausted_count > 0 {
            Self::Error
        } else if !online {
            Self::Offline
        } else if stats.processing_count > 0 {
            Self::Syncing
        } else if stats.pending_count > 0 || stats.failed_count > 0 {
            Self::Pending
        } else {
            Self::Synced
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Pending => "pending",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
