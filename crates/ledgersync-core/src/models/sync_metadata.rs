//! Downstream checkpoint model

use serde::{Deserialize, Serialize};

use super::EntityType;

/// Per-collection downstream checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    pub entity_type: EntityType,
    /// `None` means the collection was never hydrated
    pub last_synced_at: Option<String>,
}

impl SyncMetadata {
    /// Whether initial sync still has to run for this collection
    #[must_use]
    pub const fn needs_initial_sync(&self) -> bool {
        self.last_synced_at.is_none()
    }
}
