//! Sync conflict model

use serde::{Deserialize, Serialize};

use super::EntityType;

/// Recorded sync conflict resolved by strategy (e.g., LWW)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Collection of the record involved
    pub entity_type: EntityType,
    /// Record involved in the conflict
    pub entity_id: String,
    /// Local record's stamp, which won
    pub local_updated_at: String,
    /// Incoming record's stamp that was rejected
    pub incoming_updated_at: String,
    /// Resolution time
    pub resolved_at: String,
    /// Resolution strategy name
    pub strategy: String,
}
