//! Sync queue (outbox) model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::EntityType;
use crate::error::{Error, Result};
use crate::util::timestamp_now;

/// Attempts after which an entry stops being retried automatically
pub const MAX_SYNC_ATTEMPTS: u32 = 5;

/// Kind of local mutation waiting for upstream delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!(
                "unknown operation type: {other}"
            ))),
        }
    }
}

/// Delivery status of a queue entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Synced,
    Failed,
}

impl QueueStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidInput(format!("unknown queue status: {other}"))),
        }
    }
}

/// One pending local mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    /// Client-generated identifier (UUID v7, time-sortable)
    pub id: String,
    pub tenant_id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation_type: OperationType,
    /// Record snapshot for create/update, `{"id": ...}` for delete
    pub payload: Value,
    pub status: QueueStatus,
    pub attempts: u32,
    /// Creation time, the ordering key within a tenant
    pub timestamp: String,
    pub last_attempt: Option<String>,
    pub error: Option<String>,
}

impl SyncQueueEntry {
    /// Create a fresh pending entry stamped with the current time
    #[must_use]
    pub fn new(
        tenant_id: impl Into<String>,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        operation_type: OperationType,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            tenant_id: tenant_id.into(),
            entity_type,
            entity_id: entity_id.into(),
            operation_type,
            payload,
            status: QueueStatus::Pending,
            attempts: 0,
            timestamp: timestamp_now(),
            last_attempt: None,
            error: None,
        }
    }
}

/// Aggregate view of one tenant's queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub pending_count: u64,
    pub processing_count: u64,
    pub failed_count: u64,
    /// Entries at or above the attempt cap, whatever their status
    pub exhausted_count: u64,
    pub oldest_pending: Option<String>,
    /// Error of the most recently attempted entry that has one
    pub last_error_message: Option<String>,
}
