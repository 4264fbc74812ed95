//! Remote backend contract

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{deserialize_id, deserialize_ids, EntityType, SyncQueueEntry, SyncableEntity};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Invalid backend configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Backend HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Backend API error: {0}")]
    Api(String),
    #[error("Invalid backend payload: {0}")]
    InvalidPayload(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Per-item rejection reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamItemError {
    #[serde(deserialize_with = "deserialize_id")]
    pub entity_id: String,
    #[serde(default)]
    pub message: String,
}

/// Backend answer to an upstream batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamResponse {
    pub success: bool,
    /// Queue entry ids the backend applied
    #[serde(default, deserialize_with = "deserialize_ids")]
    pub processed_ids: Vec<String>,
    #[serde(default)]
    pub errors: Vec<UpstreamItemError>,
}

impl UpstreamResponse {
    /// Acknowledge every entry of `batch`
    pub fn acknowledge_all(batch: &[SyncQueueEntry]) -> Self {
        Self {
            success: true,
            processed_ids: batch.iter().map(|entry| entry.id.clone()).collect(),
            errors: Vec::new(),
        }
    }

    /// Backend message for `entity_id`, if it reported one
    pub fn error_for(&self, entity_id: &str) -> Option<&str> {
        self.errors
            .iter()
            .find(|error| error.entity_id == entity_id)
            .map(|error| error.message.as_str())
    }
}

/// Remote changes of one collection since a checkpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownstreamDelta {
    #[serde(default)]
    pub new_or_updated: Vec<SyncableEntity>,
    #[serde(default, deserialize_with = "deserialize_ids")]
    pub deleted_ids: Vec<String>,
    #[serde(default)]
    pub new_last_synced_timestamp: String,
}

/// Transport used by the sync algorithms.
///
/// Implementations must be cheap to share across tasks; the sync worker
/// drives them from a spawned tokio task.
pub trait SyncBackend: Send + Sync {
    /// Submit a batch of queued local mutations
    fn upstream(
        &self,
        tenant_id: &str,
        batch: &[SyncQueueEntry],
    ) -> impl Future<Output = BackendResult<UpstreamResponse>> + Send;

    /// Changes to `entity_type` since `since` (RFC 3339)
    fn downstream(
        &self,
        tenant_id: &str,
        entity_type: EntityType,
        since: &str,
    ) -> impl Future<Output = BackendResult<DownstreamDelta>> + Send;

    /// Full remote collection, for first-time hydration
    fn initial(
        &self,
        tenant_id: &str,
        entity_type: EntityType,
    ) -> impl Future<Output = BackendResult<Vec<SyncableEntity>>> + Send;
}
