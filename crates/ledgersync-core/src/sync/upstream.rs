//! Outbox drain (local -> backend)
//!
//! A pass claims a chunk of eligible entries under a pass-specific attempt
//! stamp, sends it, then reconciles the answer against rows that still carry
//! that stamp. Rows reclaimed by maintenance while the request was in flight
//! no longer match, so a late answer cannot touch them.

use std::collections::HashSet;

use crate::db::{SyncQueueRepository, TenantDatabase};
use crate::error::Result;
use crate::models::{QueueStatus, SyncQueueEntry};
use crate::util::timestamp_now;

use super::{UpstreamReport, UpstreamResponse};

/// Message stored for entries the backend neither applied nor explained
pub const NOT_ACKNOWLEDGED: &str = "not acknowledged by backend";

/// A chunk of entries owned by one send attempt
#[derive(Debug, Clone)]
pub struct ClaimedBatch {
    pub stamp: String,
    pub entries: Vec<SyncQueueEntry>,
}

impl ClaimedBatch {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Entries eligible for upstream delivery, oldest first
pub async fn eligible_entries(db: &TenantDatabase, max_attempts: u32) -> Result<Vec<SyncQueueEntry>> {
    db.queue()
        .with_max_attempts(max_attempts)
        .list_retryable(db.tenant_id())
        .await
}

/// Mark `candidates` as `processing` under a fresh stamp.
///
/// Entries claimed elsewhere since they were read are dropped from the batch.
pub async fn claim(
    db: &TenantDatabase,
    candidates: Vec<SyncQueueEntry>,
    max_attempts: u32,
) -> Result<ClaimedBatch> {
    claim_with_stamp(db, candidates, max_attempts, timestamp_now()).await
}

pub(crate) async fn claim_with_stamp(
    db: &TenantDatabase,
    candidates: Vec<SyncQueueEntry>,
    max_attempts: u32,
    stamp: String,
) -> Result<ClaimedBatch> {
    let ids: Vec<String> = candidates.iter().map(|entry| entry.id.clone()).collect();
    let claimed: HashSet<String> = db
        .queue()
        .with_max_attempts(max_attempts)
        .mark_processing(&ids, &stamp)
        .await?
        .into_iter()
        .collect();

    let entries = candidates
        .into_iter()
        .filter(|entry| claimed.contains(&entry.id))
        .map(|mut entry| {
            entry.status = QueueStatus::Processing;
            entry.attempts = (entry.attempts + 1).min(max_attempts);
            entry.last_attempt = Some(stamp.clone());
            entry
        })
        .collect();

    Ok(ClaimedBatch { stamp, entries })
}

/// Apply the backend's answer to a claimed batch.
///
/// Acknowledged entries are removed; every other entry goes back to the
/// queue with the backend's message for its entity, if any.
pub async fn reconcile(
    db: &TenantDatabase,
    batch: &ClaimedBatch,
    response: &UpstreamResponse,
    max_attempts: u32,
) -> Result<UpstreamReport> {
    let queue = db.queue().with_max_attempts(max_attempts);
    let processed: HashSet<&str> = response.processed_ids.iter().map(String::as_str).collect();

    for error in &response.errors {
        tracing::warn!(
            tenant_id = db.tenant_id(),
            entity_id = %error.entity_id,
            "Backend rejected change: {}",
            error.message
        );
    }

    let (acked, rejected): (Vec<&SyncQueueEntry>, Vec<&SyncQueueEntry>) = batch
        .entries
        .iter()
        .partition(|entry| processed.contains(entry.id.as_str()));

    let acked_ids: Vec<String> = acked.iter().map(|entry| entry.id.clone()).collect();
    let acknowledged = queue.acknowledge(&acked_ids, &batch.stamp).await?;
    if acknowledged < acked_ids.len() as u64 {
        tracing::debug!(
            tenant_id = db.tenant_id(),
            discarded = acked_ids.len() as u64 - acknowledged,
            "Discarded late acknowledgements for reclaimed entries"
        );
    }

    let mut report = UpstreamReport {
        submitted: batch.entries.len() as u64,
        acknowledged,
        ..UpstreamReport::default()
    };

    for entry in rejected {
        let message = response.error_for(&entry.entity_id).unwrap_or(NOT_ACKNOWLEDGED);
        if queue.release_failed(&entry.id, &batch.stamp, message).await? {
            report.failed += 1;
            if entry.attempts >= max_attempts {
                report.exhausted += 1;
            }
        } else {
            tracing::debug!(entry_id = %entry.id, "Discarded late failure for reclaimed entry");
        }
    }

    Ok(report)
}

/// Return a whole batch to the queue after a transport failure
pub async fn release_batch(
    db: &TenantDatabase,
    batch: &ClaimedBatch,
    message: &str,
    max_attempts: u32,
) -> Result<UpstreamReport> {
    let queue = db.queue().with_max_attempts(max_attempts);
    let mut report = UpstreamReport {
        submitted: batch.entries.len() as u64,
        ..UpstreamReport::default()
    };

    for entry in &batch.entries {
        if queue.release_failed(&entry.id, &batch.stamp, message).await? {
            report.failed += 1;
            if entry.attempts >= max_attempts {
                report.exhausted += 1;
            }
        }
    }

    Ok(report)
}
