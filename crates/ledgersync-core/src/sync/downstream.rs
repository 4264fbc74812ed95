//! Delta application (backend -> local) and first-time hydration

use crate::db::{
    finish_transaction, EntityRepository, SyncMetadataRepository, SyncQueueRepository,
    TenantDatabase,
};
use crate::error::{Error, Result};
use crate::models::{EntityType, SyncableEntity};

use super::merge::apply_batch;
use super::{BackendError, DownstreamDelta, DownstreamReport, MergeStats};

/// Checkpoint used for collections that were never synced
pub const EPOCH: &str = "1970-01-01T00:00:00.000Z";

/// Checkpoint to fetch the next delta from
pub async fn since(db: &TenantDatabase, entity_type: EntityType) -> Result<String> {
    Ok(db
        .metadata()
        .get_checkpoint(entity_type)
        .await?
        .unwrap_or_else(|| EPOCH.to_string()))
}

/// Apply one delta: deletions, then LWW upserts, then the new checkpoint.
///
/// All three steps share a transaction, so a failure leaves the previous
/// checkpoint in place and the same window is fetched again next time.
pub async fn apply_delta(
    db: &TenantDatabase,
    entity_type: EntityType,
    delta: &DownstreamDelta,
) -> Result<DownstreamReport> {
    let checkpoint = delta.new_last_synced_timestamp.trim();
    if checkpoint.is_empty() {
        return Err(Error::Backend(BackendError::InvalidPayload(format!(
            "{entity_type} delta is missing new_last_synced_timestamp"
        ))));
    }

    let conn = db.connection();
    conn.execute("BEGIN TRANSACTION", ()).await?;
    let outcome = apply_delta_inner(db, entity_type, delta, checkpoint).await;
    let (deleted, merge) = finish_transaction(conn, outcome).await?;

    tracing::info!(
        tenant_id = db.tenant_id(),
        entity_type = %entity_type,
        deleted,
        inserted = merge.inserted,
        updated = merge.updated,
        skipped = merge.skipped,
        excluded = merge.excluded,
        "Applied downstream delta"
    );

    Ok(DownstreamReport {
        entity_type,
        deleted,
        merge,
        checkpoint: checkpoint.to_string(),
    })
}

async fn apply_delta_inner(
    db: &TenantDatabase,
    entity_type: EntityType,
    delta: &DownstreamDelta,
    checkpoint: &str,
) -> Result<(u64, MergeStats)> {
    let entities = db.entities();
    let mut deleted = 0;
    for id in &delta.deleted_ids {
        if entities.delete(entity_type, id).await? {
            deleted += 1;
        }
    }

    let merge = merge_remote(db, entity_type, &delta.new_or_updated).await?;
    db.metadata().set_checkpoint(entity_type, checkpoint).await?;
    Ok((deleted, merge))
}

/// Hydrate a collection from its full remote snapshot.
///
/// `checkpoint` is the instant taken before the snapshot was requested, so
/// changes racing the fetch are picked up by the next delta.
pub async fn apply_initial(
    db: &TenantDatabase,
    entity_type: EntityType,
    records: &[SyncableEntity],
    checkpoint: &str,
) -> Result<MergeStats> {
    let conn = db.connection();
    conn.execute("BEGIN TRANSACTION", ()).await?;
    let outcome = apply_initial_inner(db, entity_type, records, checkpoint).await;
    let merge = finish_transaction(conn, outcome).await?;

    tracing::info!(
        tenant_id = db.tenant_id(),
        entity_type = %entity_type,
        inserted = merge.inserted,
        excluded = merge.excluded,
        "Completed initial sync for collection"
    );
    Ok(merge)
}

async fn apply_initial_inner(
    db: &TenantDatabase,
    entity_type: EntityType,
    records: &[SyncableEntity],
    checkpoint: &str,
) -> Result<MergeStats> {
    let merge = merge_remote(db, entity_type, records).await?;
    db.metadata().set_checkpoint(entity_type, checkpoint).await?;
    Ok(merge)
}

async fn merge_remote(
    db: &TenantDatabase,
    entity_type: EntityType,
    records: &[SyncableEntity],
) -> Result<MergeStats> {
    if records.is_empty() {
        return Ok(MergeStats::default());
    }
    let mut pending_deletes = db.queue().pending_deletes(db.tenant_id()).await?;
    let excluded = pending_deletes.remove(&entity_type).unwrap_or_default();
    let (stats, _) = apply_batch(db, entity_type, records, &excluded).await?;
    Ok(stats)
}
