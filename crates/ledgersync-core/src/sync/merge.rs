//! Last-write-wins batch merge.
//!
//! Every path that lands foreign records in the entity store (downstream
//! deltas, initial hydration, bulk imports) goes through [`decide`], so the
//! conflict policy lives in exactly one place.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::db::{
    finish_transaction, EntityRepository, SyncMetadataRepository, SyncQueueRepository,
    TenantDatabase,
};
use crate::error::Result;
use crate::models::{compare_timestamps, EntityType, OperationType, SyncQueueEntry, SyncableEntity};

use super::MergeStats;

/// What to do with one incoming record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// No local counterpart: store it
    Insert,
    /// Incoming is strictly newer: overwrite local
    Replace,
    /// Local wins; `conflict` when the incoming copy was strictly older
    KeepLocal { conflict: bool },
    /// A local delete is still in flight for this id
    Exclude,
}

/// LWW decision for one incoming record against its local counterpart.
///
/// Equal stamps keep the local copy.
pub fn decide(
    local: Option<&SyncableEntity>,
    incoming: &SyncableEntity,
    pending_delete: bool,
) -> MergeDecision {
    if pending_delete {
        return MergeDecision::Exclude;
    }

    let Some(local) = local else {
        return MergeDecision::Insert;
    };

    match compare_timestamps(&incoming.updated_at, &local.updated_at) {
        Ordering::Greater => MergeDecision::Replace,
        Ordering::Equal => MergeDecision::KeepLocal { conflict: false },
        Ordering::Less => MergeDecision::KeepLocal { conflict: true },
    }
}

/// Merge `incoming` into the store without opening a transaction.
///
/// Returns the stats plus the records that changed local state, tagged with
/// the operation that describes the change.
pub(crate) async fn apply_batch(
    db: &TenantDatabase,
    entity_type: EntityType,
    incoming: &[SyncableEntity],
    excluded: &HashSet<String>,
) -> Result<(MergeStats, Vec<(OperationType, SyncableEntity)>)> {
    let entities = db.entities();
    let metadata = db.metadata();

    let ids: Vec<String> = incoming.iter().map(|record| record.id.clone()).collect();
    let mut local = entities.get_many(entity_type, &ids).await?;
    let mut stats = MergeStats::default();
    let mut changed = Vec::new();

    for record in incoming {
        let decision = decide(
            local.get(&record.id),
            record,
            excluded.contains(&record.id),
        );

        match decision {
            MergeDecision::Exclude => {
                stats.excluded += 1;
                tracing::debug!(
                    entity_type = %entity_type,
                    entity_id = %record.id,
                    "Skipping record with a pending local delete"
                );
            }
            MergeDecision::KeepLocal { conflict } => {
                stats.skipped += 1;
                if conflict {
                    if let Some(current) = local.get(&record.id) {
                        metadata
                            .record_conflict(
                                entity_type,
                                &record.id,
                                &current.updated_at,
                                &record.updated_at,
                            )
                            .await?;
                    }
                }
            }
            MergeDecision::Insert | MergeDecision::Replace => {
                entities.put(entity_type, record).await?;
                let operation = if decision == MergeDecision::Insert {
                    stats.inserted += 1;
                    OperationType::Create
                } else {
                    stats.updated += 1;
                    OperationType::Update
                };
                local.insert(record.id.clone(), record.clone());
                changed.push((operation, record.clone()));
            }
        }
    }

    Ok((stats, changed))
}

/// Merge a batch of foreign records in one transaction, bypassing the outbox
pub async fn merge_batch(
    db: &TenantDatabase,
    entity_type: EntityType,
    incoming: &[SyncableEntity],
    excluded: &HashSet<String>,
) -> Result<MergeStats> {
    let conn = db.connection();
    conn.execute("BEGIN TRANSACTION", ()).await?;
    let outcome = apply_batch(db, entity_type, incoming, excluded)
        .await
        .map(|(stats, _)| stats);
    finish_transaction(conn, outcome).await
}

/// Merge locally sourced records and enqueue every change they made.
///
/// Used for bulk imports: the LWW rules are the same as for remote data, but
/// the resulting writes are new local intent and must reach the backend.
/// Records with a local delete still in flight are excluded.
pub async fn import_batch(
    db: &TenantDatabase,
    entity_type: EntityType,
    incoming: &[SyncableEntity],
) -> Result<MergeStats> {
    let mut pending_deletes = db.queue().pending_deletes(db.tenant_id()).await?;
    let excluded = pending_deletes.remove(&entity_type).unwrap_or_default();

    let conn = db.connection();
    conn.execute("BEGIN TRANSACTION", ()).await?;
    let outcome = import_inner(db, entity_type, incoming, &excluded).await;
    finish_transaction(conn, outcome).await
}

async fn import_inner(
    db: &TenantDatabase,
    entity_type: EntityType,
    incoming: &[SyncableEntity],
    excluded: &HashSet<String>,
) -> Result<MergeStats> {
    let (stats, changed) = apply_batch(db, entity_type, incoming, excluded).await?;
    let queue = db.queue();
    for (operation, record) in changed {
        let entry = SyncQueueEntry::new(
            db.tenant_id(),
            entity_type,
            record.id.clone(),
            operation,
            record.to_value()?,
        );
        queue.enqueue(&entry).await?;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const TENANT: &str = "tenant-a";

    fn record(id: &str, updated_at: &str, name: &str) -> SyncableEntity {
        SyncableEntity::from_value(json!({"id": id, "updated_at": updated_at, "name": name}))
            .unwrap()
    }

    async fn setup() -> TenantDatabase {
        TenantDatabase::open_in_memory(TENANT).await.unwrap()
    }

    #[test]
    fn decide_follows_last_write_wins() {
        let local = record("a", "2024-01-02T00:00:00Z", "local");
        let newer = record("a", "2024-01-03T00:00:00Z", "remote");
        let older = record("a", "2024-01-01T00:00:00Z", "remote");
        let same = record("a", "2024-01-02T00:00:00.000Z", "remote");

        assert_eq!(decide(None, &newer, false), MergeDecision::Insert);
        assert_eq!(decide(Some(&local), &newer, false), MergeDecision::Replace);
        assert_eq!(
            decide(Some(&local), &older, false),
            MergeDecision::KeepLocal { conflict: true }
        );
        assert_eq!(
            decide(Some(&local), &same, false),
            MergeDecision::KeepLocal { conflict: false }
        );
        assert_eq!(decide(None, &newer, true), MergeDecision::Exclude);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_merge_batch_counts_each_outcome() {
        let db = setup().await;
        db.entities()
            .put_many(
                EntityType::Account,
                &[
                    record("acc-1", "2024-01-02T00:00:00Z", "local-1"),
                    record("acc-2", "2024-01-02T00:00:00Z", "local-2"),
                ],
            )
            .await
            .unwrap();

        let incoming = [
            record("acc-1", "2024-01-03T00:00:00Z", "remote-1"),
            record("acc-2", "2024-01-01T00:00:00Z", "remote-2"),
            record("acc-3", "2024-01-01T00:00:00Z", "remote-3"),
            record("acc-4", "2024-01-01T00:00:00Z", "remote-4"),
        ];
        let excluded = HashSet::from(["acc-4".to_string()]);

        let stats = merge_batch(&db, EntityType::Account, &incoming, &excluded)
            .await
            .unwrap();

        assert_eq!(
            stats,
            MergeStats {
                inserted: 1,
                updated: 1,
                skipped: 1,
                excluded: 1,
            }
        );
        let acc1 = db
            .entities()
            .get(EntityType::Account, "acc-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(acc1.fields["name"], json!("remote-1"));
        let acc2 = db
            .entities()
            .get(EntityType::Account, "acc-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(acc2.fields["name"], json!("local-2"));
        assert!(db
            .entities()
            .get(EntityType::Account, "acc-4")
            .await
            .unwrap()
            .is_none());
        assert!(db.queue().list_all(TENANT).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_merge_logs_only_strictly_older_incoming() {
        let db = setup().await;
        db.entities()
            .put(
                EntityType::Category,
                &record("cat-1", "2024-01-02T00:00:00Z", "local"),
            )
            .await
            .unwrap();

        let equal = [record("cat-1", "2024-01-02T00:00:00Z", "remote")];
        merge_batch(&db, EntityType::Category, &equal, &HashSet::new())
            .await
            .unwrap();
        assert!(db.metadata().list_conflicts(10).await.unwrap().is_empty());

        let older = [record("cat-1", "2024-01-01T00:00:00Z", "remote")];
        merge_batch(&db, EntityType::Category, &older, &HashSet::new())
            .await
            .unwrap();
        let conflicts = db.metadata().list_conflicts(10).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].local_updated_at, "2024-01-02T00:00:00Z");
        assert_eq!(conflicts[0].incoming_updated_at, "2024-01-01T00:00:00Z");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_merge_is_idempotent() {
        let db = setup().await;
        let incoming = [
            record("tx-1", "2024-01-01T00:00:00Z", "coffee"),
            record("tx-2", "2024-01-01T00:00:00Z", "rent"),
        ];

        let first = merge_batch(&db, EntityType::Transaction, &incoming, &HashSet::new())
            .await
            .unwrap();
        let after_first = db.entities().list(EntityType::Transaction).await.unwrap();
        let second = merge_batch(&db, EntityType::Transaction, &incoming, &HashSet::new())
            .await
            .unwrap();
        let after_second = db.entities().list(EntityType::Transaction).await.unwrap();

        assert_eq!(first.inserted, 2);
        assert_eq!(second.skipped, 2);
        assert_eq!(after_first, after_second);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_duplicate_ids_in_one_batch_resolve_to_newest() {
        let db = setup().await;
        let incoming = [
            record("acc-1", "2024-01-02T00:00:00Z", "newer"),
            record("acc-1", "2024-01-01T00:00:00Z", "older"),
        ];

        merge_batch(&db, EntityType::Account, &incoming, &HashSet::new())
            .await
            .unwrap();

        let stored = db
            .entities()
            .get(EntityType::Account, "acc-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.fields["name"], json!("newer"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_import_batch_enqueues_changes() {
        let db = setup().await;
        db.entities()
            .put(
                EntityType::Account,
                &record("acc-1", "2024-01-02T00:00:00Z", "local"),
            )
            .await
            .unwrap();

        let incoming = [
            record("acc-1", "2024-01-03T00:00:00Z", "imported"),
            record("acc-2", "2024-01-01T00:00:00Z", "imported"),
            record("acc-1", "2024-01-01T00:00:00Z", "stale"),
        ];
        let stats = import_batch(&db, EntityType::Account, &incoming)
            .await
            .unwrap();

        assert_eq!(stats.applied(), 2);
        let operations: Vec<_> = db
            .queue()
            .list_pending(TENANT)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| (entry.entity_id, entry.operation_type))
            .collect();
        assert_eq!(operations.len(), 2);
        assert!(operations.contains(&("acc-1".to_string(), OperationType::Update)));
        assert!(operations.contains(&("acc-2".to_string(), OperationType::Create)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_import_batch_skips_records_with_pending_delete() {
        let db = setup().await;
        db.record_local_change(
            EntityType::Account,
            OperationType::Delete,
            json!("acc-1"),
        )
        .await
        .unwrap();

        let incoming = [
            record("acc-1", "2024-01-03T00:00:00Z", "resurrected"),
            record("acc-2", "2024-01-01T00:00:00Z", "imported"),
        ];
        let stats = import_batch(&db, EntityType::Account, &incoming)
            .await
            .unwrap();

        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.excluded, 1);
        assert!(db
            .entities()
            .get(EntityType::Account, "acc-1")
            .await
            .unwrap()
            .is_none());
        assert_eq!(db.queue().list_pending(TENANT).await.unwrap().len(), 2);
    }
}
