//! Downstream checkpoints and the LWW conflict log

use libsql::{Connection, Row};

use super::optional_text;
use crate::error::Result;
use crate::models::{EntityType, SyncConflict, SyncMetadata};
use crate::util::timestamp_now;

/// Strategy name recorded for last-write-wins resolutions
pub const LWW_STRATEGY: &str = "lww";

/// Trait for sync metadata storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SyncMetadataRepository {
    /// Checkpoint of a collection, `None` before its first successful sync
    async fn get_checkpoint(&self, entity_type: EntityType) -> Result<Option<String>>;

    /// Store the checkpoint of a collection
    async fn set_checkpoint(&self, entity_type: EntityType, last_synced_at: &str) -> Result<()>;

    /// Checkpoint state for every tracked collection, in the given order
    async fn list_checkpoints(&self, entity_types: &[EntityType]) -> Result<Vec<SyncMetadata>>;

    /// Record that a local record won over an older incoming one
    async fn record_conflict(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        local_updated_at: &str,
        incoming_updated_at: &str,
    ) -> Result<()>;

    /// Most recent conflicts first
    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>>;
}

/// libSQL implementation of `SyncMetadataRepository`
pub struct LibSqlSyncMetadataRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSyncMetadataRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_conflict(row: &Row) -> Result<SyncConflict> {
        let entity_type: String = row.get(1)?;
        Ok(SyncConflict {
            id: row.get(0)?,
            entity_type: entity_type.parse()?,
            entity_id: row.get(2)?,
            local_updated_at: row.get(3)?,
            incoming_updated_at: row.get(4)?,
            resolved_at: row.get(5)?,
            strategy: row.get(6)?,
        })
    }
}

impl SyncMetadataRepository for LibSqlSyncMetadataRepository<'_> {
    async fn get_checkpoint(&self, entity_type: EntityType) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT last_synced_at FROM sync_metadata WHERE entity_type = ?1",
                [entity_type.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => optional_text(&row, 0),
            None => Ok(None),
        }
    }

    async fn set_checkpoint(&self, entity_type: EntityType, last_synced_at: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_metadata (entity_type, last_synced_at) VALUES (?1, ?2)
                 ON CONFLICT(entity_type) DO UPDATE SET last_synced_at = excluded.last_synced_at",
                [entity_type.as_str(), last_synced_at],
            )
            .await?;
        Ok(())
    }

    async fn list_checkpoints(&self, entity_types: &[EntityType]) -> Result<Vec<SyncMetadata>> {
        let mut checkpoints = Vec::with_capacity(entity_types.len());
        for entity_type in entity_types {
            checkpoints.push(SyncMetadata {
                entity_type: *entity_type,
                last_synced_at: self.get_checkpoint(*entity_type).await?,
            });
        }
        Ok(checkpoints)
    }

    async fn record_conflict(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        local_updated_at: &str,
        incoming_updated_at: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO sync_conflicts (
                    entity_type, entity_id, local_updated_at, incoming_updated_at,
                    resolved_at, strategy
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                libsql::params![
                    entity_type.as_str(),
                    entity_id,
                    local_updated_at,
                    incoming_updated_at,
                    timestamp_now(),
                    LWW_STRATEGY
                ],
            )
            .await?;
        Ok(())
    }

    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self
            .conn
            .query(
                "SELECT id, entity_type, entity_id, local_updated_at, incoming_updated_at,
                        resolved_at, strategy
                 FROM sync_conflicts
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?1",
                [limit],
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(Self::parse_conflict(&row)?);
        }
        Ok(conflicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TenantDatabase;
    use pretty_assertions::assert_eq;

    async fn setup() -> TenantDatabase {
        TenantDatabase::open_in_memory("tenant-a").await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_checkpoint_absent_until_set() {
        let db = setup().await;
        let repo = db.metadata();

        assert!(repo
            .get_checkpoint(EntityType::Account)
            .await
            .unwrap()
            .is_none());

        repo.set_checkpoint(EntityType::Account, "2024-01-01T00:00:00.000Z")
            .await
            .unwrap();
        repo.set_checkpoint(EntityType::Account, "2024-02-01T00:00:00.000Z")
            .await
            .unwrap();

        assert_eq!(
            repo.get_checkpoint(EntityType::Account).await.unwrap(),
            Some("2024-02-01T00:00:00.000Z".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_checkpoints_reports_missing_collections() {
        let db = setup().await;
        let repo = db.metadata();
        repo.set_checkpoint(EntityType::Category, "2024-01-01T00:00:00.000Z")
            .await
            .unwrap();

        let checkpoints = repo
            .list_checkpoints(&[EntityType::Account, EntityType::Category])
            .await
            .unwrap();

        assert!(checkpoints[0].needs_initial_sync());
        assert!(!checkpoints[1].needs_initial_sync());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_conflicts_newest_first_with_limit() {
        let db = setup().await;
        let repo = db.metadata();
        repo.record_conflict(
            EntityType::Account,
            "acc-1",
            "2024-01-02T00:00:00Z",
            "2024-01-01T00:00:00Z",
        )
        .await
        .unwrap();
        repo.record_conflict(
            EntityType::Category,
            "cat-1",
            "2024-01-03T00:00:00Z",
            "2024-01-01T00:00:00Z",
        )
        .await
        .unwrap();

        let conflicts = repo.list_conflicts(1).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].entity_id, "cat-1");
        assert_eq!(conflicts[0].strategy, LWW_STRATEGY);
        assert_eq!(repo.list_conflicts(10).await.unwrap().len(), 2);
    }
}
