//! Local entity store

use std::collections::HashMap;

use libsql::{Connection, Row};

use super::connection::finish_transaction;
use crate::error::Result;
use crate::models::{EntityType, SyncableEntity};

/// Trait for entity storage operations (async)
#[allow(async_fn_in_trait)]
pub trait EntityRepository {
    /// Get a record by collection and id
    async fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<SyncableEntity>>;

    /// Fetch several records at once, keyed by id. Missing ids are absent from the map.
    async fn get_many(
        &self,
        entity_type: EntityType,
        ids: &[String],
    ) -> Result<HashMap<String, SyncableEntity>>;

    /// Insert or replace a record
    async fn put(&self, entity_type: EntityType, entity: &SyncableEntity) -> Result<()>;

    /// Insert or replace several records in one transaction
    async fn put_many(&self, entity_type: EntityType, entities: &[SyncableEntity]) -> Result<()>;

    /// Delete a record; `false` when it did not exist
    async fn delete(&self, entity_type: EntityType, id: &str) -> Result<bool>;

    /// Delete several records in one transaction, returning how many existed
    async fn delete_many(&self, entity_type: EntityType, ids: &[String]) -> Result<u64>;

    /// Every record of a collection, most recently updated first
    async fn list(&self, entity_type: EntityType) -> Result<Vec<SyncableEntity>>;

    /// Number of records in a collection
    async fn count(&self, entity_type: EntityType) -> Result<u64>;
}

/// libSQL implementation of `EntityRepository`
pub struct LibSqlEntityRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlEntityRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse a record from its stored JSON snapshot
    fn parse_entity(row: &Row) -> Result<SyncableEntity> {
        let data: String = row.get(0)?;
        SyncableEntity::from_value(serde_json::from_str(&data)?)
    }

    async fn put_all(&self, entity_type: EntityType, entities: &[SyncableEntity]) -> Result<()> {
        for entity in entities {
            self.put(entity_type, entity).await?;
        }
        Ok(())
    }

    async fn delete_all(&self, entity_type: EntityType, ids: &[String]) -> Result<u64> {
        let mut removed = 0;
        for id in ids {
            if self.delete(entity_type, id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl EntityRepository for LibSqlEntityRepository<'_> {
    async fn get(&self, entity_type: EntityType, id: &str) -> Result<Option<SyncableEntity>> {
        let mut rows = self
            .conn
            .query(
                "SELECT data FROM entities WHERE entity_type = ?1 AND id = ?2",
                [entity_type.as_str(), id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_entity(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_many(
        &self,
        entity_type: EntityType,
        ids: &[String],
    ) -> Result<HashMap<String, SyncableEntity>> {
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            if found.contains_key(id) {
                continue;
            }
            if let Some(entity) = self.get(entity_type, id).await? {
                found.insert(id.clone(), entity);
            }
        }
        Ok(found)
    }

    async fn put(&self, entity_type: EntityType, entity: &SyncableEntity) -> Result<()> {
        let data = serde_json::to_string(entity)?;
        self.conn
            .execute(
                "INSERT INTO entities (entity_type, id, updated_at, data)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(entity_type, id) DO UPDATE SET
                    updated_at = excluded.updated_at,
                    data = excluded.data",
                libsql::params![
                    entity_type.as_str(),
                    entity.id.as_str(),
                    entity.updated_at.as_str(),
                    data
                ],
            )
            .await?;
        Ok(())
    }

    async fn put_many(&self, entity_type: EntityType, entities: &[SyncableEntity]) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        let outcome = self.put_all(entity_type, entities).await;
        finish_transaction(self.conn, outcome).await
    }

    async fn delete(&self, entity_type: EntityType, id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM entities WHERE entity_type = ?1 AND id = ?2",
                [entity_type.as_str(), id],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn delete_many(&self, entity_type: EntityType, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        let outcome = self.delete_all(entity_type, ids).await;
        finish_transaction(self.conn, outcome).await
    }

    async fn list(&self, entity_type: EntityType) -> Result<Vec<SyncableEntity>> {
        let mut rows = self
            .conn
            .query(
                "SELECT data FROM entities WHERE entity_type = ?1
                 ORDER BY updated_at DESC, id ASC",
                [entity_type.as_str()],
            )
            .await?;

        let mut entities = Vec::new();
        while let Some(row) = rows.next().await? {
            entities.push(Self::parse_entity(&row)?);
        }
        Ok(entities)
    }

    async fn count(&self, entity_type: EntityType) -> Result<u64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM entities WHERE entity_type = ?1",
                [entity_type.as_str()],
            )
            .await?;

        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
