//! Local mutations written together with their outbox entry

use serde::Deserialize;
use serde_json::{json, Value};

use super::connection::finish_transaction;
use super::{EntityRepository, SyncQueueRepository, TenantDatabase};
use crate::error::{Error, Result};
use crate::models::{deserialize_id, EntityType, OperationType, SyncQueueEntry, SyncableEntity};
use crate::util::timestamp_now;

#[derive(Deserialize)]
struct RecordId {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
}

impl TenantDatabase {
    /// Apply a local mutation and enqueue it for upstream delivery.
    ///
    /// The entity write and the queue insert share one transaction. For
    /// create/update `record` is the full snapshot and gets `updated_at`
    /// stamped when missing; for delete it is the id or `{"id": ...}`.
    pub async fn record_local_change(
        &self,
        entity_type: EntityType,
        operation: OperationType,
        record: Value,
    ) -> Result<SyncQueueEntry> {
        let (entity, entry) = match operation {
            OperationType::Create | OperationType::Update => {
                let entity = SyncableEntity::from_value(stamp_if_missing(record)?)?;
                let entry = SyncQueueEntry::new(
                    self.tenant_id(),
                    entity_type,
                    entity.id.clone(),
                    operation,
                    entity.to_value()?,
                );
                (Some(entity), entry)
            }
            OperationType::Delete => {
                let id = record_id(record)?;
                let entry = SyncQueueEntry::new(
                    self.tenant_id(),
                    entity_type,
                    id.clone(),
                    operation,
                    json!({ "id": id }),
                );
                (None, entry)
            }
        };

        let conn = self.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;
        let outcome = self.write_local_change(entity_type, entity.as_ref(), &entry).await;
        finish_transaction(conn, outcome).await?;

        tracing::debug!(
            tenant_id = %entry.tenant_id,
            entity_type = %entity_type,
            entity_id = %entry.entity_id,
            operation = %operation,
            "Recorded local change"
        );
        Ok(entry)
    }

    async fn write_local_change(
        &self,
        entity_type: EntityType,
        entity: Option<&SyncableEntity>,
        entry: &SyncQueueEntry,
    ) -> Result<()> {
        match entity {
            Some(entity) => self.entities().put(entity_type, entity).await?,
            None => {
                self.entities().delete(entity_type, &entry.entity_id).await?;
            }
        }
        self.queue().enqueue(entry).await
    }
}

fn stamp_if_missing(record: Value) -> Result<Value> {
    let Value::Object(mut fields) = record else {
        return Err(Error::InvalidInput("record must be a JSON object".into()));
    };

    let has_stamp = ["updated_at", "updatedAt"]
        .iter()
        .any(|key| fields.get(*key).is_some_and(|v| !v.is_null()));
    if !has_stamp {
        fields.remove("updatedAt");
        fields.insert("updated_at".to_string(), Value::String(timestamp_now()));
    }
    Ok(Value::Object(fields))
}

fn record_id(record: Value) -> Result<String> {
    let id = match record {
        Value::String(id) => id,
        Value::Number(id) => id.to_string(),
        other => serde_json::from_value::<RecordId>(other)?.id,
    };
    let id = id.trim().to_string();
    if id.is_empty() {
        return Err(Error::InvalidInput("record id cannot be empty".into()));
    }
    Ok(id)
}
