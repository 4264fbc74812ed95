//! Database layer for ledgersync

mod connection;
mod entity_repository;
mod local_change;
mod metadata_repository;
mod migrations;
mod queue_repository;

pub use connection::{default_data_dir, tenant_db_path, TenantDatabase};
pub(crate) use connection::finish_transaction;
pub use entity_repository::{EntityRepository, LibSqlEntityRepository};
pub use metadata_repository::{LibSqlSyncMetadataRepository, SyncMetadataRepository, LWW_STRATEGY};
pub use queue_repository::{LibSqlSyncQueueRepository, PendingDeletes, SyncQueueRepository};

use libsql::{Row, Value};

use crate::error::{Error, Result};

/// Read a nullable TEXT column
pub(crate) fn optional_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(text) => Ok(Some(text)),
        other => Err(Error::Database(format!(
            "expected a text column at index {idx}, got {other:?}"
        ))),
    }
}
