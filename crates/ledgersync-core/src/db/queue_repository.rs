//! Sync queue (outbox) repository

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use libsql::{Connection, Row, Rows};

use super::connection::finish_transaction;
use super::optional_text;
use crate::error::Result;
use crate::models::{
    EntityType, QueueStatistics, QueueStatus, SyncQueueEntry, MAX_SYNC_ATTEMPTS,
};
use crate::util::{format_timestamp, timestamp_now};

/// Entity ids with a delete still in flight, grouped by collection
pub type PendingDeletes = HashMap<EntityType, HashSet<String>>;

const ENTRY_COLUMNS: &str = "id, tenant_id, entity_type, entity_id, operation_type, payload, \
                             status, attempts, timestamp, last_attempt, error";

/// Trait for outbox storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SyncQueueRepository {
    /// Insert a new entry
    async fn enqueue(&self, entry: &SyncQueueEntry) -> Result<()>;

    /// Get an entry by id
    async fn get(&self, entry_id: &str) -> Result<Option<SyncQueueEntry>>;

    /// Pending entries, oldest first
    async fn list_pending(&self, tenant_id: &str) -> Result<Vec<SyncQueueEntry>>;

    /// Failed entries with `attempts < max_retries`, oldest first
    async fn list_failed(&self, tenant_id: &str, max_retries: u32)
        -> Result<Vec<SyncQueueEntry>>;

    /// Every entry of the tenant, oldest first
    async fn list_all(&self, tenant_id: &str) -> Result<Vec<SyncQueueEntry>>;

    /// Entries eligible for an upstream attempt, oldest first
    async fn list_retryable(&self, tenant_id: &str) -> Result<Vec<SyncQueueEntry>>;

    /// Move an entry to `status`; `false` when the entry no longer exists
    async fn update_status(
        &self,
        entry_id: &str,
        status: QueueStatus,
        error: Option<&str>,
    ) -> Result<bool>;

    /// Delete an entry; `false` when already absent
    async fn remove(&self, entry_id: &str) -> Result<bool>;

    /// Ids of records whose deletion is pending or processing
    async fn pending_deletes(&self, tenant_id: &str) -> Result<PendingDeletes>;

    /// Reset entries stuck in `processing` longer than `timeout`.
    ///
    /// Entries whose stuck attempt was their last one become `failed`.
    async fn reset_stuck_processing(&self, tenant_id: &str, timeout: Duration) -> Result<u64>;

    /// Counts and latest error for observability
    async fn statistics(&self, tenant_id: &str) -> Result<QueueStatistics>;
}

/// libSQL implementation of `SyncQueueRepository`
pub struct LibSqlSyncQueueRepository<'a> {
    conn: &'a Connection,
    max_attempts: u32,
}

impl<'a> LibSqlSyncQueueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            max_attempts: MAX_SYNC_ATTEMPTS,
        }
    }

    /// Override the attempt cap used for retry eligibility
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Attempt cap in effect
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Mark a batch `processing` under one attempt stamp.
    ///
    /// Each marked entry gets one more attempt. Returns the ids that were
    /// actually claimed; entries removed or already claimed are skipped.
    pub async fn mark_processing(&self, entry_ids: &[String], stamp: &str) -> Result<Vec<String>> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        let outcome = self.mark_processing_inner(entry_ids, stamp).await;
        finish_transaction(self.conn, outcome).await
    }

    async fn mark_processing_inner(&self, entry_ids: &[String], stamp: &str) -> Result<Vec<String>> {
        let mut claimed = Vec::with_capacity(entry_ids.len());
        for entry_id in entry_ids {
            let changed = self
                .conn
                .execute(
                    "UPDATE sync_queue
                     SET status = 'processing', last_attempt = ?2, attempts = MIN(attempts + 1, ?3)
                     WHERE id = ?1 AND status IN ('pending', 'failed') AND attempts < ?3",
                    libsql::params![entry_id.as_str(), stamp, i64::from(self.max_attempts)],
                )
                .await?;
            if changed > 0 {
                claimed.push(entry_id.clone());
            }
        }
        Ok(claimed)
    }

    /// Remove acknowledged entries still owned by the attempt `stamp`.
    ///
    /// Entries reclaimed by maintenance meanwhile are left untouched.
    pub async fn acknowledge(&self, entry_ids: &[String], stamp: &str) -> Result<u64> {
        self.conn.execute("BEGIN TRANSACTION", ()).await?;
        let outcome = self.acknowledge_inner(entry_ids, stamp).await;
        finish_transaction(self.conn, outcome).await
    }

    async fn acknowledge_inner(&self, entry_ids: &[String], stamp: &str) -> Result<u64> {
        let mut removed = 0;
        for entry_id in entry_ids {
            removed += self
                .conn
                .execute(
                    "DELETE FROM sync_queue
                     WHERE id = ?1 AND status = 'processing' AND last_attempt = ?2",
                    libsql::params![entry_id.as_str(), stamp],
                )
                .await?;
        }
        Ok(removed)
    }

    /// Return a failed attempt to the queue.
    ///
    /// The entry goes back to `pending`, or to `failed` once the attempt cap
    /// is reached. `false` when the entry is no longer owned by `stamp`.
    pub async fn release_failed(&self, entry_id: &str, stamp: &str, error: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE sync_queue
                 SET status = CASE WHEN attempts >= ?4 THEN 'failed' ELSE 'pending' END,
                     error = ?3
                 WHERE id = ?1 AND status = 'processing' AND last_attempt = ?2",
                libsql::params![entry_id, stamp, error, i64::from(self.max_attempts)],
            )
            .await?;
        Ok(changed > 0)
    }

    /// Give exhausted entries a fresh set of attempts
    pub async fn retry_exhausted(&self, tenant_id: &str) -> Result<u64> {
        let changed = self
            .conn
            .execute(
                "UPDATE sync_queue
                 SET status = 'pending', attempts = 0
                 WHERE tenant_id = ?1 AND attempts >= ?2 AND status != 'processing'",
                libsql::params![tenant_id, i64::from(self.max_attempts)],
            )
            .await?;
        Ok(changed)
    }

    /// Drop exhausted entries from the queue
    pub async fn clear_exhausted(&self, tenant_id: &str) -> Result<u64> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM sync_queue
                 WHERE tenant_id = ?1 AND attempts >= ?2 AND status != 'processing'",
                libsql::params![tenant_id, i64::from(self.max_attempts)],
            )
            .await?;
        Ok(changed)
    }

    async fn query_entries(&self, sql: &str, params: impl libsql::params::IntoParams) -> Result<Vec<SyncQueueEntry>> {
        let rows = self.conn.query(sql, params).await?;
        collect_entries(rows).await
    }

    /// Parse a queue entry from a database row
    fn parse_entry(row: &Row) -> Result<SyncQueueEntry> {
        let entity_type: String = row.get(2)?;
        let operation_type: String = row.get(4)?;
        let payload: String = row.get(5)?;
        let status: String = row.get(6)?;
        let attempts: i64 = row.get(7)?;

        Ok(SyncQueueEntry {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            entity_type: entity_type.parse()?,
            entity_id: row.get(3)?,
            operation_type: operation_type.parse()?,
            payload: serde_json::from_str(&payload)?,
            status: status.parse()?,
            attempts: u32::try_from(attempts.max(0)).unwrap_or(u32::MAX),
            timestamp: row.get(8)?,
            last_attempt: optional_text(row, 9)?,
            error: optional_text(row, 10)?,
        })
    }
}

async fn collect_entries(mut rows: Rows) -> Result<Vec<SyncQueueEntry>> {
    let mut entries = Vec::new();
    while let Some(row) = rows.next().await? {
        entries.push(LibSqlSyncQueueRepository::parse_entry(&row)?);
    }
    Ok(entries)
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl SyncQueueRepository for LibSqlSyncQueueRepository<'_> {
    async fn enqueue(&self, entry: &SyncQueueEntry) -> Result<()> {
        let payload = serde_json::to_string(&entry.payload)?;
        self.conn
            .execute(
                "INSERT INTO sync_queue (
                    id, tenant_id, entity_type, entity_id, operation_type, payload,
                    status, attempts, timestamp, last_attempt, error
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                libsql::params![
                    entry.id.as_str(),
                    entry.tenant_id.as_str(),
                    entry.entity_type.as_str(),
                    entry.entity_id.as_str(),
                    entry.operation_type.as_str(),
                    payload,
                    entry.status.as_str(),
                    i64::from(entry.attempts),
                    entry.timestamp.as_str(),
                    entry.last_attempt.clone(),
                    entry.error.clone(),
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, entry_id: &str) -> Result<Option<SyncQueueEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE id = ?1");
        let mut entries = self.query_entries(&sql, [entry_id]).await?;
        Ok(entries.pop())
    }

    async fn list_pending(&self, tenant_id: &str) -> Result<Vec<SyncQueueEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue
             WHERE tenant_id = ?1 AND status = 'pending'
             ORDER BY timestamp ASC, id ASC"
        );
        self.query_entries(&sql, [tenant_id]).await
    }

    async fn list_failed(
        &self,
        tenant_id: &str,
        max_retries: u32,
    ) -> Result<Vec<SyncQueueEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue
             WHERE tenant_id = ?1 AND status = 'failed' AND attempts < ?2
             ORDER BY timestamp ASC, id ASC"
        );
        self.query_entries(&sql, libsql::params![tenant_id, i64::from(max_retries)])
            .await
    }

    async fn list_all(&self, tenant_id: &str) -> Result<Vec<SyncQueueEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue
             WHERE tenant_id = ?1
             ORDER BY timestamp ASC, id ASC"
        );
        self.query_entries(&sql, [tenant_id]).await
    }

    async fn list_retryable(&self, tenant_id: &str) -> Result<Vec<SyncQueueEntry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM sync_queue
             WHERE tenant_id = ?1 AND status IN ('pending', 'failed') AND attempts < ?2
             ORDER BY timestamp ASC, id ASC"
        );
        self.query_entries(
            &sql,
            libsql::params![tenant_id, i64::from(self.max_attempts)],
        )
        .await
    }

    async fn update_status(
        &self,
        entry_id: &str,
        status: QueueStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let error = error.map(str::to_string);
        let changed = match status {
            QueueStatus::Processing => {
                self.conn
                    .execute(
                        "UPDATE sync_queue
                         SET status = 'processing', last_attempt = ?2,
                             attempts = MIN(attempts + 1, ?3)
                         WHERE id = ?1",
                        libsql::params![
                            entry_id,
                            timestamp_now(),
                            i64::from(self.max_attempts)
                        ],
                    )
                    .await?
            }
            QueueStatus::Synced => {
                self.conn
                    .execute(
                        "UPDATE sync_queue SET status = 'synced', error = NULL WHERE id = ?1",
                        [entry_id],
                    )
                    .await?
            }
            QueueStatus::Failed | QueueStatus::Pending => {
                self.conn
                    .execute(
                        "UPDATE sync_queue SET status = ?2, error = COALESCE(?3, error) WHERE id = ?1",
                        libsql::params![entry_id, status.as_str(), error],
                    )
                    .await?
            }
        };

        Ok(changed > 0)
    }

    async fn remove(&self, entry_id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM sync_queue WHERE id = ?1", [entry_id])
            .await?;
        Ok(changed > 0)
    }

    async fn pending_deletes(&self, tenant_id: &str) -> Result<PendingDeletes> {
        let mut rows = self
            .conn
            .query(
                "SELECT entity_type, entity_id FROM sync_queue
                 WHERE tenant_id = ?1 AND operation_type = 'delete'
                   AND status IN ('pending', 'processing')",
                [tenant_id],
            )
            .await?;

        let mut deletes = PendingDeletes::new();
        while let Some(row) = rows.next().await? {
            let entity_type: String = row.get(0)?;
            let entity_id: String = row.get(1)?;
            deletes
                .entry(entity_type.parse()?)
                .or_default()
                .insert(entity_id);
        }
        Ok(deletes)
    }

    async fn reset_stuck_processing(&self, tenant_id: &str, timeout: Duration) -> Result<u64> {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(timeout)
            .map_or_else(|| "0000".to_string(), format_timestamp);
        let message = format!(
            "Reset after exceeding the {}s processing timeout",
            timeout.num_seconds()
        );

        let changed = self
            .conn
            .execute(
                "UPDATE sync_queue
                 SET status = CASE WHEN attempts >= ?4 THEN 'failed' ELSE 'pending' END,
                     error = ?3
                 WHERE tenant_id = ?1 AND status = 'processing'
                   AND (last_attempt IS NULL OR last_attempt < ?2)",
                libsql::params![tenant_id, cutoff, message, i64::from(self.max_attempts)],
            )
            .await?;

        if changed > 0 {
            tracing::warn!(tenant_id, reset = changed, "Reclaimed stuck sync queue entries");
        }
        Ok(changed)
    }

    async fn statistics(&self, tenant_id: &str) -> Result<QueueStatistics> {
        let mut rows = self
            .conn
            .query(
                "SELECT
                    COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN attempts >= ?2 THEN 1 ELSE 0 END), 0),
                    MIN(CASE WHEN status = 'pending' THEN timestamp END)
                 FROM sync_queue
                 WHERE tenant_id = ?1",
                libsql::params![tenant_id, i64::from(self.max_attempts)],
            )
            .await?;

        let mut stats = QueueStatistics::default();
        if let Some(row) = rows.next().await? {
            stats.pending_count = count(row.get(0)?);
            stats.processing_count = count(row.get(1)?);
            stats.failed_count = count(row.get(2)?);
            stats.exhausted_count = count(row.get(3)?);
            stats.oldest_pending = optional_text(&row, 4)?;
        }

        let mut rows = self
            .conn
            .query(
                "SELECT error FROM sync_queue
                 WHERE tenant_id = ?1 AND error IS NOT NULL
                 ORDER BY last_attempt DESC
                 LIMIT 1",
                [tenant_id],
            )
            .await?;
        if let Some(row) = rows.next().await? {
            stats.last_error_message = optional_text(&row, 0)?;
        }

        Ok(stats)
    }
}
