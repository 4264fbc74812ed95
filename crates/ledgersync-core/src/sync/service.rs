//! Tenant-scoped sync orchestration.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use crate::config::SyncSettings;
use crate::db::{PendingDeletes, SyncMetadataRepository, SyncQueueRepository};
use crate::error::{Error, Result};
use crate::models::{
    EntityType, OperationType, QueueStatistics, QueueStatus, SyncConflict, SyncMetadata,
    SyncQueueEntry, SyncableEntity,
};
use crate::services::TenantSession;
use crate::state::SyncState;
use crate::util::timestamp_now;

use super::worker::SyncCommand;
use super::{
    downstream, merge, upstream, BackendError, DownstreamReport, InitialSyncReport, MergeStats,
    SyncBackend, SyncReport, UpstreamReport,
};

/// Sync core for whichever tenant is active in its session.
///
/// Upstream, downstream and initial passes are serialised through one gate,
/// so a pending local mutation is always pushed before the next delta for
/// the same tenant is applied. The tenant database is only locked per step,
/// never across a network call.
pub struct SyncService<B> {
    session: TenantSession,
    backend: B,
    settings: SyncSettings,
    gate: Mutex<()>,
    trigger: Mutex<Option<mpsc::WeakSender<SyncCommand>>>,
}

impl<B: SyncBackend> SyncService<B> {
    pub fn new(session: TenantSession, backend: B, settings: SyncSettings) -> Self {
        Self {
            session,
            backend,
            settings,
            gate: Mutex::new(()),
            trigger: Mutex::new(None),
        }
    }

    pub const fn session(&self) -> &TenantSession {
        &self.session
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Sync queue
    // ------------------------------------------------------------------

    /// Append a pending entry to the outbox of `tenant_id`
    pub async fn enqueue(
        &self,
        tenant_id: &str,
        entity_type: EntityType,
        entity_id: &str,
        operation: OperationType,
        payload: Value,
    ) -> Result<SyncQueueEntry> {
        let entity_id = entity_id.trim();
        if entity_id.is_empty() {
            return Err(Error::InvalidInput("entity id cannot be empty".into()));
        }
        let db = self.session.lock_tenant(tenant_id).await?;
        let entry = SyncQueueEntry::new(tenant_id, entity_type, entity_id, operation, payload);
        db.queue().enqueue(&entry).await?;
        Ok(entry)
    }

    pub async fn list_pending(&self, tenant_id: &str) -> Result<Vec<SyncQueueEntry>> {
        let db = self.session.lock_tenant(tenant_id).await?;
        db.queue().list_pending(tenant_id).await
    }

    pub async fn list_failed(
        &self,
        tenant_id: &str,
        max_retries: u32,
    ) -> Result<Vec<SyncQueueEntry>> {
        let db = self.session.lock_tenant(tenant_id).await?;
        db.queue().list_failed(tenant_id, max_retries).await
    }

    /// Every queue entry of the tenant, for inspection
    pub async fn list_entries(&self, tenant_id: &str) -> Result<Vec<SyncQueueEntry>> {
        let db = self.session.lock_tenant(tenant_id).await?;
        db.queue().list_all(tenant_id).await
    }

    /// `false` when the entry is already gone
    pub async fn update_status(
        &self,
        entry_id: &str,
        status: QueueStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let db = self.session.lock().await?;
        db.queue()
            .with_max_attempts(self.settings.max_attempts)
            .update_status(entry_id, status, error)
            .await
    }

    pub async fn remove(&self, entry_id: &str) -> Result<bool> {
        let db = self.session.lock().await?;
        db.queue().remove(entry_id).await
    }

    pub async fn pending_deletes(&self, tenant_id: &str) -> Result<PendingDeletes> {
        let db = self.session.lock_tenant(tenant_id).await?;
        db.queue().pending_deletes(tenant_id).await
    }

    // ------------------------------------------------------------------
    // Maintenance and remediation
    // ------------------------------------------------------------------

    pub async fn reset_stuck_processing(&self, tenant_id: &str, timeout: Duration) -> Result<u64> {
        let db = self.session.lock_tenant(tenant_id).await?;
        db.queue().reset_stuck_processing(tenant_id, timeout).await
    }

    pub async fn statistics(&self, tenant_id: &str) -> Result<QueueStatistics> {
        let db = self.session.lock_tenant(tenant_id).await?;
        db.queue()
            .with_max_attempts(self.settings.max_attempts)
            .statistics(tenant_id)
            .await
    }

    /// State of the active tenant for status displays
    pub async fn sync_state(&self, online: bool) -> Result<SyncState> {
        let db = self.session.lock().await?;
        let stats = db
            .queue()
            .with_max_attempts(self.settings.max_attempts)
            .statistics(db.tenant_id())
            .await?;
        Ok(SyncState::from_statistics(&stats, online))
    }

    /// Give exhausted entries a fresh set of attempts
    pub async fn retry_exhausted(&self, tenant_id: &str) -> Result<u64> {
        let retried = {
            let db = self.session.lock_tenant(tenant_id).await?;
            db.queue()
                .with_max_attempts(self.settings.max_attempts)
                .retry_exhausted(tenant_id)
                .await?
        };
        if retried > 0 {
            tracing::info!(tenant_id, retried, "Re-queued exhausted entries");
            self.trigger_upstream().await;
        }
        Ok(retried)
    }

    /// Drop exhausted entries from the queue
    pub async fn clear_exhausted(&self, tenant_id: &str) -> Result<u64> {
        let db = self.session.lock_tenant(tenant_id).await?;
        let cleared = db
            .queue()
            .with_max_attempts(self.settings.max_attempts)
            .clear_exhausted(tenant_id)
            .await?;
        if cleared > 0 {
            tracing::warn!(tenant_id, cleared, "Discarded exhausted entries");
        }
        Ok(cleared)
    }

    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let db = self.session.lock().await?;
        db.metadata().list_conflicts(limit).await
    }

    /// Checkpoint of every tracked collection
    pub async fn checkpoints(&self) -> Result<Vec<SyncMetadata>> {
        let db = self.session.lock().await?;
        db.metadata()
            .list_checkpoints(&self.settings.tracked_types)
            .await
    }

    // ------------------------------------------------------------------
    // Local writes
    // ------------------------------------------------------------------

    /// Write a local mutation and its outbox entry, then nudge the worker
    pub async fn record_local_change(
        &self,
        entity_type: EntityType,
        operation: OperationType,
        record: Value,
    ) -> Result<SyncQueueEntry> {
        let entry = {
            let db = self.session.lock().await?;
            db.record_local_change(entity_type, operation, record).await?
        };
        self.trigger_upstream().await;
        Ok(entry)
    }

    /// Merge a bulk import under LWW, queueing whatever it changed
    pub async fn import_records(
        &self,
        entity_type: EntityType,
        records: &[SyncableEntity],
    ) -> Result<MergeStats> {
        let stats = {
            let db = self.session.lock().await?;
            merge::import_batch(&db, entity_type, records).await?
        };
        if stats.applied() > 0 {
            self.trigger_upstream().await;
        }
        Ok(stats)
    }

    /// Fire-and-forget request for an upstream drain by the background worker
    pub async fn trigger_upstream(&self) {
        let sender = self
            .trigger
            .lock()
            .await
            .as_ref()
            .and_then(mpsc::WeakSender::upgrade);
        let Some(sender) = sender else {
            return;
        };
        // A full channel already holds a pending request
        if let Err(mpsc::error::TrySendError::Closed(_)) = sender.try_send(SyncCommand::Upstream) {
            tracing::debug!("Sync worker stopped; upstream trigger dropped");
        }
    }

    pub(crate) async fn attach_trigger(&self, sender: &mpsc::Sender<SyncCommand>) {
        *self.trigger.lock().await = Some(sender.downgrade());
    }

    pub(crate) async fn detach_trigger(&self) {
        self.trigger.lock().await.take();
    }

    // ------------------------------------------------------------------
    // Sync passes
    // ------------------------------------------------------------------

    /// Drain the outbox of the active tenant.
    ///
    /// Transport failures are returned after the affected entries have been
    /// put back in the queue.
    pub async fn process_sync_queue(&self) -> Result<UpstreamReport> {
        let _gate = self.gate.lock().await;
        let tenant_id = self.active_tenant().await?;
        let (report, failure) = self.upstream_pass(&tenant_id).await?;
        match failure {
            Some(error) => Err(error.into()),
            None => Ok(report),
        }
    }

    /// Pull and apply the delta of one collection
    pub async fn sync_downstream(&self, entity_type: EntityType) -> Result<DownstreamReport> {
        let _gate = self.gate.lock().await;
        let tenant_id = self.active_tenant().await?;
        self.downstream_pass(&tenant_id, entity_type).await
    }

    /// Hydrate every tracked collection that has no checkpoint yet
    pub async fn initial_sync(&self) -> Result<InitialSyncReport> {
        let _gate = self.gate.lock().await;
        let tenant_id = self.active_tenant().await?;
        let missing: Vec<EntityType> = self
            .tenant_checkpoints(&tenant_id)
            .await?
            .into_iter()
            .filter(SyncMetadata::needs_initial_sync)
            .map(|metadata| metadata.entity_type)
            .collect();
        Ok(self.initial_pass(&tenant_id, &missing).await)
    }

    /// Full pass: reclaim stuck entries, push, hydrate, then pull.
    ///
    /// Never fails; problems are collected in [`SyncReport::error`].
    pub async fn synchronize(&self) -> SyncReport {
        let _gate = self.gate.lock().await;
        let mut report = SyncReport::default();

        let tenant_id = match self.active_tenant().await {
            Ok(tenant_id) => tenant_id,
            Err(error) => {
                report.push_error(error.to_string());
                return report;
            }
        };

        match self
            .reset_stuck_processing(&tenant_id, self.settings.stuck_timeout)
            .await
        {
            Ok(reset) => report.reset_stuck = reset,
            Err(error) => report.push_error(format!("maintenance: {error}")),
        }

        match self.upstream_pass(&tenant_id).await {
            Ok((upstream, failure)) => {
                report.upstream = Some(upstream);
                if let Some(error) = failure {
                    report.push_error(format!("upstream: {error}"));
                }
            }
            Err(error) => report.push_error(format!("upstream: {error}")),
        }

        let checkpoints = match self.tenant_checkpoints(&tenant_id).await {
            Ok(checkpoints) => checkpoints,
            Err(error) => {
                report.push_error(format!("checkpoints: {error}"));
                return report;
            }
        };
        let (missing, hydrated): (Vec<SyncMetadata>, Vec<SyncMetadata>) = checkpoints
            .into_iter()
            .partition(SyncMetadata::needs_initial_sync);

        if !missing.is_empty() {
            let missing: Vec<EntityType> = missing.iter().map(|m| m.entity_type).collect();
            let initial = self.initial_pass(&tenant_id, &missing).await;
            for (entity_type, message) in &initial.failed {
                report.push_error(format!("initial {entity_type}: {message}"));
            }
            report.initial = Some(initial);
        }

        for metadata in hydrated {
            match self.downstream_pass(&tenant_id, metadata.entity_type).await {
                Ok(downstream) => report.downstream.push(downstream),
                Err(error) => {
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        entity_type = %metadata.entity_type,
                        "Downstream sync failed: {error}"
                    );
                    report.push_error(format!("downstream {}: {error}", metadata.entity_type));
                }
            }
        }

        if let Some(error) = &report.error {
            tracing::warn!(tenant_id = %tenant_id, "Sync pass finished with errors: {error}");
        } else {
            tracing::info!(
                tenant_id = %tenant_id,
                collections = report.downstream.len(),
                "Sync pass finished"
            );
        }
        report
    }

    async fn active_tenant(&self) -> Result<String> {
        self.session.tenant_id().await.ok_or(Error::NoActiveTenant)
    }

    async fn tenant_checkpoints(&self, tenant_id: &str) -> Result<Vec<SyncMetadata>> {
        let db = self.session.lock_tenant(tenant_id).await?;
        db.metadata()
            .list_checkpoints(&self.settings.tracked_types)
            .await
    }

    /// Send every eligible entry in `batch_size` chunks.
    ///
    /// Stops at the first transport failure; later chunks stay untouched.
    async fn upstream_pass(
        &self,
        tenant_id: &str,
    ) -> Result<(UpstreamReport, Option<BackendError>)> {
        let max_attempts = self.settings.max_attempts;
        let candidates = {
            let db = self.session.lock_tenant(tenant_id).await?;
            upstream::eligible_entries(&db, max_attempts).await?
        };

        let mut report = UpstreamReport::default();
        if candidates.is_empty() {
            tracing::debug!(tenant_id, "Sync queue is empty");
            return Ok((report, None));
        }

        let mut remaining = candidates.into_iter();
        loop {
            let chunk: Vec<SyncQueueEntry> =
                remaining.by_ref().take(self.settings.batch_size).collect();
            if chunk.is_empty() {
                break;
            }

            let batch = {
                let db = self.session.lock_tenant(tenant_id).await?;
                upstream::claim(&db, chunk, max_attempts).await?
            };
            if batch.is_empty() {
                continue;
            }

            match self.backend.upstream(tenant_id, &batch.entries).await {
                Ok(response) => {
                    let db = self.session.lock_tenant(tenant_id).await?;
                    let outcome =
                        upstream::reconcile(&db, &batch, &response, max_attempts).await?;
                    report.absorb(outcome);
                }
                Err(error) => {
                    tracing::warn!(
                        tenant_id,
                        entries = batch.entries.len(),
                        "Upstream request failed: {error}"
                    );
                    let db = self.session.lock_tenant(tenant_id).await?;
                    let outcome = upstream::release_batch(
                        &db,
                        &batch,
                        &error.to_string(),
                        max_attempts,
                    )
                    .await?;
                    report.absorb(outcome);
                    return Ok((report, Some(error)));
                }
            }
        }

        tracing::info!(
            tenant_id,
            submitted = report.submitted,
            acknowledged = report.acknowledged,
            failed = report.failed,
            exhausted = report.exhausted,
            "Upstream pass finished"
        );
        Ok((report, None))
    }

    async fn downstream_pass(
        &self,
        tenant_id: &str,
        entity_type: EntityType,
    ) -> Result<DownstreamReport> {
        let since = {
            let db = self.session.lock_tenant(tenant_id).await?;
            downstream::since(&db, entity_type).await?
        };
        let delta = self
            .backend
            .downstream(tenant_id, entity_type, &since)
            .await?;
        let db = self.session.lock_tenant(tenant_id).await?;
        downstream::apply_delta(&db, entity_type, &delta).await
    }

    /// Hydrate `missing` in order, stopping at the first failure.
    ///
    /// Collections completed before the failure keep their checkpoints.
    async fn initial_pass(&self, tenant_id: &str, missing: &[EntityType]) -> InitialSyncReport {
        let mut report = InitialSyncReport::default();
        for entity_type in missing {
            match self.hydrate(tenant_id, *entity_type).await {
                Ok(_) => report.completed.push(*entity_type),
                Err(error) => {
                    tracing::warn!(
                        tenant_id,
                        entity_type = %entity_type,
                        "Initial sync failed: {error}"
                    );
                    report.failed.push((*entity_type, error.to_string()));
                    break;
                }
            }
        }
        report
    }

    async fn hydrate(&self, tenant_id: &str, entity_type: EntityType) -> Result<MergeStats> {
        let checkpoint = timestamp_now();
        let records = self.backend.initial(tenant_id, entity_type).await?;
        let db = self.session.lock_tenant(tenant_id).await?;
        downstream::apply_initial(&db, entity_type, &records, &checkpoint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{EntityRepository, TenantDatabase};
    use crate::models::MAX_SYNC_ATTEMPTS;
    use crate::sync::testing::ScriptedBackend;
    use crate::sync::{DownstreamDelta, UpstreamItemError, UpstreamResponse};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const TENANT: &str = "tenant-a";

    async fn service_with(settings: SyncSettings) -> (SyncService<ScriptedBackend>, ScriptedBackend) {
        let db = TenantDatabase::open_in_memory(TENANT).await.unwrap();
        let backend = ScriptedBackend::new();
        let service = SyncService::new(TenantSession::with_database(db), backend.clone(), settings);
        (service, backend)
    }

    async fn service() -> (SyncService<ScriptedBackend>, ScriptedBackend) {
        service_with(SyncSettings::default().with_tracked_types([EntityType::Account])).await
    }

    fn record(id: &str, updated_at: &str, name: &str) -> SyncableEntity {
        SyncableEntity::from_value(json!({"id": id, "updated_at": updated_at, "name": name}))
            .unwrap()
    }

    async fn create(service: &SyncService<ScriptedBackend>, id: &str) -> SyncQueueEntry {
        service
            .record_local_change(
                EntityType::Account,
                OperationType::Create,
                json!({"id": id, "updated_at": "2024-01-01T00:00:00Z"}),
            )
            .await
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_entry_points_fail_without_active_tenant() {
        let service = SyncService::new(
            TenantSession::new(),
            ScriptedBackend::new(),
            SyncSettings::default(),
        );

        let enqueue = service
            .enqueue(TENANT, EntityType::Account, "acc-1", OperationType::Create, json!({}))
            .await;
        assert!(matches!(enqueue, Err(Error::NoActiveTenant)));
        assert!(matches!(
            service.process_sync_queue().await,
            Err(Error::NoActiveTenant)
        ));
        let report = service.synchronize().await;
        assert!(report.error.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_enqueue_rejects_other_tenant() {
        let (service, _) = service().await;
        let result = service
            .enqueue("tenant-b", EntityType::Account, "acc-1", OperationType::Delete, json!({"id": "acc-1"}))
            .await;
        assert!(matches!(result, Err(Error::TenantMismatch { .. })));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_process_sync_queue_drains_on_full_success() {
        let (service, backend) = service().await;
        for id in ["acc-1", "acc-2", "acc-3"] {
            create(&service, id).await;
        }

        let report = service.process_sync_queue().await.unwrap();

        assert_eq!(report.submitted, 3);
        assert_eq!(report.acknowledged, 3);
        assert!(service.list_entries(TENANT).await.unwrap().is_empty());
        let sent: Vec<_> = backend.upstream_calls()[0]
            .iter()
            .map(|e| e.entity_id.clone())
            .collect();
        assert_eq!(sent, vec!["acc-1", "acc-2", "acc-3"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_process_sync_queue_is_noop_when_empty() {
        let (service, backend) = service().await;
        let report = service.process_sync_queue().await.unwrap();
        assert_eq!(report, UpstreamReport::default());
        assert!(backend.upstream_calls().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_process_sync_queue_respects_batch_size() {
        let (service, backend) = service_with(SyncSettings::default().with_batch_size(2)).await;
        for id in ["acc-1", "acc-2", "acc-3"] {
            create(&service, id).await;
        }

        service.process_sync_queue().await.unwrap();

        let sizes: Vec<_> = backend.upstream_calls().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_partial_success_keeps_rejected_entry() {
        let (service, backend) = service().await;
        let accepted = create(&service, "acc-1").await;
        let rejected = create(&service, "acc-2").await;
        backend.push_upstream(UpstreamResponse {
            success: false,
            processed_ids: vec![accepted.id.clone()],
            errors: vec![UpstreamItemError {
                entity_id: "acc-2".to_string(),
                message: "duplicate name".to_string(),
            }],
        });

        let report = service.process_sync_queue().await.unwrap();

        assert_eq!(report.acknowledged, 1);
        assert_eq!(report.failed, 1);
        let remaining = service.list_entries(TENANT).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, rejected.id);
        assert_eq!(remaining[0].attempts, 1);
        assert_eq!(remaining[0].error.as_deref(), Some("duplicate name"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_transport_failure_counts_attempt_for_whole_batch() {
        let (service, backend) = service().await;
        create(&service, "acc-1").await;
        create(&service, "acc-2").await;
        backend.fail_upstream("connection reset");

        let result = service.process_sync_queue().await;

        assert!(matches!(result, Err(Error::Backend(BackendError::Api(_)))));
        let entries = service.list_pending(TENANT).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.attempts == 1));
        let stats = service.statistics(TENANT).await.unwrap();
        assert!(stats
            .last_error_message
            .unwrap()
            .contains("connection reset"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_exhausted_entry_is_never_resubmitted() {
        let (service, backend) = service().await;
        create(&service, "acc-1").await;
        for _ in 0..MAX_SYNC_ATTEMPTS {
            backend.fail_upstream("offline");
            assert!(service.process_sync_queue().await.is_err());
        }

        let report = service.process_sync_queue().await.unwrap();

        assert_eq!(report.submitted, 0);
        assert_eq!(backend.upstream_calls().len(), MAX_SYNC_ATTEMPTS as usize);
        let entries = service.list_entries(TENANT).await.unwrap();
        assert_eq!(entries[0].attempts, MAX_SYNC_ATTEMPTS);
        assert_eq!(entries[0].status, QueueStatus::Failed);
        let stats = service.statistics(TENANT).await.unwrap();
        assert_eq!(stats.exhausted_count, 1);
        assert_eq!(service.sync_state(true).await.unwrap(), SyncState::Error);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_exhausted_makes_entry_eligible_again() {
        let (service, backend) = service_with(SyncSettings::default().with_max_attempts(1)).await;
        create(&service, "acc-1").await;
        backend.fail_upstream("offline");
        assert!(service.process_sync_queue().await.is_err());

        assert_eq!(service.retry_exhausted(TENANT).await.unwrap(), 1);
        let report = service.process_sync_queue().await.unwrap();

        assert_eq!(report.acknowledged, 1);
        assert!(service.list_entries(TENANT).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clear_exhausted_drops_entries() {
        let (service, backend) = service_with(SyncSettings::default().with_max_attempts(1)).await;
        create(&service, "acc-1").await;
        backend.fail_upstream("offline");
        assert!(service.process_sync_queue().await.is_err());

        assert_eq!(service.clear_exhausted(TENANT).await.unwrap(), 1);
        assert!(service.list_entries(TENANT).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_synchronize_runs_initial_sync_for_fresh_tenant() {
        let (service, backend) = service().await;
        backend.set_initial(
            EntityType::Account,
            vec![record("acc-1", "2024-01-01T00:00:00Z", "Giro")],
        );

        let report = service.synchronize().await;

        assert!(report.is_success(), "{:?}", report.error);
        assert_eq!(
            report.initial.unwrap().completed,
            vec![EntityType::Account]
        );
        assert!(report.downstream.is_empty());
        let checkpoints = service.checkpoints().await.unwrap();
        assert!(!checkpoints[0].needs_initial_sync());

        // Second pass pulls a delta instead of hydrating again
        let report = service.synchronize().await;
        assert!(report.initial.is_none());
        assert_eq!(report.downstream.len(), 1);
        assert_eq!(backend.initial_calls(), vec![EntityType::Account]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_initial_sync_keeps_completed_collections_after_failure() {
        let (service, backend) = service_with(
            SyncSettings::default().with_tracked_types([EntityType::AccountGroup, EntityType::Account]),
        )
        .await;
        backend.fail_initial(EntityType::Account, "timeout");

        let report = service.initial_sync().await.unwrap();

        assert_eq!(report.completed, vec![EntityType::AccountGroup]);
        assert_eq!(report.failed.len(), 1);

        backend.set_initial(EntityType::Account, Vec::new());
        let report = service.initial_sync().await.unwrap();
        assert_eq!(report.completed, vec![EntityType::Account]);
        assert_eq!(
            backend.initial_calls(),
            vec![
                EntityType::AccountGroup,
                EntityType::Account,
                EntityType::Account
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_synchronize_pushes_before_pulling() {
        let (service, backend) = service().await;
        service
            .session()
            .lock()
            .await
            .unwrap()
            .metadata()
            .set_checkpoint(EntityType::Account, "2024-01-01T00:00:00.000Z")
            .await
            .unwrap();
        service
            .record_local_change(
                EntityType::Account,
                OperationType::Update,
                json!({"id": "acc-1", "updated_at": "2024-03-01T00:00:00Z", "name": "local"}),
            )
            .await
            .unwrap();
        backend.push_delta(
            EntityType::Account,
            DownstreamDelta {
                new_or_updated: vec![record("acc-1", "2024-02-01T00:00:00Z", "remote")],
                deleted_ids: Vec::new(),
                new_last_synced_timestamp: "2024-03-02T00:00:00.000Z".to_string(),
            },
        );

        let report = service.synchronize().await;

        assert!(report.is_success(), "{:?}", report.error);
        assert_eq!(report.upstream.unwrap().acknowledged, 1);
        assert_eq!(report.downstream[0].merge.skipped, 1);
        assert_eq!(
            backend.downstream_calls(),
            vec![(EntityType::Account, "2024-01-01T00:00:00.000Z".to_string())]
        );
        let db = service.session().lock().await.unwrap();
        let stored = db
            .entities()
            .get(EntityType::Account, "acc-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.fields["name"], json!("local"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_downstream_failure_keeps_checkpoint() {
        let (service, backend) = service().await;
        service
            .session()
            .lock()
            .await
            .unwrap()
            .metadata()
            .set_checkpoint(EntityType::Account, "2024-01-01T00:00:00.000Z")
            .await
            .unwrap();
        backend.fail_downstream(EntityType::Account, "bad gateway");

        let report = service.synchronize().await;

        assert!(report.error.unwrap().contains("bad gateway"));
        let checkpoints = service.checkpoints().await.unwrap();
        assert_eq!(
            checkpoints[0].last_synced_at.as_deref(),
            Some("2024-01-01T00:00:00.000Z")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_deleted_remote_record_is_removed_and_checkpoint_advances() {
        let (service, backend) = service().await;
        {
            let db = service.session().lock().await.unwrap();
            db.entities()
                .put(EntityType::Account, &record("acc-2", "2024-01-01T00:00:00Z", "old"))
                .await
                .unwrap();
            db.metadata()
                .set_checkpoint(EntityType::Account, "2024-01-01T00:00:00.000Z")
                .await
                .unwrap();
        }
        backend.push_delta(
            EntityType::Account,
            DownstreamDelta {
                deleted_ids: vec!["acc-2".to_string()],
                new_last_synced_timestamp: "2024-01-05T00:00:00.000Z".to_string(),
                ..DownstreamDelta::default()
            },
        );

        let report = service.sync_downstream(EntityType::Account).await.unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.checkpoint, "2024-01-05T00:00:00.000Z");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_import_records_enqueues_winners() {
        let (service, _) = service().await;
        let stats = service
            .import_records(
                EntityType::Account,
                &[
                    record("acc-1", "2024-01-01T00:00:00Z", "A"),
                    record("acc-2", "2024-01-01T00:00:00Z", "B"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(stats.inserted, 2);
        assert_eq!(service.list_pending(TENANT).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_status_and_remove_missing_entry_are_noops() {
        let (service, _) = service().await;
        assert!(!service
            .update_status("missing", QueueStatus::Processing, None)
            .await
            .unwrap());
        assert!(!service.remove("missing").await.unwrap());
    }
}
