//! Background task driving the sync service.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use super::{SyncBackend, SyncReport, SyncService, UpstreamReport};

const COMMAND_BUFFER: usize = 8;
const EVENT_BUFFER: usize = 32;

/// Work requested from the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    Upstream,
    Synchronize,
    Shutdown,
}

/// Outcome broadcast after each pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    UpstreamCompleted(UpstreamReport),
    SyncCompleted(SyncReport),
    SyncFailed { message: String },
}

/// Cloneable handle to a running [`SyncWorker`].
///
/// The worker stops once every handle is dropped or [`Self::shutdown`] is
/// called.
#[derive(Clone, Debug)]
pub struct SyncHandle {
    commands: mpsc::Sender<SyncCommand>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncHandle {
    /// Request an upstream drain without waiting.
    ///
    /// Requests made while the command buffer is full collapse into the ones
    /// already queued. Returns `false` once the worker has stopped.
    pub fn trigger_upstream(&self) -> bool {
        !matches!(
            self.commands.try_send(SyncCommand::Upstream),
            Err(mpsc::error::TrySendError::Closed(_))
        )
    }

    /// Queue a full sync pass; `false` once the worker has stopped
    pub async fn synchronize(&self) -> bool {
        self.commands.send(SyncCommand::Synchronize).await.is_ok()
    }

    pub async fn shutdown(&self) {
        if self.commands.send(SyncCommand::Shutdown).await.is_err() {
            tracing::debug!("Sync worker already stopped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// Serial executor for sync passes.
///
/// Commands run one at a time in arrival order. With a sync interval
/// configured, a full pass also runs on every tick.
pub struct SyncWorker<B> {
    service: Arc<SyncService<B>>,
    commands: mpsc::Receiver<SyncCommand>,
    events: broadcast::Sender<SyncEvent>,
    interval: Option<Duration>,
}

impl<B: SyncBackend + 'static> SyncWorker<B> {
    /// Start the worker and connect local writes on `service` to it
    pub async fn spawn(service: Arc<SyncService<B>>) -> (SyncHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        service.attach_trigger(&command_tx).await;

        let worker = Self {
            interval: service.settings().sync_interval,
            service,
            commands: command_rx,
            events: events.clone(),
        };
        let task = tokio::spawn(worker.run());
        let handle = SyncHandle {
            commands: command_tx,
            events,
        };
        (handle, task)
    }

    async fn run(mut self) {
        let mut ticker = self.interval.map(|period| {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        tracing::info!(interval = ?self.interval, "Sync worker started");

        loop {
            let command = tokio::select! {
                command = self.commands.recv() => command.unwrap_or(SyncCommand::Shutdown),
                () = next_tick(ticker.as_mut()) => SyncCommand::Synchronize,
            };
            match command {
                SyncCommand::Upstream => self.upstream().await,
                SyncCommand::Synchronize => self.synchronize().await,
                SyncCommand::Shutdown => break,
            }
        }

        self.service.detach_trigger().await;
        tracing::info!("Sync worker stopped");
    }

    async fn upstream(&self) {
        let event = match self.service.process_sync_queue().await {
            Ok(report) => SyncEvent::UpstreamCompleted(report),
            Err(error) => {
                tracing::warn!("Background upstream failed: {error}");
                SyncEvent::SyncFailed {
                    message: error.to_string(),
                }
            }
        };
        self.publish(event);
    }

    async fn synchronize(&self) {
        let report = self.service.synchronize().await;
        let event = match &report.error {
            None => SyncEvent::SyncCompleted(report),
            Some(message) => SyncEvent::SyncFailed {
                message: message.clone(),
            },
        };
        self.publish(event);
    }

    fn publish(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

async fn next_tick(ticker: Option<&mut Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncSettings;
    use crate::db::TenantDatabase;
    use crate::models::{EntityType, OperationType};
    use crate::services::TenantSession;
    use crate::sync::testing::ScriptedBackend;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn spawn_worker(
        settings: SyncSettings,
    ) -> (Arc<SyncService<ScriptedBackend>>, SyncHandle, JoinHandle<()>) {
        let db = TenantDatabase::open_in_memory("tenant-a").await.unwrap();
        let service = Arc::new(SyncService::new(
            TenantSession::with_database(db),
            ScriptedBackend::new(),
            settings,
        ));
        let (handle, task) = SyncWorker::spawn(Arc::clone(&service)).await;
        (service, handle, task)
    }

    async fn next_event(events: &mut broadcast::Receiver<SyncEvent>) -> SyncEvent {
        time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("worker event")
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_local_change_triggers_upstream_drain() {
        let (service, handle, task) = spawn_worker(SyncSettings::default()).await;
        let mut events = handle.subscribe();

        service
            .record_local_change(
                EntityType::Account,
                OperationType::Create,
                json!({"id": "acc-1", "name": "Giro"}),
            )
            .await
            .unwrap();

        match next_event(&mut events).await {
            SyncEvent::UpstreamCompleted(report) => assert_eq!(report.acknowledged, 1),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(service.list_entries("tenant-a").await.unwrap().is_empty());
        assert_eq!(service.backend().upstream_calls().len(), 1);

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_synchronize_command_publishes_report() {
        let (_service, handle, task) = spawn_worker(
            SyncSettings::default().with_tracked_types([EntityType::Category]),
        )
        .await;
        let mut events = handle.subscribe();

        assert!(handle.synchronize().await);

        match next_event(&mut events).await {
            SyncEvent::SyncCompleted(report) => {
                assert_eq!(report.initial.unwrap().completed, vec![EntityType::Category]);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_pass_is_published() {
        let (service, handle, task) = spawn_worker(SyncSettings::default()).await;
        let mut events = handle.subscribe();
        service.session().deactivate().await;

        assert!(handle.trigger_upstream());

        match next_event(&mut events).await {
            SyncEvent::SyncFailed { message } => assert!(message.contains("tenant")),
            other => panic!("unexpected event: {other:?}"),
        }

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_interval_runs_full_pass() {
        let (_service, handle, task) = spawn_worker(
            SyncSettings::default()
                .with_tracked_types([EntityType::Account])
                .with_sync_interval(Some(Duration::from_millis(20))),
        )
        .await;
        let mut events = handle.subscribe();

        assert!(matches!(
            next_event(&mut events).await,
            SyncEvent::SyncCompleted(_)
        ));

        handle.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_worker_stops_when_handles_are_dropped() {
        let (service, handle, task) = spawn_worker(SyncSettings::default()).await;
        drop(handle);

        time::timeout(Duration::from_secs(5), task)
            .await
            .expect("worker stops")
            .unwrap();
        // Local writes still succeed without a worker
        service
            .record_local_change(
                EntityType::Account,
                OperationType::Create,
                json!({"id": "acc-1"}),
            )
            .await
            .unwrap();
    }
}
