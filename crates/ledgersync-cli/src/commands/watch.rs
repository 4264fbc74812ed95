use std::sync::Arc;
use std::time::Duration;

use ledgersync_core::config::SyncSettings;
use ledgersync_core::sync::SyncWorker;
use tokio::sync::broadcast::error::RecvError;

use crate::commands::common::{format_event, CliContext};
use crate::error::CliError;

pub async fn run_watch(ctx: &CliContext, interval_secs: Option<u64>) -> Result<(), CliError> {
    let mut settings = SyncSettings::default();
    if let Some(secs) = interval_secs {
        settings = settings.with_sync_interval(Some(Duration::from_secs(secs.max(1))));
    }
    let interval = settings.sync_interval;

    let service = Arc::new(ctx.open_sync_service(settings).await?);
    let (handle, task) = SyncWorker::spawn(service).await;
    let mut events = handle.subscribe();

    println!(
        "Watching tenant {} (every {}s). Press Ctrl-C to stop.",
        ctx.tenant_id()?,
        interval.map_or(0, |period| period.as_secs())
    );
    handle.synchronize().await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", format_event(&event)),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Dropped sync events");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown().await;
    if let Err(error) = task.await {
        tracing::error!("Sync worker ended abnormally: {error}");
    }
    Ok(())
}
