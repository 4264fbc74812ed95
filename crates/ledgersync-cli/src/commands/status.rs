use ledgersync_core::db::{SyncMetadataRepository, SyncQueueRepository};
use ledgersync_core::{EntityType, SyncState};

use crate::commands::common::{format_status_lines, print_json, CliContext, StatusItem};
use crate::error::CliError;

pub async fn run_status(ctx: &CliContext, as_json: bool) -> Result<(), CliError> {
    let db = ctx.open_database().await?;
    let stats = db.queue().statistics(db.tenant_id()).await?;
    let checkpoints = db.metadata().list_checkpoints(&EntityType::ALL).await?;
    // Without a backend nothing can be pushed, which reads as offline
    let online = ctx.backend()?.is_some();
    let state = SyncState::from_statistics(&stats, online);

    if as_json {
        return print_json(&StatusItem {
            tenant_id: db.tenant_id(),
            state,
            statistics: &stats,
            checkpoints: &checkpoints,
        });
    }

    for line in format_status_lines(db.tenant_id(), state, &stats, &checkpoints) {
        println!("{line}");
    }
    Ok(())
}
