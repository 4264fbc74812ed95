use ledgersync_core::db::SyncMetadataRepository;

use crate::commands::common::{format_sync_conflict_lines, print_json, CliContext};
use crate::error::CliError;

pub async fn run_conflicts(ctx: &CliContext, limit: usize, as_json: bool) -> Result<(), CliError> {
    let db = ctx.open_database().await?;
    let conflicts = db.metadata().list_conflicts(limit).await?;

    if as_json {
        return print_json(&conflicts);
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
