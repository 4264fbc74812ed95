use std::time::Duration;

use chrono::Utc;
use ledgersync_core::db::SyncQueueRepository;

use crate::cli::QueueCommands;
use crate::commands::common::{format_queue_entry_lines, print_json, CliContext};
use crate::error::CliError;

pub async fn run_queue(ctx: &CliContext, command: QueueCommands) -> Result<(), CliError> {
    let db = ctx.open_database().await?;
    let queue = db.queue();
    let tenant_id = db.tenant_id();

    match command {
        QueueCommands::List { json } => {
            let entries = queue.list_all(tenant_id).await?;
            if json {
                return print_json(&entries);
            }
            if entries.is_empty() {
                println!("Sync queue is empty.");
            }
            for line in format_queue_entry_lines(&entries, Utc::now()) {
                println!("{line}");
            }
        }
        QueueCommands::ResetStuck { timeout_secs } => {
            let reset = queue
                .reset_stuck_processing(tenant_id, Duration::from_secs(timeout_secs))
                .await?;
            println!("reset {reset} stuck change(s)");
        }
        QueueCommands::Retry => {
            let retried = queue.retry_exhausted(tenant_id).await?;
            println!("re-queued {retried} change(s)");
        }
        QueueCommands::ClearExhausted => {
            let cleared = queue.clear_exhausted(tenant_id).await?;
            println!("cleared {cleared} change(s)");
        }
    }
    Ok(())
}
