use ledgersync_core::config::SyncSettings;

use crate::commands::common::{
    format_sync_report_lines, format_upstream_report, print_json, CliContext,
};
use crate::error::CliError;

pub async fn run_sync(ctx: &CliContext, as_json: bool) -> Result<(), CliError> {
    let service = ctx.open_sync_service(SyncSettings::default()).await?;
    let report = service.synchronize().await;

    if as_json {
        print_json(&report)?;
    } else {
        for line in format_sync_report_lines(&report) {
            println!("{line}");
        }
    }

    match report.error {
        Some(error) => Err(CliError::SyncFailed(error)),
        None => Ok(()),
    }
}

pub async fn run_push(ctx: &CliContext, as_json: bool) -> Result<(), CliError> {
    let service = ctx.open_sync_service(SyncSettings::default()).await?;
    let report = service.process_sync_queue().await?;

    if as_json {
        print_json(&report)
    } else {
        println!("{}", format_upstream_report(&report));
        Ok(())
    }
}
