//! ledgersync CLI - drive the local-first ledger sync from a terminal
//!
//! Writes records into a tenant's local database, inspects its sync queue
//! and runs sync passes against the configured backend.

mod cli;
mod commands;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::common::CliContext;
use crate::commands::completions::run_completions;
use crate::commands::conflicts::run_conflicts;
use crate::commands::mutate::{run_delete, run_import, run_list, run_put};
use crate::commands::queue::run_queue;
use crate::commands::status::run_status;
use crate::commands::sync::{run_push, run_sync};
use crate::commands::watch::run_watch;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ledgersync=info,ledgersync_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let ctx = CliContext::resolve(cli.tenant, cli.data_dir, cli.backend_config)?;

    match cli.command {
        Commands::Put {
            entity_type,
            record,
        } => run_put(&ctx, entity_type, record.as_deref()).await?,
        Commands::Delete { entity_type, id } => run_delete(&ctx, entity_type, &id).await?,
        Commands::Import { entity_type, path } => run_import(&ctx, entity_type, &path).await?,
        Commands::List {
            entity_type,
            limit,
            json,
        } => run_list(&ctx, entity_type, limit, json).await?,
        Commands::Sync { json } => run_sync(&ctx, json).await?,
        Commands::Push { json } => run_push(&ctx, json).await?,
        Commands::Status { json } => run_status(&ctx, json).await?,
        Commands::Queue { command } => run_queue(&ctx, command).await?,
        Commands::Conflicts { limit, json } => run_conflicts(&ctx, limit, json).await?,
        Commands::Watch { interval_secs } => run_watch(&ctx, interval_secs).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
