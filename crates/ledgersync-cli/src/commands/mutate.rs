use std::path::Path;

use chrono::Utc;
use ledgersync_core::db::EntityRepository;
use ledgersync_core::sync::{import_batch, MergeStats};
use ledgersync_core::{EntityType, OperationType, SyncQueueEntry, SyncableEntity};
use serde_json::Value;

use crate::commands::common::{
    format_entity_lines, normalize_record_id, parse_import, print_json, record_id,
    resolve_record, CliContext,
};
use crate::error::CliError;

pub async fn run_put(
    ctx: &CliContext,
    entity_type: EntityType,
    record: Option<&str>,
) -> Result<(), CliError> {
    let record = resolve_record(record)?;
    let entry = put_record(ctx, entity_type, record).await?;
    println!("{} {}", entry.operation_type.as_str(), entry.entity_id);
    Ok(())
}

/// Create the record when it is new locally, update it otherwise
pub async fn put_record(
    ctx: &CliContext,
    entity_type: EntityType,
    record: Value,
) -> Result<SyncQueueEntry, CliError> {
    let id = record_id(&record).ok_or(CliError::InvalidRecord)?;
    let db = ctx.open_database().await?;
    let operation = if db.entities().get(entity_type, &id).await?.is_some() {
        OperationType::Update
    } else {
        OperationType::Create
    };
    Ok(db.record_local_change(entity_type, operation, record).await?)
}

pub async fn run_delete(ctx: &CliContext, entity_type: EntityType, id: &str) -> Result<(), CliError> {
    let id = normalize_record_id(id)?;
    let db = ctx.open_database().await?;
    if db.entities().get(entity_type, &id).await?.is_none() {
        tracing::warn!(entity_type = %entity_type, id = %id, "Record not found locally; queueing delete anyway");
    }
    let entry = db
        .record_local_change(entity_type, OperationType::Delete, Value::String(id))
        .await?;
    println!("delete {}", entry.entity_id);
    Ok(())
}

pub async fn run_import(ctx: &CliContext, entity_type: EntityType, path: &Path) -> Result<(), CliError> {
    let records = parse_import(&std::fs::read_to_string(path)?)?;
    let stats = import_records(ctx, entity_type, &records).await?;

    println!(
        "imported {} record(s): {} inserted, {} updated, {} skipped, {} excluded",
        records.len(),
        stats.inserted,
        stats.updated,
        stats.skipped,
        stats.excluded
    );
    Ok(())
}

/// Bulk import through the shared LWW import path; no backend needed
pub async fn import_records(
    ctx: &CliContext,
    entity_type: EntityType,
    records: &[SyncableEntity],
) -> Result<MergeStats, CliError> {
    let db = ctx.open_database().await?;
    Ok(import_batch(&db, entity_type, records).await?)
}

pub async fn run_list(
    ctx: &CliContext,
    entity_type: EntityType,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let db = ctx.open_database().await?;
    let mut entities = db.entities().list(entity_type).await?;
    entities.truncate(limit);

    if as_json {
        return print_json(&entities);
    }
    if entities.is_empty() {
        println!("No {entity_type} records stored locally.");
        return Ok(());
    }
    for line in format_entity_lines(&entities, Utc::now()) {
        println!("{line}");
    }
    Ok(())
}
