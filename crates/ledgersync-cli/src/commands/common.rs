use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use ledgersync_core::config::SyncSettings;
use ledgersync_core::db::default_data_dir;
use ledgersync_core::models::{QueueStatistics, SyncConflict, SyncMetadata, SyncQueueEntry};
use ledgersync_core::sync::{SyncEvent, SyncReport, UpstreamReport};
use ledgersync_core::util::{normalize_text_option, parse_timestamp};
use ledgersync_core::{
    BackendConfig, HttpSyncBackend, SyncService, SyncState, SyncableEntity, TenantDatabase,
    TenantSession,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::CliError;

pub const TENANT_ENV: &str = "LEDGERSYNC_TENANT";
pub const DATA_DIR_ENV: &str = "LEDGERSYNC_DATA_DIR";

/// Where a command reads and writes, resolved from flags and environment
#[derive(Debug, Clone)]
pub struct CliContext {
    pub data_dir: PathBuf,
    pub tenant: Option<String>,
    pub backend_config: Option<PathBuf>,
}

impl CliContext {
    pub fn resolve(
        tenant: Option<String>,
        data_dir: Option<PathBuf>,
        backend_config: Option<PathBuf>,
    ) -> Result<Self, CliError> {
        Ok(Self {
            data_dir: resolve_data_dir(data_dir)?,
            tenant: normalize_text_option(tenant)
                .or_else(|| normalize_text_option(env::var(TENANT_ENV).ok())),
            backend_config,
        })
    }

    pub fn tenant_id(&self) -> Result<&str, CliError> {
        self.tenant.as_deref().ok_or(CliError::MissingTenant)
    }

    pub async fn open_database(&self) -> Result<TenantDatabase, CliError> {
        Ok(TenantDatabase::open_in_dir(&self.data_dir, self.tenant_id()?).await?)
    }

    /// Backend connection, if any is configured
    pub fn backend(&self) -> Result<Option<BackendConfig>, CliError> {
        if let Some(path) = &self.backend_config {
            return Ok(Some(BackendConfig::from_file(path)?));
        }
        Ok(BackendConfig::from_env()?)
    }

    pub async fn open_sync_service(
        &self,
        settings: SyncSettings,
    ) -> Result<SyncService<HttpSyncBackend>, CliError> {
        let config = self.backend()?.ok_or(CliError::BackendNotConfigured)?;
        let backend = HttpSyncBackend::new(&config)?;
        let db = self.open_database().await?;
        tracing::debug!(backend = backend.base_url(), "Sync backend configured");
        Ok(SyncService::new(
            TenantSession::with_database(db),
            backend,
            settings,
        ))
    }
}

pub fn resolve_data_dir(cli_data_dir: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_data_dir.or_else(|| env::var_os(DATA_DIR_ENV).map(PathBuf::from)) {
        return Ok(path);
    }
    default_data_dir().map_err(|_| CliError::MissingDataDir)
}

#[derive(Debug, Serialize)]
pub struct StatusItem<'a> {
    pub tenant_id: &'a str,
    pub state: SyncState,
    pub statistics: &'a QueueStatistics,
    pub checkpoints: &'a [SyncMetadata],
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Record from the argument, or from piped stdin when the argument is absent
pub fn resolve_record(raw: Option<&str>) -> Result<Value, CliError> {
    if let Some(content) = raw.and_then(normalize_content) {
        return parse_record(&content);
    }
    if let Some(content) = read_piped_stdin()? {
        return parse_record(&content);
    }
    Err(CliError::EmptyPayload)
}

pub fn parse_record(content: &str) -> Result<Value, CliError> {
    let record: Value = serde_json::from_str(content)?;
    if record_id(&record).is_none() {
        return Err(CliError::InvalidRecord);
    }
    Ok(record)
}

/// The record's `id`, accepting strings and numbers
pub fn record_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(id) => normalize_content(id),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

pub fn parse_import(content: &str) -> Result<Vec<SyncableEntity>, CliError> {
    let values: Vec<Value> =
        serde_json::from_str(content).map_err(|error| CliError::InvalidImport(error.to_string()))?;
    values
        .into_iter()
        .map(|value| SyncableEntity::from_value(value).map_err(CliError::from))
        .collect()
}

pub fn normalize_record_id(id: &str) -> Result<String, CliError> {
    normalize_content(id).ok_or(CliError::EmptyRecordId)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn format_entity_lines(entities: &[SyncableEntity], now: DateTime<Utc>) -> Vec<String> {
    entities
        .iter()
        .map(|entity| {
            let summary = entity_summary(entity, 40);
            let relative_time = format_relative_time(&entity.updated_at, now);
            format!("{:<36}  {summary:<40}  {relative_time}", entity.id)
        })
        .collect()
}

/// Compact one-line rendering of the record's non-sync fields
pub fn entity_summary(entity: &SyncableEntity, max_chars: usize) -> String {
    let summary = ["name", "title", "description", "label"]
        .iter()
        .find_map(|key| entity.fields.get(*key).and_then(Value::as_str))
        .map_or_else(
            || Value::Object(entity.fields.clone()).to_string(),
            str::to_string,
        );
    let collapsed = summary.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_queue_entry_lines(entries: &[SyncQueueEntry], now: DateTime<Utc>) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let short_id = entry.id.chars().take(13).collect::<String>();
            let target = format!("{}/{}", entry.entity_type, entry.entity_id);
            let line = format!(
                "{short_id:<13}  {:<6}  {target:<40}  {:<10}  attempts={}  {}",
                entry.operation_type.as_str(),
                entry.status.as_str(),
                entry.attempts,
                format_relative_time(&entry.timestamp, now)
            );
            match &entry.error {
                Some(error) => format!("{line}  error={error}"),
                None => line,
            }
        })
        .collect()
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<4}  {}/{}  local={} incoming={}",
                format_sync_timestamp(&conflict.resolved_at),
                conflict.strategy,
                conflict.entity_type,
                conflict.entity_id,
                conflict.local_updated_at,
                conflict.incoming_updated_at
            )
        })
        .collect()
}

pub fn format_status_lines(
    tenant_id: &str,
    state: SyncState,
    stats: &QueueStatistics,
    checkpoints: &[SyncMetadata],
) -> Vec<String> {
    let mut lines = vec![
        format!("tenant      {tenant_id}"),
        format!("state       {state}"),
        format!(
            "queue       pending={} processing={} failed={} exhausted={}",
            stats.pending_count, stats.processing_count, stats.failed_count, stats.exhausted_count
        ),
    ];
    if let Some(oldest) = &stats.oldest_pending {
        lines.push(format!("oldest      {}", format_sync_timestamp(oldest)));
    }
    if let Some(error) = &stats.last_error_message {
        lines.push(format!("last error  {error}"));
    }
    for metadata in checkpoints {
        let checkpoint = metadata
            .last_synced_at
            .as_deref()
            .map_or_else(|| "never".to_string(), format_sync_timestamp);
        lines.push(format!("synced      {:<16}  {checkpoint}", metadata.entity_type.as_str()));
    }
    lines
}

pub fn format_upstream_report(report: &UpstreamReport) -> String {
    format!(
        "pushed {} change(s): {} acknowledged, {} failed, {} exhausted",
        report.submitted, report.acknowledged, report.failed, report.exhausted
    )
}

pub fn format_sync_report_lines(report: &SyncReport) -> Vec<String> {
    let mut lines = Vec::new();
    if report.reset_stuck > 0 {
        lines.push(format!("reclaimed {} stuck change(s)", report.reset_stuck));
    }
    if let Some(upstream) = &report.upstream {
        lines.push(format_upstream_report(upstream));
    }
    if let Some(initial) = &report.initial {
        for entity_type in &initial.completed {
            lines.push(format!("hydrated {entity_type}"));
        }
        for (entity_type, message) in &initial.failed {
            lines.push(format!("hydrating {entity_type} failed: {message}"));
        }
    }
    for downstream in &report.downstream {
        lines.push(format!(
            "pulled {:<16} +{} ~{} ={} !{} -{}  checkpoint {}",
            downstream.entity_type.as_str(),
            downstream.merge.inserted,
            downstream.merge.updated,
            downstream.merge.skipped,
            downstream.merge.excluded,
            downstream.deleted,
            format_sync_timestamp(&downstream.checkpoint)
        ));
    }
    if lines.is_empty() {
        lines.push("nothing to sync".to_string());
    }
    lines
}

pub fn format_event(event: &SyncEvent) -> String {
    match event {
        SyncEvent::UpstreamCompleted(report) => format_upstream_report(report),
        SyncEvent::SyncCompleted(report) => format_sync_report_lines(report).join("; "),
        SyncEvent::SyncFailed { message } => format!("sync failed: {message}"),
    }
}

pub fn format_sync_timestamp(timestamp: &str) -> String {
    parse_timestamp(timestamp).map_or_else(
        || timestamp.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp: &str, now: DateTime<Utc>) -> String {
    let Some(instant) = parse_timestamp(timestamp) else {
        return timestamp.to_string();
    };
    let diff = now
        .signed_duration_since(instant)
        .num_milliseconds()
        .max(0);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
