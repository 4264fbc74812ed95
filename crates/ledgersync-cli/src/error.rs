use std::io;

use ledgersync_core::sync::BackendError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] ledgersync_core::Error),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No record provided")]
    EmptyPayload,
    #[error("Record must be a JSON object with an \"id\" field")]
    InvalidRecord,
    #[error("Import file must contain a JSON array of records: {0}")]
    InvalidImport(String),
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("No tenant selected. Pass --tenant or set LEDGERSYNC_TENANT.")]
    MissingTenant,
    #[error("Could not resolve a data directory. Pass --data-dir or set LEDGERSYNC_DATA_DIR.")]
    MissingDataDir,
    #[error(
        "Sync backend is not configured. Pass --backend-config or set LEDGERSYNC_API_URL (and optionally LEDGERSYNC_API_TOKEN)."
    )]
    BackendNotConfigured,
    #[error("Sync finished with errors: {0}")]
    SyncFailed(String),
}
