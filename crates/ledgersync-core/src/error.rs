//! Error types for ledgersync-core

use thiserror::Error;

use crate::sync::BackendError;

/// Result type alias using ledgersync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ledgersync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record or queue entry not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No tenant database has been activated for this session
    #[error("No active tenant database")]
    NoActiveTenant,

    /// A call named a tenant other than the active one
    #[error("Tenant mismatch: active tenant is {active}, got {requested}")]
    TenantMismatch { active: String, requested: String },

    /// Remote backend error (transport or API)
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}
