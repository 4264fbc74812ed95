//! Sync tuning and backend connection settings.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{EntityType, MAX_SYNC_ATTEMPTS};
use crate::sync::{BackendError, BackendResult};
use crate::util::{is_http_url, normalize_text_option};

pub const DEFAULT_STUCK_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub const API_URL_ENV: &str = "LEDGERSYNC_API_URL";
pub const API_TOKEN_ENV: &str = "LEDGERSYNC_API_TOKEN";
pub const API_TIMEOUT_ENV: &str = "LEDGERSYNC_API_TIMEOUT_SECS";

/// Knobs of the sync algorithms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Attempts after which an entry is no longer retried automatically
    pub max_attempts: u32,
    /// How long an entry may stay `processing` before maintenance reclaims it
    pub stuck_timeout: Duration,
    /// Entries per upstream request
    pub batch_size: usize,
    /// Period of the background worker, `None` to only sync on demand
    pub sync_interval: Option<Duration>,
    /// Collections hydrated and pulled downstream, in order
    pub tracked_types: Vec<EntityType>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_attempts: MAX_SYNC_ATTEMPTS,
            stuck_timeout: DEFAULT_STUCK_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
            sync_interval: Some(DEFAULT_SYNC_INTERVAL),
            tracked_types: EntityType::ALL.to_vec(),
        }
    }
}

impl SyncSettings {
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub const fn with_stuck_timeout(mut self, timeout: Duration) -> Self {
        self.stuck_timeout = timeout;
        self
    }

    /// Zero is treated as one entry per request
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Option<Duration>) -> Self {
        self.sync_interval = interval;
        self
    }

    #[must_use]
    pub fn with_tracked_types(mut self, tracked_types: impl Into<Vec<EntityType>>) -> Self {
        self.tracked_types = tracked_types.into();
        self
    }
}

/// Where and how to reach the sync backend
#[derive(Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// `http(s)://` base URL without trailing slash
    pub base_url: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// On-disk form of [`BackendConfig`]
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BackendConfigFile {
    pub base_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> BackendResult<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url.into())?,
            auth_token: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = normalize_text_option(token);
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read the config from the process environment.
    ///
    /// `Ok(None)` when no API URL is configured.
    pub fn from_env() -> BackendResult<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the config through `lookup`, keyed by the `LEDGERSYNC_API_*` names
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> BackendResult<Option<Self>> {
        let Some(base_url) = normalize_text_option(lookup(API_URL_ENV)) else {
            return Ok(None);
        };

        let timeout = match normalize_text_option(lookup(API_TIMEOUT_ENV)) {
            Some(raw) => Duration::from_secs(raw.parse::<u64>().map_err(|_| {
                BackendError::InvalidConfiguration(format!(
                    "{API_TIMEOUT_ENV} must be a whole number of seconds, got '{raw}'"
                ))
            })?),
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        Ok(Some(
            Self::new(base_url)?
                .with_auth_token(lookup(API_TOKEN_ENV))
                .with_timeout(timeout),
        ))
    }

    /// Load a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: BackendConfigFile = serde_json::from_str(&raw)?;
        Ok(Self::try_from(file)?)
    }
}

impl TryFrom<BackendConfigFile> for BackendConfig {
    type Error = BackendError;

    fn try_from(value: BackendConfigFile) -> BackendResult<Self> {
        let timeout = value
            .timeout_secs
            .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs);
        Ok(Self::new(value.base_url)?
            .with_auth_token(value.auth_token)
            .with_timeout(timeout))
    }
}

fn normalize_base_url(raw: String) -> BackendResult<String> {
    let url = normalize_text_option(Some(raw)).ok_or_else(|| {
        BackendError::InvalidConfiguration("base URL must not be empty".to_string())
    })?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(BackendError::InvalidConfiguration(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}
