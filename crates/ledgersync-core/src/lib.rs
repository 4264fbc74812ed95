//! ledgersync-core - Core library for ledgersync
//!
//! This crate contains the tenant database, the sync queue and the
//! last-write-wins reconciliation used by every ledgersync client.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use config::{BackendConfig, SyncSettings};
pub use db::TenantDatabase;
pub use error::{Error, Result};
pub use models::{EntityType, OperationType, QueueStatus, SyncQueueEntry, SyncableEntity};
pub use services::TenantSession;
pub use state::SyncState;
pub use sync::{HttpSyncBackend, SyncService};
