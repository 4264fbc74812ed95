//! Active-tenant handle shared by the sync service and its callers.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::db::TenantDatabase;
use crate::error::{Error, Result};

/// Holds at most one active tenant database.
///
/// Activating a tenant replaces the previous one; every sync entry point
/// fails with [`Error::NoActiveTenant`] while nothing is active.
#[derive(Clone, Default)]
pub struct TenantSession {
    active: Arc<Mutex<Option<TenantDatabase>>>,
}

impl TenantSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Session with `db` already active
    pub fn with_database(db: TenantDatabase) -> Self {
        Self {
            active: Arc::new(Mutex::new(Some(db))),
        }
    }

    /// Open `<data_dir>/tenants/<tenant_id>.db` and make it active
    pub async fn open_in_dir(data_dir: impl AsRef<Path>, tenant_id: &str) -> Result<Self> {
        let db = TenantDatabase::open_in_dir(data_dir, tenant_id).await?;
        Ok(Self::with_database(db))
    }

    /// Make `db` the active tenant, returning the one it replaces
    pub async fn activate(&self, db: TenantDatabase) -> Option<TenantDatabase> {
        tracing::info!(tenant_id = db.tenant_id(), "Activated tenant");
        self.active.lock().await.replace(db)
    }

    /// Tear down the active tenant
    pub async fn deactivate(&self) -> Option<TenantDatabase> {
        let previous = self.active.lock().await.take();
        if let Some(db) = &previous {
            tracing::info!(tenant_id = db.tenant_id(), "Deactivated tenant");
        }
        previous
    }

    /// Id of the active tenant, if any
    pub async fn tenant_id(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|db| db.tenant_id().to_string())
    }

    /// Exclusive access to the active tenant database
    pub async fn lock(&self) -> Result<MappedMutexGuard<'_, TenantDatabase>> {
        MutexGuard::try_map(self.active.lock().await, Option::as_mut)
            .map_err(|_| Error::NoActiveTenant)
    }

    /// Like [`Self::lock`], but also checks that `tenant_id` is the active tenant
    pub async fn lock_tenant(&self, tenant_id: &str) -> Result<MappedMutexGuard<'_, TenantDatabase>> {
        let db = self.lock().await?;
        if db.tenant_id() != tenant_id {
            return Err(Error::TenantMismatch {
                active: db.tenant_id().to_string(),
                requested: tenant_id.to_string(),
            });
        }
        Ok(db)
    }
}
