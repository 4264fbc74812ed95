//! Tenant database connection management

use std::path::{Path, PathBuf};

use libsql::{Builder, Connection, Database as LibSqlDatabase};

use super::migrations;
use super::{LibSqlEntityRepository, LibSqlSyncMetadataRepository, LibSqlSyncQueueRepository};
use crate::error::{Error, Result};
use crate::util::validate_tenant_id;

/// One tenant's local database: entity collections, outbox and checkpoints.
pub struct TenantDatabase {
    // Keeps the underlying database alive for as long as the connection is used
    _db: LibSqlDatabase,
    conn: Connection,
    tenant_id: String,
    path: Option<PathBuf>,
}

impl TenantDatabase {
    /// Open the tenant database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>, tenant_id: &str) -> Result<Self> {
        let tenant_id = validate_tenant_id(tenant_id).map_err(Error::InvalidInput)?;
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        let database = Self {
            _db: db,
            conn,
            tenant_id,
            path: Some(path),
        };
        database.configure().await?;
        database.migrate().await?;
        tracing::debug!(tenant_id = %database.tenant_id, "Opened tenant database");
        Ok(database)
    }

    /// Open the tenant's database inside a data directory
    ///
    /// Layout: `<data_dir>/tenants/<tenant_id>.db`
    pub async fn open_in_dir(data_dir: impl AsRef<Path>, tenant_id: &str) -> Result<Self> {
        let path = tenant_db_path(data_dir.as_ref(), tenant_id)?;
        Self::open(path, tenant_id).await
    }

    /// Open an in-memory database (useful for testing)
    pub async fn open_in_memory(tenant_id: &str) -> Result<Self> {
        let tenant_id = validate_tenant_id(tenant_id).map_err(Error::InvalidInput)?;
        let db = Builder::new_local(":memory:").build().await?;
        let conn = db.connect()?;

        let database = Self {
            _db: db,
            conn,
            tenant_id,
            path: None,
        };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Configure `SQLite` for optimal performance
    async fn configure(&self) -> Result<()> {
        // WAL is unavailable for in-memory databases
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        self.conn
            .execute("PRAGMA busy_timeout = 5000;", ())
            .await
            .ok();
        Ok(())
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn).await
    }

    /// Tenant this database belongs to
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// On-disk location, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Outbox repository
    pub const fn queue(&self) -> LibSqlSyncQueueRepository<'_> {
        LibSqlSyncQueueRepository::new(&self.conn)
    }

    /// Entity store repository
    pub const fn entities(&self) -> LibSqlEntityRepository<'_> {
        LibSqlEntityRepository::new(&self.conn)
    }

    /// Checkpoint and conflict-log repository
    pub const fn metadata(&self) -> LibSqlSyncMetadataRepository<'_> {
        LibSqlSyncMetadataRepository::new(&self.conn)
    }
}

/// Path of a tenant's database file inside `data_dir`
pub fn tenant_db_path(data_dir: &Path, tenant_id: &str) -> Result<PathBuf> {
    let tenant_id = validate_tenant_id(tenant_id).map_err(Error::InvalidInput)?;
    Ok(data_dir.join("tenants").join(format!("{tenant_id}.db")))
}

/// Default data directory (`$XDG_DATA_HOME/ledgersync` on Linux)
pub fn default_data_dir() -> Result<PathBuf> {
    let mut path = dirs::data_dir()
        .ok_or_else(|| Error::Database("user data directory is unavailable".to_string()))?;
    path.push("ledgersync");
    Ok(path)
}

/// Commit when `outcome` is `Ok`, roll back otherwise
pub(crate) async fn finish_transaction<T>(conn: &Connection, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            if let Err(e) = conn.execute("COMMIT", ()).await {
                conn.execute("ROLLBACK", ()).await.ok();
                return Err(e.into());
            }
            Ok(value)
        }
        Err(e) => {
            conn.execute("ROLLBACK", ()).await.ok();
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_in_memory() {
        let db = TenantDatabase::open_in_memory("tenant-a").await.unwrap();
        assert_eq!(db.tenant_id(), "tenant-a");
        assert!(db.path().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_rejects_invalid_tenant() {
        assert!(TenantDatabase::open_in_memory("../escape").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_in_dir_creates_tenant_file() {
        let tmp = tempdir().unwrap();
        let db = TenantDatabase::open_in_dir(tmp.path(), "acme").await.unwrap();

        let expected = tmp.path().join("tenants").join("acme.db");
        assert_eq!(db.path(), Some(expected.as_path()));
        assert!(expected.exists());
    }

    #[test]
    fn tenant_db_path_isolates_tenants() {
        let root = Path::new("/data");
        assert_ne!(
            tenant_db_path(root, "a").unwrap(),
            tenant_db_path(root, "b").unwrap()
        );
        assert!(tenant_db_path(root, "a/b").is_err());
    }
}
