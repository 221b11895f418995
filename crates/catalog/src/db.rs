//! Database connection, migrations and the schema version gate.

use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{
    SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

use crate::error::{ErrorKind, Result};

/// Embedded migrations that are run automatically on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
/// Version of the catalog layout this build reads and writes.
pub const SCHEMA_VERSION: i64 = 1;
// One writer (a pass) plus a few readers from the serving side.
const MAX_CONNECTIONS: u32 = 5;

/// Connection pool for the catalog.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    async fn new(options: SqliteConnectOptions, max: Option<u32>) -> Result<Self> {
        let mut pool_options = SqlitePoolOptions::new()
            // Query-based PRAGMAs have to be applied to every pooled
            // connection, not just the first one.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(max.unwrap_or(MAX_CONNECTIONS));
        if max.is_some() {
            // Closing the only connection would drop the database with it.
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool };
        db.check_schema_version().await?;
        db.migrate().await?;
        db.record_schema_version().await?;
        Ok(db)
    }

    /// Connect to the catalog at the given path, creating it if needed.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "Opening catalog database");
        let options = Self::base_options().filename(path).create_if_missing(true);
        Self::new(options, None).await
    }

    /// Connect to an in-memory catalog.
    ///
    /// Not `#[cfg(test)]`: other crates use it in their tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // Every in-memory connection is its own database, so the pool must
        // never open a second one.
        Self::new(options, Some(1)).await
    }

    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            // Readers keep seeing the last committed pass while a new one runs.
            .journal_mode(SqliteJournalMode::Wal)
            // Children can't outlive their file row.
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(1500))
            .auto_vacuum(SqliteAutoVacuum::None)
    }

    /// PRAGMAs that aren't exposed via SqliteConnectOptions.
    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA wal_autocheckpoint = 800;
                PRAGMA cache_size = -8192;
                PRAGMA temp_store = MEMORY;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Refuse to touch a catalog written by a newer build. Runs before
    /// migrations so nothing is written to it.
    async fn check_schema_version(&self) -> Result<()> {
        match self.schema_version().await? {
            Some(found) if found > SCHEMA_VERSION => {
                tracing::error!(found, supported = SCHEMA_VERSION, "Catalog was written by a newer version");
                exn::bail!(ErrorKind::UnsupportedSchema(found))
            },
            _ => Ok(()),
        }
    }

    /// The recorded schema version, or `None` for a fresh database.
    pub async fn schema_version(&self) -> Result<Option<i64>> {
        let tables: i64 = sqlx::query_scalar(include_str!("../queries/metadata_table_exists.sql"))
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if tables == 0 {
            return Ok(None);
        }
        sqlx::query_scalar(include_str!("../queries/get_schema_version.sql"))
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    async fn record_schema_version(&self) -> Result<()> {
        sqlx::query(include_str!("../queries/upsert_schema_version.sql"))
            .bind(SCHEMA_VERSION)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    #[instrument("performing catalog migrations", skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, waiting for connections to be returned first.
    pub async fn close(&self) {
        // Let SQLite update query planner statistics
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_in_memory() {
        let db = Database::connect_in_memory().await.unwrap();
        assert!(!db.pool().is_closed());
        assert_eq!(db.schema_version().await.unwrap(), Some(SCHEMA_VERSION));
        db.close().await;
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = Database::connect_in_memory().await.unwrap();
        db.migrate().await.unwrap();
        db.record_schema_version().await.unwrap();
        assert_eq!(db.schema_version().await.unwrap(), Some(SCHEMA_VERSION));
        db.close().await;
    }

    #[tokio::test]
    async fn test_pragmas_are_applied() {
        let db = Database::connect_in_memory().await.unwrap();
        let row: (i64,) = sqlx::query_as("PRAGMA foreign_keys").fetch_one(db.pool()).await.unwrap();
        assert_eq!(row.0, 1, "foreign_keys should be ON");
        let row: (i64,) = sqlx::query_as("PRAGMA wal_autocheckpoint").fetch_one(db.pool()).await.unwrap();
        assert_eq!(row.0, 800, "WAL checkpoint should be 800");
        db.close().await;
    }

    #[tokio::test]
    async fn test_recorded_version_never_goes_backwards() {
        let db = Database::connect_in_memory().await.unwrap();
        sqlx::query("UPDATE metadata SET value = '7' WHERE key = 'schema_version'").execute(db.pool()).await.unwrap();
        db.record_schema_version().await.unwrap();
        assert_eq!(db.schema_version().await.unwrap(), Some(7));
        let err = db.check_schema_version().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedSchema(7)));
        db.close().await;
    }

    #[tokio::test]
    async fn test_newer_catalog_is_rejected_on_connect() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("catalog.sqlite");
        let db = Database::connect(&path).await.unwrap();
        sqlx::query("UPDATE metadata SET value = '99' WHERE key = 'schema_version'").execute(db.pool()).await.unwrap();
        db.close().await;
        let err = Database::connect(&path).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedSchema(99)));
    }
}
