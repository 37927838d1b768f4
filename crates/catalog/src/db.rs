//! The SQLite catalog file and its connection pool.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Readers run alongside the single writer in WAL mode.
const POOL_SIZE: u32 = 4;
/// Concurrent import workers queue on the write lock for this long before
/// giving up with `SQLITE_BUSY`.
const WRITE_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the catalog at `path` and brings its schema
    /// up to date.
    #[instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await.or_raise(|| ErrorKind::Database)?;
        }
        let options = connect_options().filename(path).create_if_missing(true);
        Self::open(options, POOL_SIZE).await
    }

    /// A private catalog that lives as long as the pool. Public so other
    /// crates can test against a real catalog.
    pub async fn connect_in_memory() -> Result<Self> {
        // Each in-memory connection would see its own empty database.
        Self::open(connect_options().filename(":memory:"), 1).await
    }

    async fn open(options: SqliteConnectOptions, connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(connections)
            .after_connect(|conn, meta| Box::pin(tune(conn, meta)))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    #[instrument(level = "debug", skip_all)]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Refreshes planner statistics, then waits for every connection to be
    /// returned and closes the pool.
    pub async fn close(&self) {
        if let Err(e) = sqlx::query("PRAGMA optimize").execute(&self.pool).await {
            tracing::debug!(error = %e, "Could not optimize catalog before closing");
        }
        self.pool.close().await;
    }
}

fn connect_options() -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(WRITE_WAIT)
}

/// Per-connection settings that `SqliteConnectOptions` has no setter for.
async fn tune(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
    sqlx::query("PRAGMA temp_store = MEMORY; PRAGMA cache_size = -4096;").execute(conn).await?;
    Ok(())
}
