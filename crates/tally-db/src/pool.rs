//! # Queue Store Database
//!
//! Opens the SQLite file that backs the Durable Queue Store.
//!
//! ```text
//! SyncEngine::open(config)
//!      │  queue.database_path
//!      ▼
//! Database::new(DbConfig::new(path))
//!      ├── file:   WAL journal, created on first open
//!      ├── memory: one connection kept for the pool's lifetime
//!      └── embedded migrations
//! ```
//!
//! The queue is rewritten on every mutation. WAL keeps those writes cheap
//! and a crash mid-write leaves the previous value intact.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::kv::KvRepository;

const MEMORY_PATH: &str = ":memory:";

/// Where the queue store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub database_path: PathBuf,
    /// One writer plus a reader by default.
    pub max_connections: u32,
}

impl DbConfig {
    /// A file-backed store. The file is created if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 2,
        }
    }

    /// A process-local store, gone when the pool closes.
    ///
    /// Every connection to `:memory:` opens a separate database, so the
    /// pool is pinned to one.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(MEMORY_PATH),
            max_connections: 1,
        }
    }

    fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == MEMORY_PATH
    }

    fn connect_options(&self) -> DbResult<SqliteConnectOptions> {
        let options = if self.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
        } else {
            SqliteConnectOptions::new()
                .filename(&self.database_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };

        Ok(options
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5)))
    }
}

/// Handle on the queue store database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens the pool and applies pending migrations.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(path = %config.database_path.display(), "Opening queue store");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(config.connect_options()?)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        migrations::run_migrations(&pool).await?;

        Ok(Database { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Returns the key/value repository.
    pub fn kv(&self) -> KvRepository {
        KvRepository::new(self.pool.clone())
    }

    /// Waits for in-flight writes and closes every connection.
    pub async fn close(&self) {
        info!("Closing queue store");
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_is_migrated() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let (total, applied) = migrations::migration_status(db.pool()).await.unwrap();
        assert_eq!(total, applied);
        assert!(total >= 1);
    }

    #[test]
    fn test_memory_path_detection() {
        assert!(DbConfig::in_memory().is_in_memory());
        assert!(!DbConfig::new("/tmp/queue.db").is_in_memory());
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");

        {
            let db = Database::new(DbConfig::new(&path)).await.unwrap();
            db.kv().set("pendingOperations", b"[1,2,3]").await.unwrap();
            db.close().await;
        }

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        let raw = db.kv().get("pendingOperations").await.unwrap();
        assert_eq!(raw.as_deref(), Some(&b"[1,2,3]"[..]));
    }
}
