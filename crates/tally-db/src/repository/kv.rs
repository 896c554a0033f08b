//! # Key/Value Repository
//!
//! Byte values by string key, one row per key in `queue_store`.
//!
//! Writes are upserts: setting an existing key replaces its value in a
//! single statement, so readers see either the old or the new queue, never a
//! mix. `set_many` extends that to several keys at once.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;

const UPSERT: &str = r#"
    INSERT INTO queue_store (key, value, updated_at)
    VALUES (?1, ?2, ?3)
    ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        updated_at = excluded.updated_at
"#;

/// Repository for the queue store table.
#[derive(Debug, Clone)]
pub struct KvRepository {
    pool: SqlitePool,
}

impl KvRepository {
    /// Creates a new KvRepository.
    pub fn new(pool: SqlitePool) -> Self {
        KvRepository { pool }
    }

    /// Returns the value stored under `key`, if any.
    pub async fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT value FROM queue_store WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value)
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub async fn set(&self, key: &str, value: &[u8]) -> DbResult<()> {
        self.set_many(&[(key, value)]).await
    }

    /// Stores several keys in one transaction: either every value is
    /// replaced or none is.
    pub async fn set_many(&self, entries: &[(&str, &[u8])]) -> DbResult<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for (key, value) in entries {
            debug!(key = %key, bytes = value.len(), "Writing queue store key");
            sqlx::query(UPSERT)
                .bind(*key)
                .bind(*value)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Removes `key`. Removing a missing key is not an error.
    ///
    /// ## Returns
    /// Whether a row was deleted.
    pub async fn remove(&self, key: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM queue_store WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
