//! # Durable Queue Store
//!
//! String-keyed byte storage that survives process restarts. The operation
//! queue, the failed list and the last sync time each live under one key.
//!
//! Two implementations:
//! - [`tally_db::Database`]: SQLite file, used in production
//! - [`MemoryDurableStore`]: process-local map, used in tests and when no
//!   database path is configured

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use tally_db::Database;

use crate::error::SyncResult;

/// Asynchronous key/value persistence for queue state.
///
/// A `set` fully replaces the previous value. Implementations must not
/// interleave two writes to the same key.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Returns the bytes stored under `key`, `None` if absent.
    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8]) -> SyncResult<()>;

    /// Writes several keys atomically: after an error none of them has
    /// changed.
    async fn set_many(&self, entries: &[(&str, &[u8])]) -> SyncResult<()>;

    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> SyncResult<()>;
}

#[async_trait]
impl DurableStore for Database {
    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        Ok(self.kv().get(key).await?)
    }

    async fn set(&self, key: &str, value: &[u8]) -> SyncResult<()> {
        Ok(self.kv().set(key, value).await?)
    }

    async fn set_many(&self, entries: &[(&str, &[u8])]) -> SyncResult<()> {
        Ok(self.kv().set_many(entries).await?)
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        self.kv().remove(key).await?;
        Ok(())
    }
}

/// In-process store. Contents are lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryDurableStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> SyncResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn set_many(&self, entries: &[(&str, &[u8])]) -> SyncResult<()> {
        let mut map = self.entries.write().await;
        for (key, value) in entries {
            map.insert(key.to_string(), value.to_vec());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
