//! # Pending Set
//!
//! Record ids with a local write in flight. While an id is in the set the
//! reconciler keeps the local version of that record over whatever the
//! snapshot stream says.
//!
//! Ids leave the set when the executor reaches a terminal outcome for the
//! last operation targeting them, or when they sit in the set longer than
//! the configured TTL with no operation left to resolve them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::warn;

/// Shared set of pending record ids, each stamped with when it was added.
#[derive(Clone, Debug, Default)]
pub struct PendingSet {
    inner: Arc<RwLock<HashMap<String, Instant>>>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `id` pending. Re-adding refreshes its timestamp.
    pub async fn insert(&self, id: impl Into<String>) {
        self.inner.write().await.insert(id.into(), Instant::now());
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.inner.write().await.remove(id).is_some()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.read().await.contains_key(id)
    }

    /// Point-in-time copy of the ids, for one merge pass.
    pub async fn snapshot(&self) -> HashSet<String> {
        self.inner.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    /// Releases ids older than `ttl` that no active operation targets.
    ///
    /// ## Returns
    /// The released ids.
    pub async fn expire_stale(&self, ttl: Duration, active_targets: &HashSet<String>) -> Vec<String> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;

        let stale: Vec<String> = inner
            .iter()
            .filter(|(id, added)| {
                now.duration_since(**added) >= ttl && !active_targets.contains(id.as_str())
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            inner.remove(id);
            warn!(id = %id, "Releasing stuck pending id");
        }

        stale
    }
}
