//! # In-Memory Remote Store
//!
//! A [`RemoteStore`] held entirely in process memory.
//!
//! Used as the remote in tests and demos. Besides the store primitives it
//! can simulate an outage ([`MemoryRemoteStore::set_available`]), fail the
//! next N writes to a given id ([`MemoryRemoteStore::fail_writes_for`]) and
//! report how many writes were attempted per id.
//!
//! Snapshots are pushed through one `watch` channel per collection, so a
//! slow listener only ever sees the latest state, never a backlog.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{watch, Mutex};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tracing::debug;
use uuid::Uuid;

use tally_core::Filter;

use super::{Document, RemoteStore, SnapshotStream};
use crate::error::{SyncError, SyncResult};

#[derive(Default)]
struct MemoryState {
    /// Documents per collection, in insertion order.
    collections: HashMap<String, Vec<Document>>,
    watchers: HashMap<String, watch::Sender<Vec<Document>>>,
    unavailable: bool,
    scripted_failures: HashMap<String, u32>,
    attempts: HashMap<String, u32>,
}

impl MemoryState {
    /// Counts the attempt and applies outage/scripted failures.
    fn begin_write(&mut self, id: Option<&str>) -> SyncResult<()> {
        if let Some(id) = id {
            *self.attempts.entry(id.to_string()).or_insert(0) += 1;
        }

        if self.unavailable {
            return Err(SyncError::Network("remote store unavailable".into()));
        }

        if let Some(id) = id {
            if let Some(remaining) = self.scripted_failures.get_mut(id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SyncError::Network(format!("write to {} timed out", id)));
                }
            }
        }

        Ok(())
    }

    fn docs_mut(&mut self, collection: &str) -> &mut Vec<Document> {
        self.collections.entry(collection.to_string()).or_default()
    }

    /// Pushes the collection's current state to its listeners.
    fn publish(&self, collection: &str) {
        if let Some(tx) = self.watchers.get(collection) {
            let docs = self.collections.get(collection).cloned().unwrap_or_default();
            tx.send_replace(docs);
        }
    }
}

/// Process-local remote store.
#[derive(Default)]
pub struct MemoryRemoteStore {
    state: Mutex<MemoryState>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage: while unavailable every write and query fails
    /// with a network error.
    pub async fn set_available(&self, available: bool) {
        self.state.lock().await.unavailable = !available;
    }

    /// Makes the next `times` writes targeting `id` fail with a network
    /// error. `u32::MAX` is effectively "always".
    pub async fn fail_writes_for(&self, id: &str, times: u32) {
        self.state
            .lock()
            .await
            .scripted_failures
            .insert(id.to_string(), times);
    }

    /// Number of writes attempted against `id`, failed ones included.
    pub async fn attempts_for(&self, id: &str) -> u32 {
        self.state
            .lock()
            .await
            .attempts
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    /// Current documents of `collection`, bypassing outage simulation.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.state
            .lock()
            .await
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Writes a document directly, as another device would.
    pub async fn insert_raw(&self, collection: &str, doc: Document) {
        let mut state = self.state.lock().await;
        let docs = state.docs_mut(collection);
        match docs.iter_mut().find(|d| d.id == doc.id) {
            Some(existing) => existing.data = doc.data,
            None => docs.push(doc),
        }
        state.publish(collection);
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn create(&self, collection: &str, id: Option<&str>, data: Value) -> SyncResult<String> {
        let mut state = self.state.lock().await;
        state.begin_write(id)?;

        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let docs = state.docs_mut(collection);
        match docs.iter_mut().find(|d| d.id == id) {
            Some(existing) => existing.data = data,
            None => docs.push(Document::new(id.clone(), data)),
        }
        state.publish(collection);

        debug!(collection = %collection, id = %id, "Remote create");
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, data: Value) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        state.begin_write(Some(id))?;

        let doc = state
            .docs_mut(collection)
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| SyncError::RemoteNotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        match (&mut doc.data, data) {
            (Value::Object(existing), Value::Object(fields)) => existing.extend(fields),
            (slot, other) => *slot = other,
        }
        state.publish(collection);

        debug!(collection = %collection, id = %id, "Remote update");
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        state.begin_write(Some(id))?;

        state.docs_mut(collection).retain(|d| d.id != id);
        state.publish(collection);

        debug!(collection = %collection, id = %id, "Remote delete");
        Ok(())
    }

    async fn query(&self, collection: &str, filter: &Filter) -> SyncResult<Vec<Document>> {
        let state = self.state.lock().await;
        if state.unavailable {
            return Err(SyncError::Network("remote store unavailable".into()));
        }

        Ok(state
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| filter.matches(&d.id, &d.data))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn snapshot(&self, collection: &str, filter: Filter) -> SyncResult<SnapshotStream> {
        let mut state = self.state.lock().await;
        let current = state.collections.get(collection).cloned().unwrap_or_default();
        let rx = state
            .watchers
            .entry(collection.to_string())
            .or_insert_with(|| watch::channel(current).0)
            .subscribe();

        let stream = WatchStream::new(rx).map(move |docs| {
            docs.into_iter()
                .filter(|d| filter.matches(&d.id, &d.data))
                .collect::<Vec<_>>()
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_with_and_without_id() {
        let remote = MemoryRemoteStore::new();

        let assigned = remote.create("products", None, json!({"name": "Tea"})).await.unwrap();
        let chosen = remote
            .create("products", Some("p-1"), json!({"name": "Milk"}))
            .await
            .unwrap();

        assert_eq!(chosen, "p-1");
        let ids: Vec<_> = remote
            .documents("products")
            .await
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![assigned, "p-1".to_string()]);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let remote = MemoryRemoteStore::new();
        remote
            .create("products", Some("p-1"), json!({"name": "Tea", "price_cents": 100}))
            .await
            .unwrap();

        remote
            .update("products", "p-1", json!({"price_cents": 120}))
            .await
            .unwrap();

        let docs = remote.documents("products").await;
        assert_eq!(docs[0].data, json!({"name": "Tea", "price_cents": 120}));
    }

    #[tokio::test]
    async fn test_update_missing_document() {
        let remote = MemoryRemoteStore::new();
        let err = remote.update("products", "ghost", json!({})).await.unwrap_err();
        assert!(matches!(err, SyncError::RemoteNotFound { .. }));
    }

    #[tokio::test]
    async fn test_scripted_failures_then_success() {
        let remote = MemoryRemoteStore::new();
        remote.fail_writes_for("p-1", 2).await;

        for _ in 0..2 {
            let err = remote.create("products", Some("p-1"), json!({})).await.unwrap_err();
            assert!(err.is_retryable());
        }
        remote.create("products", Some("p-1"), json!({})).await.unwrap();

        assert_eq!(remote.attempts_for("p-1").await, 3);
        assert_eq!(remote.documents("products").await.len(), 1);
    }

    #[tokio::test]
    async fn test_outage_blocks_queries() {
        let remote = MemoryRemoteStore::new();
        remote.set_available(false).await;
        assert!(remote.query("sales", &Filter::All).await.is_err());

        remote.set_available(true).await;
        assert!(remote.query("sales", &Filter::All).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_pushes_full_state() {
        let remote = MemoryRemoteStore::new();
        remote.create("sales", Some("s-1"), json!({"total_cents": 5})).await.unwrap();

        let mut stream = remote.snapshot("sales", Filter::All).await.unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.len(), 1);

        remote.create("sales", Some("s-2"), json!({"total_cents": 7})).await.unwrap();
        let second = stream.next().await.unwrap();
        let ids: Vec<_> = second.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["s-1", "s-2"]);
    }

    #[tokio::test]
    async fn test_snapshot_applies_filter() {
        let remote = MemoryRemoteStore::new();
        remote.create("sales", Some("s-1"), json!({"total_cents": 5})).await.unwrap();
        remote.create("sales", Some("s-2"), json!({"total_cents": 7})).await.unwrap();

        let mut stream = remote
            .snapshot("sales", Filter::eq("total_cents", 7))
            .await
            .unwrap();
        let docs = stream.next().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "s-2");
    }
}
