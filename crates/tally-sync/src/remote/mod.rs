//! # Remote Store
//!
//! The hosted document store the engine writes to and listens on.
//!
//! ## Primitives
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       RemoteStore primitives                            │
//! │                                                                         │
//! │  create(collection, id?, data) ──► id      Sync Executor               │
//! │  update(collection, id, data)              Sync Executor, Bulk Syncer  │
//! │  delete(collection, id)                    Sync Executor, sweep        │
//! │  query(collection, filter) ──► [doc]       Duplicate Guard, upsert     │
//! │  snapshot(collection, filter) ──► stream   Reconciler                  │
//! │                                                                         │
//! │  Every call is a suspension point. Nothing else suspends.              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Snapshots are full state per tick, never diffs: each item yielded by the
//! stream is the complete, ordered list of matching documents.

pub mod memory;

pub use memory::MemoryRemoteStore;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

use tally_core::{CoreResult, DomainRecord, Filter};

use crate::error::SyncResult;

/// One stored document: its id plus the JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Document {
            id: id.into(),
            data,
        }
    }

    /// Reads the document as a domain record.
    pub fn decode<T: DomainRecord>(&self) -> CoreResult<T> {
        T::from_document(&self.id, &self.data)
    }
}

/// Push-based stream of full collection states.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Vec<Document>> + Send>>;

/// Client for the hosted document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Inserts a document. With `id`, the document is written under that id
    /// (replacing any existing body); without, the store assigns one.
    ///
    /// ## Returns
    /// The id the document was stored under.
    async fn create(&self, collection: &str, id: Option<&str>, data: Value) -> SyncResult<String>;

    /// Shallow-merges `data` into an existing document.
    ///
    /// ## Errors
    /// `SyncError::RemoteNotFound` if no document has this id.
    async fn update(&self, collection: &str, id: &str, data: Value) -> SyncResult<()>;

    /// Deletes a document. Deleting a missing document succeeds.
    async fn delete(&self, collection: &str, id: &str) -> SyncResult<()>;

    /// Returns the matching documents in store order.
    async fn query(&self, collection: &str, filter: &Filter) -> SyncResult<Vec<Document>>;

    /// Opens a live snapshot stream. The first item is the current state.
    async fn snapshot(&self, collection: &str, filter: Filter) -> SyncResult<SnapshotStream>;
}
