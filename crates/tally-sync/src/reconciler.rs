//! # Real-time Reconciler
//!
//! Merges the live snapshot stream of a collection with local optimistic
//! state, so the UI never snaps back to a stale value while a write is in
//! flight.
//!
//! ## Merge Rules (per snapshot)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     merge_snapshot(authoritative)                       │
//! │                                                                         │
//! │  for each authoritative record (first occurrence of an id wins):       │
//! │    id locally deleted and pending ──► drop                              │
//! │    id pending and in local view   ──► keep LOCAL version                │
//! │    otherwise                      ──► adopt authoritative verbatim      │
//! │                                                                         │
//! │  for each local pending-add missing from the snapshot:                 │
//! │    still pending and key not taken by an authoritative record          │
//! │                                   ──► keep (optimistic create)          │
//! │    otherwise                      ──► drop                              │
//! │                                                                         │
//! │  dedupe by uniqueness key, earliest created wins                       │
//! │    removed anything? ──► warn + IntegrityWarning (upstream bug)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Merges run under the view lock, so a snapshot and a local edit never
//! interleave halfway through a merge.

use futures_util::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tally_core::{DomainRecord, Filter, KeyPolicy, UniquenessKey};

use crate::error::{SyncError, SyncResult};
use crate::events::{IntegrityWarning, IntegrityWarningKind, SyncEventEmitter};
use crate::pending::PendingSet;
use crate::remote::{Document, RemoteStore};

struct ViewState<T> {
    records: Vec<T>,
    /// Ids created locally and not yet seen in a snapshot.
    pending_adds: HashSet<String>,
    /// Ids deleted locally whose delete has not been confirmed.
    pending_removals: HashSet<String>,
}

impl<T> Default for ViewState<T> {
    fn default() -> Self {
        ViewState {
            records: Vec::new(),
            pending_adds: HashSet::new(),
            pending_removals: HashSet::new(),
        }
    }
}

/// Materialized view of one collection.
pub struct Reconciler<T: DomainRecord> {
    state: Arc<RwLock<ViewState<T>>>,
    view_tx: Arc<watch::Sender<Vec<T>>>,
    pending: PendingSet,
    policy: KeyPolicy,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl<T: DomainRecord> Clone for Reconciler<T> {
    fn clone(&self) -> Self {
        Reconciler {
            state: self.state.clone(),
            view_tx: self.view_tx.clone(),
            pending: self.pending.clone(),
            policy: self.policy,
            emitter: self.emitter.clone(),
        }
    }
}

impl<T: DomainRecord> Reconciler<T> {
    pub fn new(pending: PendingSet, policy: KeyPolicy, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        let (view_tx, _rx) = watch::channel(Vec::new());
        Reconciler {
            state: Arc::new(RwLock::new(ViewState::default())),
            view_tx: Arc::new(view_tx),
            pending,
            policy,
            emitter,
        }
    }

    /// Current merged view.
    pub async fn view(&self) -> Vec<T> {
        self.state.read().await.records.clone()
    }

    /// Receiver notified with every new merged view.
    pub fn subscribe_view(&self) -> watch::Receiver<Vec<T>> {
        self.view_tx.subscribe()
    }

    fn publish(&self, records: &[T]) {
        self.view_tx.send_replace(records.to_vec());
    }

    // =========================================================================
    // Optimistic local edits
    // =========================================================================

    /// Shows a locally created record before the remote confirms it.
    pub async fn local_create(&self, record: T) {
        self.pending.insert(record.id()).await;

        let mut state = self.state.write().await;
        state.pending_adds.insert(record.id().to_string());
        upsert_record(&mut state.records, record);
        self.publish(&state.records);
    }

    /// Shows a local edit and protects it from incoming snapshots.
    pub async fn local_update(&self, record: T) {
        self.pending.insert(record.id()).await;

        let mut state = self.state.write().await;
        upsert_record(&mut state.records, record);
        self.publish(&state.records);
    }

    /// Hides a record until its delete is confirmed.
    pub async fn local_delete(&self, id: &str) {
        self.pending.insert(id).await;

        let mut state = self.state.write().await;
        state.pending_adds.remove(id);
        state.pending_removals.insert(id.to_string());
        state.records.retain(|r| r.id() != id);
        self.publish(&state.records);
    }

    // =========================================================================
    // Snapshot merge
    // =========================================================================

    /// Merges one authoritative snapshot into the view and returns the new
    /// view.
    pub async fn merge_snapshot(&self, authoritative: Vec<T>) -> Vec<T> {
        let pending = self.pending.snapshot().await;
        let mut state = self.state.write().await;

        let local_by_id: HashMap<&str, &T> =
            state.records.iter().map(|r| (r.id(), r)).collect();

        let mut merged: Vec<T> = Vec::with_capacity(authoritative.len());
        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut auth_keys: HashSet<UniquenessKey> = HashSet::new();
        let mut collisions = 0usize;

        for record in authoritative {
            if !seen_ids.insert(record.id().to_string()) {
                collisions += 1;
                continue;
            }
            auth_keys.insert(record.uniqueness_key(&self.policy));

            let id = record.id();
            if !pending.contains(id) {
                merged.push(record);
                continue;
            }

            if state.pending_removals.contains(id) {
                continue;
            }

            match local_by_id.get(id) {
                Some(local) => merged.push((*local).clone()),
                None => merged.push(record),
            }
        }

        for local in &state.records {
            let id = local.id();
            if seen_ids.contains(id)
                || !state.pending_adds.contains(id)
                || !pending.contains(id)
            {
                continue;
            }

            if auth_keys.contains(&local.uniqueness_key(&self.policy)) {
                debug!(
                    collection = T::COLLECTION,
                    id = %id,
                    "Dropping optimistic add already present under another id"
                );
                continue;
            }

            merged.push(local.clone());
        }

        let (view, removed) = dedupe_by_key(merged, &self.policy);

        state
            .pending_adds
            .retain(|id| pending.contains(id) && !seen_ids.contains(id));
        state.pending_removals.retain(|id| pending.contains(id));
        state.records = view.clone();
        self.publish(&state.records);
        drop(state);

        if collisions > 0 {
            self.warn(
                IntegrityWarningKind::IdCollision,
                collisions,
                format!("{} records in the snapshot reused an id", collisions),
            );
        }
        if removed > 0 {
            self.warn(
                IntegrityWarningKind::DuplicateInView,
                removed,
                format!("{} records shared a uniqueness key with another", removed),
            );
        }

        view
    }

    fn warn(&self, kind: IntegrityWarningKind, removed: usize, detail: String) {
        warn!(
            collection = T::COLLECTION,
            kind = %kind,
            removed,
            "{}",
            detail
        );
        self.emitter.emit_integrity_warning(&IntegrityWarning {
            collection: T::COLLECTION.to_string(),
            kind,
            removed,
            detail,
        });
    }

    // =========================================================================
    // Live subscription
    // =========================================================================

    /// Drives this view from the collection's live snapshot stream.
    pub async fn subscribe(&self, remote: Arc<dyn RemoteStore>) -> SyncResult<ReconcilerHandle> {
        self.subscribe_filtered(remote, Filter::All).await
    }

    /// Same as [`Reconciler::subscribe`], restricted to matching documents.
    pub async fn subscribe_filtered(
        &self,
        remote: Arc<dyn RemoteStore>,
        filter: Filter,
    ) -> SyncResult<ReconcilerHandle> {
        let mut stream = remote.snapshot(T::COLLECTION, filter).await?;
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let reconciler = self.clone();

        let task = tokio::spawn(async move {
            info!(collection = T::COLLECTION, "Reconciler starting");

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,

                    next = stream.next() => match next {
                        Some(docs) => {
                            let records = decode_all::<T>(&docs);
                            reconciler.merge_snapshot(records).await;
                        }
                        None => {
                            info!(collection = T::COLLECTION, "Snapshot stream ended");
                            break;
                        }
                    }
                }
            }

            info!(collection = T::COLLECTION, "Reconciler stopped");
        });

        Ok(ReconcilerHandle { shutdown_tx, task })
    }
}

/// Handle on a running snapshot subscription.
pub struct ReconcilerHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ReconcilerHandle {
    /// Tears down the snapshot stream and waits for the task to finish.
    pub async fn unsubscribe(self) -> SyncResult<()> {
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .map_err(|e| SyncError::Internal(format!("Reconciler task failed: {}", e)))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn upsert_record<T: DomainRecord>(records: &mut Vec<T>, record: T) {
    match records.iter_mut().find(|r| r.id() == record.id()) {
        Some(existing) => *existing = record,
        None => records.push(record),
    }
}

pub(crate) fn decode_all<T: DomainRecord>(docs: &[Document]) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match doc.decode::<T>() {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(collection = T::COLLECTION, id = %doc.id, error = %e, "Skipping undecodable document");
                None
            }
        })
        .collect()
}

/// Keeps one record per uniqueness key: the earliest created, the first
/// seen on a tie. Survivors keep the position of their key's first
/// occurrence.
///
/// ## Returns
/// The deduplicated records and how many were dropped.
pub(crate) fn dedupe_by_key<T: DomainRecord>(records: Vec<T>, policy: &KeyPolicy) -> (Vec<T>, usize) {
    let mut out: Vec<T> = Vec::with_capacity(records.len());
    let mut slot_by_key: HashMap<UniquenessKey, usize> = HashMap::new();
    let mut removed = 0;

    for record in records {
        let key = record.uniqueness_key(policy);
        match slot_by_key.get(&key) {
            Some(&slot) => {
                removed += 1;
                if record.created_at() < out[slot].created_at() {
                    out[slot] = record;
                }
            }
            None => {
                slot_by_key.insert(key, out.len());
                out.push(record);
            }
        }
    }

    (out, removed)
}
