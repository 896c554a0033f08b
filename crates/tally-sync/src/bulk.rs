//! # Bulk Collection Syncer
//!
//! One-shot full-collection diff behind the "sync now" action.
//!
//! ## Decision Table
//! ```text
//! ┌──────────────────────────┬───────────────────────────────────────────────┐
//! │ local vs remote (by id)  │ action                                        │
//! ├──────────────────────────┼───────────────────────────────────────────────┤
//! │ local only               │ create remotely under the local id            │
//! │ remote only              │ nothing (deletes are never inferred)          │
//! │ local updated_at newer   │ push local                                    │
//! │ remote updated_at newer  │ resolver given: push resolver(local, remote)  │
//! │                          │ no resolver:    conflict, remote untouched    │
//! │ same updated_at          │ nothing                                       │
//! └──────────────────────────┴───────────────────────────────────────────────┘
//! ```
//!
//! Conflicts are always handed back to the caller. Nothing here picks a
//! winner on its own.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use tally_core::{DomainRecord, Filter};

use crate::error::SyncResult;
use crate::reconciler::decode_all;
use crate::remote::RemoteStore;

/// Callback deciding the merged value when the remote copy is newer.
pub type Resolver<'a, T> = &'a (dyn Fn(&T, &T) -> T + Send + Sync);

/// Why a bulk write happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    /// The record did not exist remotely.
    Created,
    /// The local copy was newer.
    Pushed,
    /// The resolver's output was written.
    Resolved,
}

/// A write performed by a bulk sync.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedWrite<T> {
    pub id: String,
    pub action: BulkAction,
    pub record: T,
}

/// A record where the remote copy is newer and no resolver was given.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConflict<T> {
    pub id: String,
    pub local: T,
    pub remote: T,
}

/// Result of [`BulkSyncer::reconcile`].
#[derive(Debug, Clone, PartialEq)]
pub struct BulkSyncReport<T> {
    pub applied: Vec<AppliedWrite<T>>,
    pub conflicts: Vec<SyncConflict<T>>,
}

impl<T> Default for BulkSyncReport<T> {
    fn default() -> Self {
        BulkSyncReport {
            applied: Vec::new(),
            conflicts: Vec::new(),
        }
    }
}

impl<T> BulkSyncReport<T> {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

pub struct BulkSyncer {
    remote: Arc<dyn RemoteStore>,
}

impl BulkSyncer {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        BulkSyncer { remote }
    }

    /// Diffs `local` against the full remote collection and writes the
    /// differences.
    ///
    /// A failed write aborts the sync; writes already made stay applied.
    pub async fn reconcile<T: DomainRecord>(
        &self,
        local: &[T],
        resolver: Option<Resolver<'_, T>>,
    ) -> SyncResult<BulkSyncReport<T>> {
        let docs = self.remote.query(T::COLLECTION, &Filter::All).await?;
        let remote: HashMap<String, T> = decode_all::<T>(&docs)
            .into_iter()
            .map(|r| (r.id().to_string(), r))
            .collect();

        let mut report = BulkSyncReport::default();

        for record in local {
            let id = record.id();

            let Some(theirs) = remote.get(id) else {
                self.remote
                    .create(T::COLLECTION, Some(id), record.to_payload()?)
                    .await?;
                report.applied.push(AppliedWrite {
                    id: id.to_string(),
                    action: BulkAction::Created,
                    record: record.clone(),
                });
                continue;
            };

            if record.updated_at() > theirs.updated_at() {
                self.remote
                    .update(T::COLLECTION, id, record.to_payload()?)
                    .await?;
                report.applied.push(AppliedWrite {
                    id: id.to_string(),
                    action: BulkAction::Pushed,
                    record: record.clone(),
                });
            } else if record.updated_at() < theirs.updated_at() {
                match resolver {
                    Some(resolve) => {
                        let merged = resolve(record, theirs);
                        if &merged == theirs {
                            debug!(collection = T::COLLECTION, id = %id, "Resolver kept remote copy");
                            continue;
                        }
                        self.remote
                            .update(T::COLLECTION, id, merged.to_payload()?)
                            .await?;
                        report.applied.push(AppliedWrite {
                            id: id.to_string(),
                            action: BulkAction::Resolved,
                            record: merged,
                        });
                    }
                    None => report.conflicts.push(SyncConflict {
                        id: id.to_string(),
                        local: record.clone(),
                        remote: theirs.clone(),
                    }),
                }
            }
        }

        info!(
            collection = T::COLLECTION,
            local = local.len(),
            remote = remote.len(),
            applied = report.applied.len(),
            conflicts = report.conflicts.len(),
            "Bulk sync complete"
        );

        Ok(report)
    }
}
