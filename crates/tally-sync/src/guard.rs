//! # Duplicate Guard
//!
//! Keeps at most one record per uniqueness key, proactively and reactively.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Duplicate Guard                                │
//! │                                                                         │
//! │  PRE-WRITE CHECK  assert_unique(record)                                │
//! │  ───────────────                                                       │
//! │   queued creates ──┐                                                    │
//! │   remote.query ────┼──► same key, other id? ──► Err(Duplicate)          │
//! │                    └──► none               ──► Ok (may enqueue)         │
//! │   remote.query fails ──► warn, Ok  (availability over strictness)      │
//! │                                                                         │
//! │  SWEEP  sweep::<T>()                                                   │
//! │  ─────                                                                 │
//! │   remote.query(all) ──► bucket by key ──► keep earliest created        │
//! │                                       └─► delete the rest              │
//! │   returns the number deleted                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both sides derive keys through [`DomainRecord::uniqueness_key`], so a
//! record the check lets through is never one the sweep would delete, and
//! the other way round.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use tally_core::{DomainRecord, Filter, KeyPolicy, UniquenessKey};

use crate::error::{SyncError, SyncResult};
use crate::events::{IntegrityWarning, IntegrityWarningKind, SyncEventEmitter};
use crate::reconciler::decode_all;
use crate::remote::RemoteStore;

/// Records to keep and to delete, as decided by a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan<T> {
    pub keep: Vec<T>,
    pub remove: Vec<T>,
}

/// Buckets records by uniqueness key and keeps the earliest created per
/// bucket. Ties on `created_at` go to the smaller id so the choice is
/// stable across devices.
pub fn plan_sweep<T: DomainRecord>(records: Vec<T>, policy: &KeyPolicy) -> SweepPlan<T> {
    let mut order: Vec<UniquenessKey> = Vec::new();
    let mut buckets: HashMap<UniquenessKey, Vec<T>> = HashMap::new();

    for record in records {
        let key = record.uniqueness_key(policy);
        if !buckets.contains_key(&key) {
            order.push(key.clone());
        }
        buckets.entry(key).or_default().push(record);
    }

    let mut plan = SweepPlan {
        keep: Vec::new(),
        remove: Vec::new(),
    };

    for key in order {
        let Some(mut bucket) = buckets.remove(&key) else {
            continue;
        };
        bucket.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });

        let mut members = bucket.into_iter();
        if let Some(survivor) = members.next() {
            plan.keep.push(survivor);
        }
        plan.remove.extend(members);
    }

    plan
}

/// Pre-write check and sweep against the remote store.
pub struct DuplicateGuard {
    remote: Arc<dyn RemoteStore>,
    policy: KeyPolicy,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl DuplicateGuard {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        policy: KeyPolicy,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Self {
        DuplicateGuard {
            remote,
            policy,
            emitter,
        }
    }

    fn duplicate<T: DomainRecord>(key: &UniquenessKey, existing_id: &str) -> SyncError {
        SyncError::Duplicate {
            collection: T::COLLECTION.to_string(),
            key: key.to_string(),
            existing_id: existing_id.to_string(),
        }
    }

    /// Rejects `record` if another record already holds its key.
    ///
    /// `queued` are records of the same collection whose creates are still
    /// in the operation queue; they count as existing.
    pub async fn assert_unique<T: DomainRecord>(&self, record: &T, queued: &[T]) -> SyncResult<()> {
        let key = record.uniqueness_key(&self.policy);

        if let Some(existing) = queued
            .iter()
            .find(|q| q.id() != record.id() && q.uniqueness_key(&self.policy) == key)
        {
            debug!(collection = T::COLLECTION, key = %key, "Duplicate of a queued create");
            return Err(Self::duplicate::<T>(&key, existing.id()));
        }

        let candidates = match self
            .remote
            .query(T::COLLECTION, &record.lookup_filter())
            .await
        {
            Ok(docs) => docs,
            Err(e) => {
                warn!(
                    collection = T::COLLECTION,
                    error = %e,
                    "Existence check failed, allowing write"
                );
                return Ok(());
            }
        };

        for doc in candidates.iter().filter(|d| d.id != record.id()) {
            match doc.decode::<T>() {
                Ok(existing) if existing.uniqueness_key(&self.policy) == key => {
                    debug!(collection = T::COLLECTION, key = %key, existing_id = %doc.id, "Duplicate of a remote record");
                    return Err(Self::duplicate::<T>(&key, &doc.id));
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(id = %doc.id, error = %e, "Ignoring undecodable candidate");
                }
            }
        }

        Ok(())
    }

    /// Deletes every record but the earliest created per uniqueness key.
    ///
    /// ## Returns
    /// How many records were deleted. A delete that fails is logged and
    /// left for the next sweep.
    pub async fn sweep<T: DomainRecord>(&self) -> SyncResult<usize> {
        let docs = self.remote.query(T::COLLECTION, &Filter::All).await?;
        let total = docs.len();
        let plan = plan_sweep(decode_all::<T>(&docs), &self.policy);

        let mut removed = 0;
        for record in &plan.remove {
            match self.remote.delete(T::COLLECTION, record.id()).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(
                        collection = T::COLLECTION,
                        id = %record.id(),
                        error = %e,
                        "Failed to delete duplicate"
                    );
                }
            }
        }

        if removed > 0 {
            let detail = format!(
                "sweep deleted {} duplicate {} records out of {}",
                removed,
                T::COLLECTION,
                total
            );
            warn!(collection = T::COLLECTION, removed, "{}", detail);
            self.emitter.emit_integrity_warning(&IntegrityWarning {
                collection: T::COLLECTION.to_string(),
                kind: IntegrityWarningKind::SweepRemovedDuplicates,
                removed,
                detail,
            });
        } else {
            info!(collection = T::COLLECTION, scanned = total, "Sweep found no duplicates");
        }

        Ok(removed)
    }
}
