//! # Operation Queue
//!
//! Ordered list of pending mutations, mirrored to the Durable Queue Store.
//!
//! ## Persistence Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Durable Queue Store keys                           │
//! │                                                                         │
//! │  "pendingOperations"  ──►  [Operation, Operation, ...]  (enqueue order) │
//! │  "failedOperations"   ──►  [Operation, ...]             (exhausted)     │
//! │  "lastSyncTime"       ──►  "2024-05-01T12:00:00Z"                       │
//! │                                                                         │
//! │  mutation ──► stage on a copy ──► set_many(both lists) ──► commit       │
//! │                                        │                                │
//! │                                        └── Err ──► in-memory unchanged  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both lists are written in one atomic store call, so an operation moving
//! from active to failed is always in exactly one of them on disk.
//!
//! The queue also owns PendingSet bookkeeping for its targets. Ids are
//! added and released while the queue lock is held, so the "is another
//! operation still writing this id?" check and the release cannot be split
//! by a concurrent enqueue.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tally_core::{CoreResult, Operation, OperationId, OperationKind, OperationStatus};

use crate::config::QueueSettings;
use crate::error::SyncResult;
use crate::pending::PendingSet;
use crate::store::DurableStore;

/// What happened to an operation after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// Back in line for the next pass.
    Requeued { retry_count: u32 },
    /// Budget spent; moved to the failed list.
    Exhausted(Operation),
}

/// Counts loaded by [`OperationQueue::restore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub active: usize,
    pub failed: usize,
    /// Operations found mid-execution and put back in line.
    pub interrupted: usize,
}

#[derive(Debug, Clone, Default)]
struct QueueState {
    active: Vec<Operation>,
    failed: Vec<Operation>,
}

impl QueueState {
    fn targets(&self) -> HashSet<String> {
        self.active
            .iter()
            .filter_map(|op| op.target_id.clone())
            .collect()
    }

    fn is_targeted(&self, id: &str) -> bool {
        self.active
            .iter()
            .any(|op| op.target_id.as_deref() == Some(id))
    }
}

/// Puts `executing` operations back to `queued`.
fn requeue_executing(ops: &mut [Operation]) -> CoreResult<usize> {
    let mut count = 0;
    for op in ops
        .iter_mut()
        .filter(|op| op.status == OperationStatus::Executing)
    {
        op.transition(OperationStatus::Queued)?;
        count += 1;
    }
    Ok(count)
}

/// The engine's operation queue.
pub struct OperationQueue {
    state: Mutex<QueueState>,
    store: Arc<dyn DurableStore>,
    pending: PendingSet,
    keys: QueueSettings,
}

impl OperationQueue {
    pub fn new(store: Arc<dyn DurableStore>, keys: QueueSettings, pending: PendingSet) -> Self {
        OperationQueue {
            state: Mutex::new(QueueState::default()),
            store,
            pending,
            keys,
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    async fn persist(&self, state: &QueueState) -> SyncResult<()> {
        let active = serde_json::to_vec(&state.active)?;
        let failed = serde_json::to_vec(&state.failed)?;

        self.store
            .set_many(&[
                (self.keys.queue_key.as_str(), active.as_slice()),
                (self.keys.failed_key.as_str(), failed.as_slice()),
            ])
            .await
    }

    /// Persists `next`, then makes it the in-memory state.
    async fn commit(&self, state: &mut QueueState, next: QueueState) -> SyncResult<()> {
        self.persist(&next).await?;
        *state = next;
        Ok(())
    }

    /// Releases `id` from the PendingSet unless an active operation still
    /// targets it. Call with the queue lock held.
    async fn release_target(&self, state: &QueueState, op: &Operation) {
        let Some(target) = op.target_id.as_deref() else {
            return;
        };
        if !state.is_targeted(target) {
            self.pending.remove(target).await;
        }
    }

    async fn load_list(&self, key: &str) -> SyncResult<Vec<Operation>> {
        match self.store.get(key).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Replaces in-memory state with what the Durable Queue Store holds and
    /// marks every active target pending.
    ///
    /// Operations persisted as `executing` were interrupted by a crash or
    /// reload; they go back to `queued` and keep their retry count.
    pub async fn restore(&self) -> SyncResult<RestoreSummary> {
        let mut next = QueueState {
            active: self.load_list(&self.keys.queue_key).await?,
            failed: self.load_list(&self.keys.failed_key).await?,
        };
        let interrupted = requeue_executing(&mut next.active)?;

        let summary = RestoreSummary {
            active: next.active.len(),
            failed: next.failed.len(),
            interrupted,
        };

        let mut state = self.state.lock().await;
        if interrupted > 0 {
            warn!(count = interrupted, "Requeued operations interrupted mid-flush");
            self.commit(&mut state, next).await?;
        } else {
            *state = next;
        }
        for target in state.targets() {
            self.pending.insert(target).await;
        }

        info!(
            active = summary.active,
            failed = summary.failed,
            "Operation queue restored"
        );
        Ok(summary)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Appends an operation, persists, and marks its target pending.
    ///
    /// ## Returns
    /// The active queue length after the push. On error nothing was queued.
    pub async fn push(&self, op: Operation) -> SyncResult<usize> {
        let mut state = self.state.lock().await;
        let target = op.target_id.clone();

        let mut next = state.clone();
        debug!(op_id = %op.id, collection = %op.collection, kind = %op.kind, "Enqueued operation");
        next.active.push(op);
        self.commit(&mut state, next).await?;

        if let Some(target) = target {
            self.pending.insert(target).await;
        }
        Ok(state.active.len())
    }

    /// Marks an operation `executing`.
    ///
    /// ## Returns
    /// `false` if the operation is no longer queued (cleared or already
    /// handled), in which case it must be skipped.
    pub async fn mark_executing(&self, id: &OperationId) -> SyncResult<bool> {
        let mut state = self.state.lock().await;
        let Some(pos) = state
            .active
            .iter()
            .position(|op| &op.id == id && op.status == OperationStatus::Queued)
        else {
            return Ok(false);
        };

        let mut next = state.clone();
        next.active[pos].transition(OperationStatus::Executing)?;
        self.commit(&mut state, next).await?;
        Ok(true)
    }

    /// Puts operations left `executing` by an aborted pass back in line.
    ///
    /// Only the flush worker executes operations, so at the start of a pass
    /// nothing is legitimately `executing`.
    pub async fn requeue_interrupted(&self) -> SyncResult<usize> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let count = requeue_executing(&mut next.active)?;
        if count > 0 {
            self.commit(&mut state, next).await?;
            warn!(count, "Requeued operations left executing by an earlier pass");
        }
        Ok(count)
    }

    /// Drops a confirmed operation from the active list and releases its
    /// target if nothing else writes to it.
    pub async fn complete(&self, id: &OperationId) -> SyncResult<Option<Operation>> {
        let mut state = self.state.lock().await;
        let Some(pos) = state.active.iter().position(|op| &op.id == id) else {
            return Ok(None);
        };

        let mut next = state.clone();
        let mut op = next.active.remove(pos);
        op.transition(OperationStatus::Applied)?;
        self.commit(&mut state, next).await?;

        self.release_target(&state, &op).await;
        Ok(Some(op))
    }

    /// Counts a failed attempt against the operation's budget. An exhausted
    /// operation moves to the failed list and releases its target.
    pub async fn record_failure(
        &self,
        id: &OperationId,
        error: &str,
        max_attempts: u32,
    ) -> SyncResult<Option<FailureOutcome>> {
        let mut state = self.state.lock().await;
        let Some(pos) = state.active.iter().position(|op| &op.id == id) else {
            return Ok(None);
        };

        let mut next = state.clone();
        let status = next.active[pos].record_failure(error, max_attempts)?;
        let outcome = if status == OperationStatus::Failed {
            let op = next.active.remove(pos);
            next.failed.push(op.clone());
            FailureOutcome::Exhausted(op)
        } else {
            FailureOutcome::Requeued {
                retry_count: next.active[pos].retry_count,
            }
        };
        self.commit(&mut state, next).await?;

        if let FailureOutcome::Exhausted(op) = &outcome {
            self.release_target(&state, op).await;
        }
        Ok(Some(outcome))
    }

    /// Moves every failed operation back to the end of the active list with
    /// a fresh retry budget and marks their targets pending again.
    pub async fn requeue_failed(&self) -> SyncResult<usize> {
        let mut state = self.state.lock().await;
        if state.failed.is_empty() {
            return Ok(0);
        }

        let mut next = state.clone();
        let mut revived = std::mem::take(&mut next.failed);
        for op in revived.iter_mut() {
            op.reset_for_resync()?;
        }
        let count = revived.len();
        next.active.extend(revived);
        self.commit(&mut state, next).await?;

        for target in state.targets() {
            self.pending.insert(target).await;
        }
        info!(count, "Requeued failed operations for manual resync");
        Ok(count)
    }

    /// Drops the active queue and the failed list and releases every
    /// pending id.
    pub async fn clear(&self) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        let dropped = state.active.len() + state.failed.len();
        self.commit(&mut state, QueueState::default()).await?;
        self.pending.clear().await;
        warn!(count = dropped, "Pending operations cleared");
        Ok(())
    }

    /// Releases pending ids older than `ttl` that no active operation
    /// targets.
    pub async fn expire_stale_pending(&self, ttl: Duration) -> Vec<String> {
        let state = self.state.lock().await;
        self.pending.expire_stale(ttl, &state.targets()).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Queued operations in enqueue order, for one flush pass.
    pub async fn snapshot_queued(&self) -> Vec<Operation> {
        self.state
            .lock()
            .await
            .active
            .iter()
            .filter(|op| op.status == OperationStatus::Queued)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.active.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.active.is_empty()
    }

    pub async fn failed_len(&self) -> usize {
        self.state.lock().await.failed.len()
    }

    pub async fn failed(&self) -> Vec<Operation> {
        self.state.lock().await.failed.clone()
    }

    /// Returns `(active, failed)` lengths under one lock.
    pub async fn counts(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.active.len(), state.failed.len())
    }

    /// Active create/upsert payloads for `collection`, used by the guarded
    /// create path to see writes that have not reached the remote yet.
    pub async fn queued_creates(&self, collection: &str) -> Vec<Operation> {
        self.state
            .lock()
            .await
            .active
            .iter()
            .filter(|op| {
                op.collection == collection
                    && matches!(op.kind, OperationKind::Create | OperationKind::Upsert)
            })
            .cloned()
            .collect()
    }

    // =========================================================================
    // Last Sync Time
    // =========================================================================

    pub async fn load_last_sync(&self) -> SyncResult<Option<DateTime<Utc>>> {
        match self.store.get(&self.keys.last_sync_key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn set_last_sync(&self, at: DateTime<Utc>) -> SyncResult<()> {
        let bytes = serde_json::to_vec(&at)?;
        self.store.set(&self.keys.last_sync_key, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::FlakyStore;
    use crate::store::MemoryDurableStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tally_core::NewOperation;

    fn queue_over(store: Arc<dyn DurableStore>) -> OperationQueue {
        OperationQueue::new(store, QueueSettings::default(), PendingSet::new())
    }

    fn op(id: &str) -> Operation {
        Operation::from_new(NewOperation::create_with_id("products", id, json!({"name": id})))
    }

    #[tokio::test]
    async fn test_push_persists_in_order() {
        let store = Arc::new(MemoryDurableStore::new());
        let queue = queue_over(store.clone());

        queue.push(op("a")).await.unwrap();
        assert_eq!(queue.push(op("b")).await.unwrap(), 2);

        let raw = store.get("pendingOperations").await.unwrap().unwrap();
        let stored: Vec<Operation> = serde_json::from_slice(&raw).unwrap();
        let targets: Vec<_> = stored.iter().map(|o| o.target_id.clone().unwrap()).collect();
        assert_eq!(targets, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_exhaustion_moves_to_failed_once() {
        let queue = queue_over(Arc::new(MemoryDurableStore::new()));
        let operation = op("a");
        let id = operation.id.clone();
        queue.push(operation).await.unwrap();

        for attempt in 1..=2 {
            assert!(queue.mark_executing(&id).await.unwrap());
            let outcome = queue.record_failure(&id, "timeout", 3).await.unwrap();
            assert_eq!(outcome, Some(FailureOutcome::Requeued { retry_count: attempt }));
        }

        assert!(queue.mark_executing(&id).await.unwrap());
        let outcome = queue.record_failure(&id, "timeout", 3).await.unwrap();
        assert!(matches!(outcome, Some(FailureOutcome::Exhausted(ref o)) if o.retry_count == 3));

        assert_eq!(queue.counts().await, (0, 1));
        assert_eq!(queue.record_failure(&id, "timeout", 3).await.unwrap(), None);
        assert!(!queue.mark_executing(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_complete_removes() {
        let queue = queue_over(Arc::new(MemoryDurableStore::new()));
        let operation = op("a");
        let id = operation.id.clone();
        queue.push(operation).await.unwrap();

        queue.mark_executing(&id).await.unwrap();
        let done = queue.complete(&id).await.unwrap().unwrap();
        assert_eq!(done.status, OperationStatus::Applied);
        assert!(queue.is_empty().await);
        assert!(queue.complete(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_resets_executing() {
        let store = Arc::new(MemoryDurableStore::new());
        let first = queue_over(store.clone());

        let a = op("a");
        let a_id = a.id.clone();
        first.push(a).await.unwrap();
        first.push(op("b")).await.unwrap();
        first.mark_executing(&a_id).await.unwrap();
        drop(first);

        let second = queue_over(store);
        let summary = second.restore().await.unwrap();
        assert_eq!(
            summary,
            RestoreSummary {
                active: 2,
                failed: 0,
                interrupted: 1
            }
        );
        assert_eq!(second.snapshot_queued().await.len(), 2);
    }

    #[tokio::test]
    async fn test_requeue_failed_resets_budget() {
        let queue = queue_over(Arc::new(MemoryDurableStore::new()));
        let operation = op("a");
        let id = operation.id.clone();
        queue.push(operation).await.unwrap();
        queue.mark_executing(&id).await.unwrap();
        queue.record_failure(&id, "boom", 1).await.unwrap();

        assert_eq!(queue.requeue_failed().await.unwrap(), 1);
        let queued = queue.snapshot_queued().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].retry_count, 0);
        assert_eq!(queue.failed_len().await, 0);
    }

    #[tokio::test]
    async fn test_last_sync_roundtrip() {
        let queue = queue_over(Arc::new(MemoryDurableStore::new()));
        assert_eq!(queue.load_last_sync().await.unwrap(), None);

        let at = Utc::now();
        queue.set_last_sync(at).await.unwrap();
        assert_eq!(queue.load_last_sync().await.unwrap(), Some(at));
    }

    #[tokio::test]
    async fn test_pending_follows_last_active_target() {
        let pending = PendingSet::new();
        let queue = OperationQueue::new(
            Arc::new(MemoryDurableStore::new()),
            QueueSettings::default(),
            pending.clone(),
        );
        let create = op("a");
        let create_id = create.id.clone();
        let update = Operation::from_new(NewOperation::update("products", "a", json!({})));
        let update_id = update.id.clone();
        queue.push(create).await.unwrap();
        queue.push(update).await.unwrap();
        assert!(pending.contains("a").await);

        queue.mark_executing(&create_id).await.unwrap();
        queue.complete(&create_id).await.unwrap();
        assert!(pending.contains("a").await);

        queue.mark_executing(&update_id).await.unwrap();
        queue.complete(&update_id).await.unwrap();
        assert!(!pending.contains("a").await);
        assert_eq!(queue.queued_creates("products").await.len(), 0);
    }

    #[tokio::test]
    async fn test_failed_push_leaves_nothing_behind() {
        let store = Arc::new(FlakyStore::default());
        let pending = PendingSet::new();
        let queue = OperationQueue::new(store.clone(), QueueSettings::default(), pending.clone());
        store.break_writes_to("pendingOperations");

        assert!(queue.push(op("a")).await.is_err());

        assert_eq!(queue.len().await, 0);
        assert!(queue.snapshot_queued().await.is_empty());
        assert!(!pending.contains("a").await);

        store.heal();
        assert_eq!(queue.push(op("a")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_mark_executing_stays_queued() {
        let store = Arc::new(FlakyStore::default());
        let queue = queue_over(store.clone());
        let operation = op("a");
        let id = operation.id.clone();
        queue.push(operation).await.unwrap();

        store.break_writes_to("pendingOperations");
        assert!(queue.mark_executing(&id).await.is_err());

        assert_eq!(queue.snapshot_queued().await.len(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_is_never_lost_on_store_error() {
        let store = Arc::new(FlakyStore::default());
        let queue = queue_over(store.clone());
        let operation = op("a");
        let id = operation.id.clone();
        queue.push(operation).await.unwrap();
        queue.mark_executing(&id).await.unwrap();

        store.break_writes_to("failedOperations");
        assert!(queue.record_failure(&id, "timeout", 1).await.is_err());
        assert_eq!(queue.counts().await, (1, 0));

        store.heal();
        let reopened = queue_over(store.clone());
        let summary = reopened.restore().await.unwrap();
        assert_eq!(summary.active + summary.failed, 1);
        assert_eq!(summary.interrupted, 1);
    }

    #[tokio::test]
    async fn test_requeue_interrupted_after_aborted_pass() {
        let store = Arc::new(FlakyStore::default());
        let queue = queue_over(store.clone());
        let operation = op("a");
        let id = operation.id.clone();
        queue.push(operation).await.unwrap();
        queue.mark_executing(&id).await.unwrap();

        store.break_writes_to("pendingOperations");
        assert!(queue.complete(&id).await.is_err());
        assert!(queue.snapshot_queued().await.is_empty());

        store.heal();
        assert_eq!(queue.requeue_interrupted().await.unwrap(), 1);
        assert_eq!(queue.snapshot_queued().await.len(), 1);
        assert_eq!(queue.requeue_interrupted().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_restore_marks_targets_pending() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryDurableStore::new());
        queue_over(store.clone()).push(op("a")).await.unwrap();

        let pending = PendingSet::new();
        let reopened = OperationQueue::new(store, QueueSettings::default(), pending.clone());
        reopened.restore().await.unwrap();

        assert!(pending.contains("a").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_stale_pending_skips_queued_targets() {
        let pending = PendingSet::new();
        let queue = OperationQueue::new(
            Arc::new(MemoryDurableStore::new()),
            QueueSettings::default(),
            pending.clone(),
        );
        queue.push(op("queued")).await.unwrap();
        pending.insert("orphan").await;

        tokio::time::advance(Duration::from_secs(120)).await;
        let released = queue.expire_stale_pending(Duration::from_secs(60)).await;

        assert_eq!(released, vec!["orphan".to_string()]);
        assert!(pending.contains("queued").await);
    }
}
