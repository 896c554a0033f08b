//! # Sync Executor
//!
//! Drains the operation queue against the remote store, one pass at a time.
//!
//! ## One Flush Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          run_pass()                                     │
//! │                                                                         │
//! │  snapshot queued ops (enqueue order)                                   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  for each op ──► offline? ──yes──► stop, leave the rest queued          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  mark executing ──► dispatch(kind) ──► remote create/update/delete     │
//! │       │                                                                 │
//! │       ├── Ok  ──► drop from queue, release pending id                  │
//! │       │                                                                 │
//! │       └── Err ──► retry_count += 1                                     │
//! │                    ├── < max ──► back to queued                         │
//! │                    └── = max ──► failed list, release pending id,       │
//! │                                  emit_failure (exactly once)            │
//! │                                                                         │
//! │  queue and failed list empty ──► lastSyncTime = now                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! One operation failing never stops the others in the same pass. The
//! executor itself is not re-entrant; the flush worker is its only caller.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use tally_core::{Filter, Operation, OperationId, OperationKind, SyncPhase};

use crate::error::{SyncError, SyncResult};
use crate::events::SyncEventEmitter;
use crate::network::NetworkMonitor;
use crate::queue::{FailureOutcome, OperationQueue};
use crate::remote::RemoteStore;
use crate::stats::StatsBoard;

/// Outcome of one flush pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    /// Operations dispatched to the remote store.
    pub attempted: usize,
    pub applied: usize,
    /// Failed but still within their retry budget.
    pub requeued: usize,
    /// Exhausted their budget during this pass.
    pub failed: Vec<OperationId>,
    /// Active operations left after the pass.
    pub remaining: usize,
    /// The pass stopped early because connectivity dropped.
    pub interrupted: bool,
}

impl FlushReport {
    /// Returns true if queued work is left for a later pass.
    pub fn needs_retry(&self) -> bool {
        self.remaining > 0
    }
}

/// Applies queued operations to the remote store.
pub struct SyncExecutor {
    queue: Arc<OperationQueue>,
    remote: Arc<dyn RemoteStore>,
    network: NetworkMonitor,
    stats: Arc<StatsBoard>,
    emitter: Arc<dyn SyncEventEmitter>,
    max_attempts: u32,
}

impl SyncExecutor {
    pub fn new(
        queue: Arc<OperationQueue>,
        remote: Arc<dyn RemoteStore>,
        network: NetworkMonitor,
        stats: Arc<StatsBoard>,
        emitter: Arc<dyn SyncEventEmitter>,
        max_attempts: u32,
    ) -> Self {
        SyncExecutor {
            queue,
            remote,
            network,
            stats,
            emitter,
            max_attempts,
        }
    }

    /// Runs one pass over the queued operations.
    pub async fn run_pass(&self) -> SyncResult<FlushReport> {
        let mut report = FlushReport::default();

        if !self.network.is_online() {
            debug!("Offline, skipping flush pass");
            report.remaining = self.queue.len().await;
            return Ok(report);
        }

        self.stats.set_phase(SyncPhase::Syncing);
        let result = self.drain(&mut report).await;

        let (active, failed) = self.queue.counts().await;
        report.remaining = active;
        self.stats.set_counts(active, failed);

        // Stays in error until the failed list is resynced or cleared.
        let phase = if result.is_err() || failed > 0 {
            SyncPhase::Error
        } else {
            SyncPhase::Idle
        };
        self.stats.set_phase(phase);
        result?;

        if active == 0 && failed == 0 && !report.interrupted {
            let now = Utc::now();
            self.queue.set_last_sync(now).await?;
            self.stats.set_last_sync(now);
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                applied = report.applied,
                requeued = report.requeued,
                failed = report.failed.len(),
                remaining = report.remaining,
                "Flush pass complete"
            );
        }

        Ok(report)
    }

    async fn drain(&self, report: &mut FlushReport) -> SyncResult<()> {
        self.queue.requeue_interrupted().await?;
        let ops = self.queue.snapshot_queued().await;

        for op in ops {
            if !self.network.is_online() {
                info!(op_id = %op.id, "Went offline mid-pass, leaving remaining operations queued");
                report.interrupted = true;
                break;
            }

            if !self.queue.mark_executing(&op.id).await? {
                continue;
            }
            report.attempted += 1;

            match self.dispatch(&op).await {
                Ok(()) => {
                    self.queue.complete(&op.id).await?;
                    report.applied += 1;
                    debug!(op_id = %op.id, kind = %op.kind, collection = %op.collection, "Operation applied");
                }
                Err(e) => {
                    warn!(
                        op_id = %op.id,
                        attempt = op.retry_count + 1,
                        error = %e,
                        "Operation failed"
                    );
                    self.handle_failure(&op, &e, report).await?;
                }
            }

            let (active, failed) = self.queue.counts().await;
            self.stats.set_counts(active, failed);
        }

        Ok(())
    }

    async fn handle_failure(
        &self,
        op: &Operation,
        err: &SyncError,
        report: &mut FlushReport,
    ) -> SyncResult<()> {
        let outcome = self
            .queue
            .record_failure(&op.id, &err.to_string(), self.max_attempts)
            .await?;

        match outcome {
            Some(FailureOutcome::Requeued { .. }) => report.requeued += 1,
            Some(FailureOutcome::Exhausted(failed)) => {
                let exhausted = SyncError::ExhaustedRetries {
                    op_id: failed.id.clone(),
                    attempts: failed.retry_count,
                    last_error: err.to_string(),
                };
                error!(op_id = %failed.id, collection = %failed.collection, "{}", exhausted);

                self.emitter.emit_failure(&failed, &exhausted);
                report.failed.push(failed.id);
            }
            None => {}
        }

        Ok(())
    }

    /// Routes an operation to the matching remote primitive.
    async fn dispatch(&self, op: &Operation) -> SyncResult<()> {
        let target = || {
            op.target_id.as_deref().ok_or_else(|| {
                SyncError::Validation(format!("{} operation {} has no target id", op.kind, op.id))
            })
        };

        match op.kind {
            OperationKind::Create => {
                let id = self
                    .remote
                    .create(&op.collection, op.target_id.as_deref(), op.payload.clone())
                    .await?;
                debug!(op_id = %op.id, id = %id, "Created remote record");
            }
            OperationKind::Update => {
                self.remote
                    .update(&op.collection, target()?, op.payload.clone())
                    .await?;
            }
            OperationKind::Delete => {
                self.remote.delete(&op.collection, target()?).await?;
            }
            OperationKind::Upsert => {
                let id = target()?;
                let existing = self
                    .remote
                    .query(&op.collection, &Filter::Id(id.to_string()))
                    .await?;

                if existing.is_empty() {
                    self.remote
                        .create(&op.collection, Some(id), op.payload.clone())
                        .await?;
                } else {
                    self.remote
                        .update(&op.collection, id, op.payload.clone())
                        .await?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueSettings;
    use crate::events::testing::RecordingEmitter;
    use crate::pending::PendingSet;
    use crate::remote::{Document, MemoryRemoteStore, SnapshotStream};
    use crate::store::MemoryDurableStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tally_core::{NewOperation, SyncStats};

    struct Fixture {
        executor: SyncExecutor,
        queue: Arc<OperationQueue>,
        remote: Arc<MemoryRemoteStore>,
        pending: PendingSet,
        network: NetworkMonitor,
        emitter: Arc<RecordingEmitter>,
    }

    fn fixture() -> Fixture {
        fixture_over(|remote, _| remote as Arc<dyn RemoteStore>)
    }

    /// Builds a fixture whose executor talks to `wrap(remote, network)`.
    fn fixture_over(
        wrap: impl FnOnce(Arc<MemoryRemoteStore>, NetworkMonitor) -> Arc<dyn RemoteStore>,
    ) -> Fixture {
        let pending = PendingSet::new();
        let queue = Arc::new(OperationQueue::new(
            Arc::new(MemoryDurableStore::new()),
            QueueSettings::default(),
            pending.clone(),
        ));
        let remote = Arc::new(MemoryRemoteStore::new());
        let network = NetworkMonitor::new(true);
        let emitter = Arc::new(RecordingEmitter::default());
        let stats = Arc::new(StatsBoard::new(SyncStats::default(), emitter.clone()));

        let executor = SyncExecutor::new(
            queue.clone(),
            wrap(remote.clone(), network.clone()),
            network.clone(),
            stats,
            emitter.clone(),
            3,
        );

        Fixture {
            executor,
            queue,
            remote,
            pending,
            network,
            emitter,
        }
    }

    /// Remote that loses connectivity right after its first create lands.
    struct DropsAfterFirstCreate {
        inner: Arc<MemoryRemoteStore>,
        network: NetworkMonitor,
    }

    #[async_trait]
    impl RemoteStore for DropsAfterFirstCreate {
        async fn create(&self, collection: &str, id: Option<&str>, data: Value) -> SyncResult<String> {
            let id = self.inner.create(collection, id, data).await?;
            self.network.set_online(false);
            Ok(id)
        }

        async fn update(&self, collection: &str, id: &str, data: Value) -> SyncResult<()> {
            self.inner.update(collection, id, data).await
        }

        async fn delete(&self, collection: &str, id: &str) -> SyncResult<()> {
            self.inner.delete(collection, id).await
        }

        async fn query(&self, collection: &str, filter: &Filter) -> SyncResult<Vec<Document>> {
            self.inner.query(collection, filter).await
        }

        async fn snapshot(&self, collection: &str, filter: Filter) -> SyncResult<SnapshotStream> {
            self.inner.snapshot(collection, filter).await
        }
    }

    async fn enqueue(f: &Fixture, new: NewOperation) -> OperationId {
        let op = Operation::from_new(new);
        let id = op.id.clone();
        f.queue.push(op).await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_pass_applies_in_order() {
        let f = fixture();
        enqueue(&f, NewOperation::create_with_id("products", "p-1", json!({"name": "Tea"}))).await;
        enqueue(&f, NewOperation::update("products", "p-1", json!({"price_cents": 90}))).await;

        let report = f.executor.run_pass().await.unwrap();

        assert_eq!(report.applied, 2);
        assert_eq!(report.remaining, 0);
        assert!(f.pending.is_empty().await);
        let docs = f.remote.documents("products").await;
        assert_eq!(docs[0].data, json!({"name": "Tea", "price_cents": 90}));
        assert!(f.queue.load_last_sync().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_offline_pass_is_skipped() {
        let f = fixture();
        f.network.set_online(false);
        enqueue(&f, NewOperation::create("products", json!({"name": "Tea"}))).await;

        let report = f.executor.run_pass().await.unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(report.remaining, 1);
        assert!(f.remote.documents("products").await.is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_exhausts_after_three() {
        let f = fixture();
        f.remote.fail_writes_for("bad", u32::MAX).await;
        enqueue(&f, NewOperation::create_with_id("products", "bad", json!({}))).await;
        enqueue(&f, NewOperation::create_with_id("products", "good", json!({}))).await;

        let first = f.executor.run_pass().await.unwrap();
        assert_eq!(first.applied, 1);
        assert_eq!(first.requeued, 1);
        assert!(f.pending.contains("bad").await);
        assert!(!f.pending.contains("good").await);

        f.executor.run_pass().await.unwrap();
        let third = f.executor.run_pass().await.unwrap();
        assert_eq!(third.failed.len(), 1);
        assert_eq!(third.remaining, 0);

        let fourth = f.executor.run_pass().await.unwrap();
        assert_eq!(fourth.attempted, 0);

        assert_eq!(f.remote.attempts_for("bad").await, 3);
        assert_eq!(f.emitter.failure_count(), 1);
        assert_eq!(f.queue.failed_len().await, 1);
        assert!(!f.pending.contains("bad").await);
        assert!(f.queue.load_last_sync().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let f = fixture();
        enqueue(&f, NewOperation::upsert("products", "p-1", json!({"name": "Tea"}))).await;
        f.executor.run_pass().await.unwrap();

        enqueue(&f, NewOperation::upsert("products", "p-1", json!({"price_cents": 5}))).await;
        f.executor.run_pass().await.unwrap();

        let docs = f.remote.documents("products").await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].data, json!({"name": "Tea", "price_cents": 5}));
    }

    #[tokio::test]
    async fn test_pending_kept_while_later_op_targets_same_id() {
        let f = fixture();
        f.remote.fail_writes_for("p-1", 1).await;
        enqueue(&f, NewOperation::create_with_id("products", "p-0", json!({}))).await;
        enqueue(&f, NewOperation::upsert("products", "p-1", json!({"v": 1}))).await;
        enqueue(&f, NewOperation::upsert("products", "p-1", json!({"v": 2}))).await;

        f.executor.run_pass().await.unwrap();
        assert!(f.pending.contains("p-1").await);

        f.executor.run_pass().await.unwrap();
        assert!(!f.pending.contains("p-1").await);
    }

    #[tokio::test]
    async fn test_going_offline_mid_pass_leaves_rest_queued() {
        let f = fixture_over(|remote, network| {
            Arc::new(DropsAfterFirstCreate {
                inner: remote,
                network,
            }) as Arc<dyn RemoteStore>
        });
        for id in ["p-1", "p-2", "p-3"] {
            enqueue(&f, NewOperation::create_with_id("products", id, json!({"name": id}))).await;
        }

        let report = f.executor.run_pass().await.unwrap();

        assert!(report.interrupted);
        assert_eq!(report.applied, 1);
        assert_eq!(report.remaining, 2);
        assert!(!f.network.is_online());
        assert_eq!(f.remote.documents("products").await.len(), 1);
        assert_eq!(f.queue.snapshot_queued().await.len(), 2);
        assert!(f.pending.contains("p-2").await);
        assert!(f.queue.load_last_sync().await.unwrap().is_none());
    }
}
