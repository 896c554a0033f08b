//! # Sync Engine
//!
//! The explicit, per-session entry point. One `SyncEngine` is built at
//! startup and handed to whoever needs to write, listen or show status.
//!
//! ## Engine Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           SyncEngine                                    │
//! │                                                                         │
//! │  UI action                                                             │
//! │     │ enqueue / create_unique                                           │
//! │     ▼                                                                   │
//! │  ┌───────────────┐  persist   ┌───────────────────────────┐            │
//! │  │OperationQueue │───────────►│ DurableStore (SQLite/mem) │            │
//! │  └──────┬────────┘            └───────────────────────────┘            │
//! │         │ trigger                                                       │
//! │         ▼                                                               │
//! │  ┌───────────────┐  run_pass  ┌──────────────┐      ┌──────────────┐   │
//! │  │ FlushWorker   │───────────►│ SyncExecutor │─────►│ RemoteStore  │   │
//! │  │ (one task)    │◄── online ─│              │      └──────┬───────┘   │
//! │  └───────────────┘  Network   └──────────────┘             │ snapshot  │
//! │                     Monitor                                 ▼           │
//! │  ┌───────────────┐  ┌───────────────┐            ┌──────────────────┐  │
//! │  │DuplicateGuard │  │ BulkSyncer    │            │ Reconciler<T>    │  │
//! │  │ check + sweep │  │ force sync    │            │ PendingSet merge │  │
//! │  └───────────────┘  └───────────────┘            └──────────────────┘  │
//! │                                                                         │
//! │  StatsBoard ──► watch::Receiver<SyncStats> + SyncEventEmitter           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//! ```rust,ignore
//! let engine = SyncEngine::builder()
//!     .with_config(SyncConfig::load_or_default(None))
//!     .with_remote(remote)
//!     .with_store(Arc::new(database))
//!     .build()?;
//! engine.start().await?;
//!
//! let id = engine.create_unique(&Product::new("Lemon 500ml", Some("B1"), 250)).await?;
//! println!("{}", engine.stats().label());
//! ```

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use tally_core::validation::validate_operation;
use tally_core::{
    DomainRecord, KeyPolicy, NewOperation, Operation, OperationId, SyncPhase, SyncStats,
};
use tally_db::{Database, DbConfig};

use crate::bulk::{BulkSyncReport, BulkSyncer, Resolver};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{NoOpEmitter, SyncEventEmitter};
use crate::executor::{FlushReport, SyncExecutor};
use crate::guard::DuplicateGuard;
use crate::network::NetworkMonitor;
use crate::pending::PendingSet;
use crate::queue::OperationQueue;
use crate::reconciler::Reconciler;
use crate::remote::RemoteStore;
use crate::stats::StatsBoard;
use crate::store::{DurableStore, MemoryDurableStore};
use crate::worker::{FlushHandle, FlushWorker, WorkerSettings};

// =============================================================================
// Sync Engine
// =============================================================================

struct WorkerSlot {
    handle: FlushHandle,
    task: JoinHandle<()>,
}

struct EngineInner {
    config: SyncConfig,
    policy: KeyPolicy,
    remote: Arc<dyn RemoteStore>,
    queue: Arc<OperationQueue>,
    pending: PendingSet,
    network: NetworkMonitor,
    stats: Arc<StatsBoard>,
    emitter: Arc<dyn SyncEventEmitter>,
    guard: DuplicateGuard,
    bulk: BulkSyncer,
    /// Serializes guarded creates so check-then-enqueue is atomic.
    create_lock: Mutex<()>,
    worker: Mutex<Option<WorkerSlot>>,
}

/// Offline-tolerant write sync engine. Cheap to clone.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Starts building an engine with default configuration.
    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::new(SyncConfig::default())
    }

    /// Builds an engine whose queue lives in the configured SQLite file, or
    /// in memory when no path is set.
    pub async fn open(config: SyncConfig, remote: Arc<dyn RemoteStore>) -> SyncResult<Self> {
        let mut builder = SyncEngineBuilder::new(config.clone()).with_remote(remote);

        if let Some(path) = &config.queue.database_path {
            let db = Database::new(DbConfig::new(path)).await?;
            builder = builder.with_store(Arc::new(db));
        }

        builder.build()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Restores persisted queue state and spawns the flush worker.
    ///
    /// Calling `start` on a running engine does nothing.
    pub async fn start(&self) -> SyncResult<()> {
        let inner = &self.inner;
        let mut slot = inner.worker.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let restored = inner.queue.restore().await?;
        if let Some(last) = inner.queue.load_last_sync().await? {
            inner.stats.set_last_sync(last);
        }
        let (active, failed) = inner.queue.counts().await;
        inner.stats.set_counts(active, failed);
        if failed > 0 {
            inner.stats.set_phase(SyncPhase::Error);
        }

        let executor = SyncExecutor::new(
            inner.queue.clone(),
            inner.remote.clone(),
            inner.network.clone(),
            inner.stats.clone(),
            inner.emitter.clone(),
            inner.config.retry.max_attempts,
        );
        let settings = WorkerSettings {
            backoff: inner.config.retry.backoff(),
            pending_ttl: inner.config.pending_ttl(),
            maintenance_interval: inner.config.maintenance_interval(),
        };
        let (worker, handle) = FlushWorker::new(
            executor,
            inner.queue.clone(),
            inner.stats.clone(),
            inner.network.subscribe(),
            settings,
        );

        let task = tokio::spawn(worker.run());
        *slot = Some(WorkerSlot { handle, task });

        info!(
            device_id = %inner.config.device_id(),
            active = restored.active,
            failed = restored.failed,
            "Sync engine started"
        );
        Ok(())
    }

    /// Stops the flush worker. Queued operations stay persisted.
    pub async fn shutdown(&self) -> SyncResult<()> {
        let Some(slot) = self.inner.worker.lock().await.take() else {
            return Ok(());
        };

        info!("Stopping sync engine");
        if let Err(e) = slot.handle.shutdown().await {
            warn!(?e, "Flush worker already gone");
        }
        slot.task
            .await
            .map_err(|e| SyncError::Internal(format!("Flush worker panicked: {}", e)))?;

        info!("Sync engine stopped");
        Ok(())
    }

    async fn flush_handle(&self) -> Option<FlushHandle> {
        self.inner
            .worker
            .lock()
            .await
            .as_ref()
            .map(|slot| slot.handle.clone())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Queues a mutation and returns at once.
    ///
    /// The queue is persisted, the target id (if any) joins the PendingSet
    /// and, when online, a flush is requested in the background.
    pub async fn enqueue(&self, new: NewOperation) -> SyncResult<OperationId> {
        validate_operation(&new)?;

        let op = Operation::from_new(new);
        let id = op.id.clone();
        self.inner.queue.push(op).await?;

        let (active, failed) = self.inner.queue.counts().await;
        self.inner.stats.set_counts(active, failed);

        if self.inner.network.is_online() {
            if let Some(handle) = self.flush_handle().await {
                handle.trigger();
            }
        }

        Ok(id)
    }

    /// Records of `T` whose creates are still queued.
    async fn queued_records<T: DomainRecord>(&self) -> Vec<T> {
        self.inner
            .queue
            .queued_creates(T::COLLECTION)
            .await
            .iter()
            .filter_map(|op| {
                let id = op.target_id.as_deref()?;
                T::from_document(id, &op.payload).ok()
            })
            .collect()
    }

    /// Rejects `record` with `SyncError::Duplicate` if its uniqueness key
    /// is already taken remotely or by a queued create.
    pub async fn assert_unique<T: DomainRecord>(&self, record: &T) -> SyncResult<()> {
        let queued = self.queued_records::<T>().await;
        self.inner.guard.assert_unique(record, &queued).await
    }

    /// Validates, checks uniqueness and enqueues a create, atomically with
    /// respect to other guarded creates.
    pub async fn create_unique<T: DomainRecord>(&self, record: &T) -> SyncResult<OperationId> {
        record.validate()?;

        let _lock = self.inner.create_lock.lock().await;
        self.assert_unique(record).await?;

        self.enqueue(NewOperation::create_with_id(
            T::COLLECTION,
            record.id(),
            record.to_payload()?,
        ))
        .await
    }

    /// Deletes all but the earliest record per uniqueness key.
    pub async fn sweep_duplicates<T: DomainRecord>(&self) -> SyncResult<usize> {
        if !self.inner.network.is_online() {
            return Err(SyncError::Offline);
        }
        self.inner.guard.sweep::<T>().await
    }

    // =========================================================================
    // Flushing
    // =========================================================================

    /// Manual "sync now": puts failed operations back in line with a fresh
    /// budget and runs a pass.
    pub async fn force_flush(&self) -> SyncResult<()> {
        if !self.inner.network.is_online() {
            return Err(SyncError::Offline);
        }
        let handle = self.flush_handle().await.ok_or(SyncError::NotStarted)?;
        handle.resync().await?;
        Ok(())
    }

    /// Runs one pass on the flush worker and returns its report.
    pub async fn flush_now(&self) -> SyncResult<FlushReport> {
        let handle = self.flush_handle().await.ok_or(SyncError::NotStarted)?;
        handle.flush_now().await
    }

    pub async fn failed_operations(&self) -> Vec<Operation> {
        self.inner.queue.failed().await
    }

    /// Drops every queued and failed operation and releases all pending ids.
    pub async fn clear_pending(&self) -> SyncResult<()> {
        self.inner.queue.clear().await?;
        self.inner.stats.set_counts(0, 0);
        self.inner.stats.set_phase(SyncPhase::Idle);
        Ok(())
    }

    // =========================================================================
    // Connectivity & status
    // =========================================================================

    /// Feeds a platform connectivity event.
    pub fn set_online(&self, online: bool) {
        self.inner.network.set_online(online);
        self.inner.stats.set_online(online);
    }

    pub fn network(&self) -> NetworkMonitor {
        self.inner.network.clone()
    }

    pub fn stats(&self) -> SyncStats {
        self.inner.stats.current()
    }

    pub fn subscribe_stats(&self) -> watch::Receiver<SyncStats> {
        self.inner.stats.subscribe()
    }

    // =========================================================================
    // Views & bulk sync
    // =========================================================================

    /// A view of `T` that shares this engine's PendingSet.
    pub fn reconciler<T: DomainRecord>(&self) -> Reconciler<T> {
        Reconciler::new(
            self.inner.pending.clone(),
            self.inner.policy,
            self.inner.emitter.clone(),
        )
    }

    /// The remote store this engine writes to.
    pub fn remote(&self) -> Arc<dyn RemoteStore> {
        self.inner.remote.clone()
    }

    /// Diffs `local` against the whole remote collection.
    ///
    /// Conflicts are returned, never resolved on the caller's behalf.
    pub async fn bulk_sync<T: DomainRecord>(
        &self,
        local: &[T],
        resolver: Option<Resolver<'_, T>>,
    ) -> SyncResult<BulkSyncReport<T>> {
        if !self.inner.network.is_online() {
            return Err(SyncError::Offline);
        }

        let report = self.inner.bulk.reconcile(local, resolver).await?;

        let now = Utc::now();
        self.inner.queue.set_last_sync(now).await?;
        self.inner.stats.set_last_sync(now);
        self.inner.stats.set_conflicts(report.has_conflicts());
        if report.has_conflicts() {
            self.inner
                .emitter
                .emit_conflicts(T::COLLECTION, report.conflicts.len());
        }

        Ok(report)
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a SyncEngine with options.
pub struct SyncEngineBuilder {
    config: SyncConfig,
    remote: Option<Arc<dyn RemoteStore>>,
    store: Option<Arc<dyn DurableStore>>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
    online: bool,
}

impl SyncEngineBuilder {
    /// Creates a new builder with the given config.
    pub fn new(config: SyncConfig) -> Self {
        SyncEngineBuilder {
            config,
            remote: None,
            store: None,
            emitter: None,
            online: true,
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the remote store (required).
    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Sets the Durable Queue Store.
    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Initial connectivity, before the platform reports anything.
    pub fn online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }

    /// Builds the SyncEngine.
    pub fn build(self) -> SyncResult<SyncEngine> {
        self.config.validate()?;

        let remote = self
            .remote
            .ok_or_else(|| SyncError::InvalidConfig("Remote store required".into()))?;

        let store = self.store.unwrap_or_else(|| {
            warn!("No durable store configured, queue will not survive restarts");
            Arc::new(MemoryDurableStore::new())
        });

        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));
        let policy = self.config.key_policy();

        let initial = SyncStats {
            is_online: self.online,
            ..SyncStats::default()
        };

        let pending = PendingSet::new();
        let inner = EngineInner {
            policy,
            queue: Arc::new(OperationQueue::new(
                store,
                self.config.queue.clone(),
                pending.clone(),
            )),
            pending,
            network: NetworkMonitor::new(self.online),
            stats: Arc::new(StatsBoard::new(initial, emitter.clone())),
            guard: DuplicateGuard::new(remote.clone(), policy, emitter.clone()),
            bulk: BulkSyncer::new(remote.clone()),
            remote,
            emitter,
            create_lock: Mutex::new(()),
            worker: Mutex::new(None),
            config: self.config,
        };

        Ok(SyncEngine {
            inner: Arc::new(inner),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingEmitter;
    use crate::remote::{Document, MemoryRemoteStore};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tally_core::{PaymentMethod, Product, Sale, SaleItem};

    /// Config whose retry timer never fires during a test, so passes run
    /// only when a test asks for one.
    fn test_config() -> SyncConfig {
        let mut config = SyncConfig::default();
        config.retry.initial_backoff_ms = 3_600_000;
        config.retry.max_backoff_secs = 3_600;
        config
    }

    struct Harness {
        engine: SyncEngine,
        remote: Arc<MemoryRemoteStore>,
        store: Arc<MemoryDurableStore>,
        emitter: Arc<RecordingEmitter>,
    }

    async fn harness(online: bool) -> Harness {
        let remote = Arc::new(MemoryRemoteStore::new());
        let store = Arc::new(MemoryDurableStore::new());
        let emitter = Arc::new(RecordingEmitter::default());

        let engine = SyncEngine::builder()
            .with_config(test_config())
            .with_remote(remote.clone())
            .with_store(store.clone())
            .with_emitter(emitter.clone())
            .online(online)
            .build()
            .unwrap();
        engine.start().await.unwrap();

        Harness {
            engine,
            remote,
            store,
            emitter,
        }
    }

    fn sale_at(secs: i64) -> Sale {
        let items = vec![
            SaleItem {
                product_id: "p-1".into(),
                name: "Lemon 500ml".into(),
                quantity: 1,
                unit_price_cents: 250,
            },
            SaleItem {
                product_id: "p-2".into(),
                name: "Bread".into(),
                quantity: 2,
                unit_price_cents: 300,
            },
        ];
        Sale::new(items, 850, PaymentMethod::ExternalCard, Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[tokio::test]
    async fn test_build_requires_remote() {
        let result = SyncEngine::builder().build();
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_flush_before_start_is_rejected() {
        let engine = SyncEngine::builder()
            .with_remote(Arc::new(MemoryRemoteStore::new()))
            .build()
            .unwrap();
        assert!(matches!(engine.flush_now().await, Err(SyncError::NotStarted)));
    }

    #[tokio::test]
    async fn test_offline_enqueue_then_reconnect_drains() {
        let h = harness(false).await;

        for name in ["Tea", "Milk", "Bread"] {
            let product = Product::new(name, None, 100);
            h.engine
                .enqueue(NewOperation::create_with_id(
                    "products",
                    product.id.clone(),
                    product.to_payload().unwrap(),
                ))
                .await
                .unwrap();
        }

        let stats = h.engine.stats();
        assert_eq!(stats.pending_count, 3);
        assert_eq!(stats.label(), "Offline");
        assert!(h.remote.documents("products").await.is_empty());

        h.engine.set_online(true);
        h.engine.flush_now().await.unwrap();

        let stats = h.engine.stats();
        assert_eq!(h.remote.documents("products").await.len(), 3);
        assert_eq!(stats.pending_count, 0);
        assert!(stats.last_sync_time.is_some());
        assert_eq!(stats.label(), "Synced");
    }

    #[tokio::test]
    async fn test_enqueue_counts_immediately() {
        let h = harness(false).await;
        let before = h.engine.stats().pending_count;

        h.engine
            .enqueue(NewOperation::delete("products", "p-1"))
            .await
            .unwrap();

        assert_eq!(h.engine.stats().pending_count, before + 1);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_operation() {
        let h = harness(false).await;
        let err = h
            .engine
            .enqueue(NewOperation::create("products", json!("not an object")))
            .await
            .unwrap_err();

        assert!(err.is_rejection());
        assert_eq!(h.engine.stats().pending_count, 0);
    }

    #[tokio::test]
    async fn test_concurrent_identical_creates_yield_one_record() {
        let h = harness(true).await;
        let first = Product::new("Lemon 500ml", Some("B1"), 250);
        let second = Product::new("Lemon 500ml", Some("B1"), 250);

        let (a, b) = tokio::join!(
            h.engine.create_unique(&first),
            h.engine.create_unique(&second)
        );

        let outcomes = [a.is_ok(), b.is_ok()];
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        let rejected = if a.is_err() { a } else { b };
        assert!(rejected.unwrap_err().is_duplicate());

        h.engine.flush_now().await.unwrap();
        assert_eq!(h.remote.documents("products").await.len(), 1);
    }

    #[tokio::test]
    async fn test_create_unique_rejects_invalid_record() {
        let h = harness(true).await;
        let err = h
            .engine
            .create_unique(&Product::new("   ", None, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn test_three_failures_move_op_to_failed_list() {
        let h = harness(true).await;
        h.remote.fail_writes_for("bad", u32::MAX).await;

        h.engine
            .enqueue(NewOperation::create_with_id("products", "bad", json!({"name": "Bad"})))
            .await
            .unwrap();
        h.engine
            .enqueue(NewOperation::create_with_id("products", "good", json!({"name": "Good"})))
            .await
            .unwrap();

        for _ in 0..5 {
            h.engine.flush_now().await.unwrap();
        }

        assert_eq!(h.remote.attempts_for("bad").await, 3);
        let docs = h.remote.documents("products").await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "good");

        let stats = h.engine.stats();
        assert_eq!(stats.pending_count, 0);
        assert_eq!(stats.failed_count, 1);
        assert_eq!(stats.label(), "Sync Error");
        assert_eq!(h.emitter.failure_count(), 1);

        let failed = h.engine.failed_operations().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].target_id.as_deref(), Some("bad"));
    }

    #[tokio::test]
    async fn test_force_flush_retries_failed_ops() {
        let h = harness(true).await;
        h.remote.fail_writes_for("p-1", 3).await;
        h.engine
            .enqueue(NewOperation::create_with_id("products", "p-1", json!({"name": "Tea"})))
            .await
            .unwrap();
        for _ in 0..3 {
            h.engine.flush_now().await.unwrap();
        }
        assert_eq!(h.engine.stats().failed_count, 1);

        h.engine.force_flush().await.unwrap();

        assert_eq!(h.engine.stats().failed_count, 0);
        assert_eq!(h.remote.documents("products").await.len(), 1);
    }

    #[tokio::test]
    async fn test_force_flush_offline() {
        let h = harness(false).await;
        assert!(matches!(h.engine.force_flush().await, Err(SyncError::Offline)));
    }

    #[tokio::test]
    async fn test_sweep_removes_sales_in_same_window() {
        let h = harness(true).await;
        let base = 1_700_000_000;
        for offset in [0, 2, 5, 8] {
            let sale = sale_at(base + offset);
            h.remote
                .insert_raw("sales", Document::new(sale.id.clone(), sale.to_payload().unwrap()))
                .await;
        }

        let removed = h.engine.sweep_duplicates::<Sale>().await.unwrap();

        assert_eq!(removed, 3);
        let left = h.remote.documents("sales").await;
        assert_eq!(left.len(), 1);
        let survivor: Sale = left[0].decode().unwrap();
        assert_eq!(survivor.created_at, Utc.timestamp_opt(base, 0).unwrap());
    }

    #[tokio::test]
    async fn test_pending_edit_not_overwritten_until_applied() {
        let h = harness(false).await;
        let tea = Product::new("Tea", None, 100);
        h.remote
            .insert_raw("products", Document::new(tea.id.clone(), tea.to_payload().unwrap()))
            .await;

        let view = h.engine.reconciler::<Product>();
        view.merge_snapshot(vec![tea.clone()]).await;

        let edited = Product {
            price_cents: 175,
            ..tea.clone()
        };
        view.local_update(edited.clone()).await;
        h.engine
            .enqueue(NewOperation::update("products", tea.id.clone(), json!({"price_cents": 175})))
            .await
            .unwrap();

        let merged = view.merge_snapshot(vec![tea.clone()]).await;
        assert_eq!(merged, vec![edited.clone()]);

        h.engine.set_online(true);
        h.engine.flush_now().await.unwrap();

        let confirmed: Product = h.remote.documents("products").await[0].decode().unwrap();
        let merged = view.merge_snapshot(vec![confirmed.clone()]).await;
        assert_eq!(merged[0].price_cents, 175);
    }

    #[tokio::test]
    async fn test_restart_restores_queue() {
        let h = harness(false).await;
        h.engine
            .enqueue(NewOperation::upsert("products", "p-1", json!({"name": "Tea"})))
            .await
            .unwrap();
        h.engine.shutdown().await.unwrap();

        let restarted = SyncEngine::builder()
            .with_config(test_config())
            .with_remote(h.remote.clone())
            .with_store(h.store.clone())
            .online(false)
            .build()
            .unwrap();
        restarted.start().await.unwrap();

        assert_eq!(restarted.stats().pending_count, 1);

        restarted.set_online(true);
        restarted.flush_now().await.unwrap();
        assert_eq!(h.remote.documents("products").await.len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_sync_reports_conflicts() {
        let h = harness(true).await;
        let tea = Product::new("Tea", None, 100);
        let newer_remote = Product {
            price_cents: 130,
            updated_at: tea.updated_at + chrono::Duration::seconds(5),
            ..tea.clone()
        };
        h.remote
            .insert_raw(
                "products",
                Document::new(tea.id.clone(), newer_remote.to_payload().unwrap()),
            )
            .await;

        let report = h.engine.bulk_sync(&[tea], None).await.unwrap();

        assert_eq!(report.conflicts.len(), 1);
        let stats = h.engine.stats();
        assert!(stats.has_conflicts);
        assert!(stats.last_sync_time.is_some());
        assert_eq!(
            h.emitter.conflicts.lock().unwrap().clone(),
            vec![("products".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_clear_pending() {
        let h = harness(false).await;
        h.engine
            .enqueue(NewOperation::delete("products", "p-1"))
            .await
            .unwrap();

        h.engine.clear_pending().await.unwrap();

        assert_eq!(h.engine.stats().pending_count, 0);
        assert!(!h.engine.inner.pending.contains("p-1").await);
        h.engine.set_online(true);
        let report = h.engine.flush_now().await.unwrap();
        assert_eq!(report.attempted, 0);
    }
}
