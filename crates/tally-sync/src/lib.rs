//! # tally-sync: Offline-Tolerant Write Sync for Tally POS
//!
//! Lets the register keep selling while the connection to the shared
//! remote store comes and goes. Writes are queued durably, drained in order
//! once online, retried with bounded backoff, and kept from being undone by
//! stale snapshots or duplicated by double taps and replays.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  SyncEngine (explicit, per session)               │  │
//! │  │  enqueue · create_unique · force_flush · bulk_sync · stats       │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ OperationQueue │  │  FlushWorker   │  │  Reconciler<T>         │    │
//! │  │                │  │                │  │                        │    │
//! │  │ active+failed  │  │ single consumer│  │ snapshot merge that    │    │
//! │  │ mirrored to    │  │ backoff+jitter │  │ respects PendingSet    │    │
//! │  │ DurableStore   │  │ 3-attempt cap  │  │ and dedupes by key     │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ DuplicateGuard │  │  BulkSyncer    │  │  NetworkMonitor        │    │
//! │  │ check + sweep  │  │ full diff,     │  │  watch<bool>, drives   │    │
//! │  │                │  │ conflicts out  │  │  auto-flush on online  │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  STATUS: SyncStats over watch + SyncEventEmitter callbacks             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`engine`] - `SyncEngine` and its builder
//! - [`config`] - Engine configuration (device, queue keys, retry, windows)
//! - [`error`] - Sync error taxonomy
//! - [`store`] - Durable Queue Store trait and implementations
//! - [`remote`] - Remote document store trait and in-memory store
//! - [`network`] - Connectivity state
//! - [`queue`] - Operation queue with failed list
//! - [`executor`] - One flush pass over the queue
//! - [`worker`] - Serialized flush loop with backoff
//! - [`pending`] - PendingSet shared by executor and reconcilers
//! - [`reconciler`] - Real-time snapshot merge
//! - [`guard`] - Duplicate check and sweep
//! - [`bulk`] - Bulk collection sync
//! - [`stats`] - Observable `SyncStats`
//! - [`events`] - Event emitter trait
//! - [`logging`] - Tracing setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_sync::{SyncConfig, SyncEngine};
//! use tally_core::Product;
//!
//! let config = SyncConfig::load_or_default(None);
//! let engine = SyncEngine::open(config, remote).await?;
//! engine.start().await?;
//!
//! engine.create_unique(&Product::new("Lemon 500ml", Some("B1"), 250)).await?;
//!
//! let products = engine.reconciler::<Product>();
//! let handle = products.subscribe(engine.remote()).await?;
//! println!("{}", engine.stats().label());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod bulk;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod guard;
pub mod logging;
pub mod network;
pub mod pending;
pub mod queue;
pub mod reconciler;
pub mod remote;
pub mod stats;
pub mod store;
pub mod worker;

// =============================================================================
// Re-exports
// =============================================================================

pub use bulk::{AppliedWrite, BulkAction, BulkSyncReport, BulkSyncer, Resolver, SyncConflict};
pub use config::{DeviceConfig, QueueSettings, ReconcileSettings, RetrySettings, SyncConfig};
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use error::{SyncError, SyncResult};
pub use events::{IntegrityWarning, IntegrityWarningKind, NoOpEmitter, SyncEventEmitter};
pub use executor::{FlushReport, SyncExecutor};
pub use guard::{plan_sweep, DuplicateGuard, SweepPlan};
pub use network::{Connectivity, NetworkMonitor};
pub use pending::PendingSet;
pub use queue::{FailureOutcome, OperationQueue, RestoreSummary};
pub use reconciler::{Reconciler, ReconcilerHandle};
pub use remote::{Document, MemoryRemoteStore, RemoteStore, SnapshotStream};
pub use store::{DurableStore, MemoryDurableStore};
pub use worker::{FlushHandle, FlushWorker, WorkerSettings};
