//! # Flush Worker
//!
//! The single consumer of flush requests. Every pass runs on this task, so
//! two passes never overlap no matter how often connectivity flaps.
//!
//! ## Event Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        FlushWorker::run                                 │
//! │                                                                         │
//! │   ┌──────────────┐                                                      │
//! │   │  shutdown    │──► stop                                              │
//! │   ├──────────────┤                                                      │
//! │   │  request     │──► Pass / Resync (requeue failed, then pass)         │
//! │   ├──────────────┤                                                      │
//! │   │  network     │──► went online: reset backoff, pass now              │
//! │   ├──────────────┤                                                      │
//! │   │  retry timer │──► pass                                              │
//! │   ├──────────────┤                                                      │
//! │   │  maintenance │──► release stuck pending ids                         │
//! │   └──────────────┘                                                      │
//! │                                                                         │
//! │  After each pass:                                                      │
//! │    ops left and online ──► arm retry timer from ExponentialBackoff      │
//! │                            (5s, 10s, 20s ... ≤ 60s, ±50% jitter)        │
//! │    queue drained       ──► reset backoff, disarm timer                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::error::{SyncError, SyncResult};
use crate::executor::{FlushReport, SyncExecutor};
use crate::queue::OperationQueue;
use crate::stats::StatsBoard;

type Reply = oneshot::Sender<SyncResult<FlushReport>>;

/// Work item for the flush worker.
#[derive(Debug)]
pub enum FlushRequest {
    /// Run one pass over the queued operations.
    Pass { reply: Option<Reply> },
    /// Requeue failed operations with a fresh budget, then run a pass.
    Resync { reply: Option<Reply> },
}

/// Timing knobs for the worker.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub backoff: ExponentialBackoff,
    pub pending_ttl: Duration,
    pub maintenance_interval: Duration,
}

// =============================================================================
// Flush Worker
// =============================================================================

pub struct FlushWorker {
    executor: SyncExecutor,
    queue: Arc<OperationQueue>,
    stats: Arc<StatsBoard>,
    network_rx: watch::Receiver<bool>,
    request_rx: mpsc::Receiver<FlushRequest>,
    shutdown_rx: mpsc::Receiver<()>,
    settings: WorkerSettings,
    retry_at: Option<Instant>,
}

/// Handle for sending work to a running flush worker.
#[derive(Clone)]
pub struct FlushHandle {
    request_tx: mpsc::Sender<FlushRequest>,
    shutdown_tx: mpsc::Sender<()>,
}

impl FlushHandle {
    /// Asks for a pass without waiting for it.
    ///
    /// A full channel means passes are already lined up, so the request is
    /// dropped.
    pub fn trigger(&self) {
        match self.request_tx.try_send(FlushRequest::Pass { reply: None }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Flush already pending, trigger coalesced");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Flush worker gone, trigger dropped");
            }
        }
    }

    /// Runs a pass and waits for its report.
    pub async fn flush_now(&self) -> SyncResult<FlushReport> {
        self.request(|reply| FlushRequest::Pass { reply: Some(reply) })
            .await
    }

    /// Requeues failed operations, runs a pass and waits for its report.
    pub async fn resync(&self) -> SyncResult<FlushReport> {
        self.request(|reply| FlushRequest::Resync { reply: Some(reply) })
            .await
    }

    async fn request(&self, make: impl FnOnce(Reply) -> FlushRequest) -> SyncResult<FlushReport> {
        let (tx, rx) = oneshot::channel();
        self.request_tx
            .send(make(tx))
            .await
            .map_err(|_| SyncError::ShuttingDown)?;

        rx.await
            .map_err(|_| SyncError::ChannelError("Flush reply dropped".into()))?
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Shutdown channel closed".into()))
    }
}

impl FlushWorker {
    /// Creates a new worker and returns a handle.
    pub fn new(
        executor: SyncExecutor,
        queue: Arc<OperationQueue>,
        stats: Arc<StatsBoard>,
        network_rx: watch::Receiver<bool>,
        settings: WorkerSettings,
    ) -> (Self, FlushHandle) {
        let (request_tx, request_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let worker = FlushWorker {
            executor,
            queue,
            stats,
            network_rx,
            request_rx,
            shutdown_rx,
            settings,
            retry_at: None,
        };

        let handle = FlushHandle {
            request_tx,
            shutdown_tx,
        };

        (worker, handle)
    }

    /// Runs the worker loop.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!("Flush worker starting");

        let period = self.settings.maintenance_interval;
        let mut maintenance = tokio::time::interval_at(Instant::now() + period, period);
        maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Drain whatever was restored from the queue store.
        let online = *self.network_rx.borrow_and_update();
        self.stats.set_online(online);
        if online {
            self.flush(None, false).await;
        }

        loop {
            let retry_at = self.retry_at;

            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    info!("Flush worker shutting down");
                    break;
                }

                request = self.request_rx.recv() => {
                    match request {
                        Some(FlushRequest::Pass { reply }) => self.flush(reply, false).await,
                        Some(FlushRequest::Resync { reply }) => self.flush(reply, true).await,
                        None => break,
                    }
                }

                changed = self.network_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *self.network_rx.borrow_and_update();
                    self.stats.set_online(online);
                    if online {
                        info!("Back online, flushing queue");
                        self.settings.backoff.reset();
                        self.flush(None, false).await;
                    } else {
                        debug!("Offline, retry timer disarmed");
                        self.retry_at = None;
                    }
                }

                _ = wait_until(retry_at) => {
                    self.retry_at = None;
                    debug!("Retry timer fired");
                    self.flush(None, false).await;
                }

                _ = maintenance.tick() => {
                    self.queue
                        .expire_stale_pending(self.settings.pending_ttl)
                        .await;
                }
            }
        }

        info!("Flush worker stopped");
    }

    async fn flush(&mut self, reply: Option<Reply>, resync: bool) {
        let result = if resync {
            match self.queue.requeue_failed().await {
                Ok(_) => self.executor.run_pass().await,
                Err(e) => Err(e),
            }
        } else {
            self.executor.run_pass().await
        };

        match &result {
            Ok(report) if !report.needs_retry() => {
                self.settings.backoff.reset();
                self.retry_at = None;
            }
            Ok(report) => {
                if *self.network_rx.borrow() {
                    self.arm_retry(report.remaining);
                }
            }
            Err(e) => {
                error!(?e, "Flush pass failed");
                self.arm_retry(0);
            }
        }

        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }

    fn arm_retry(&mut self, remaining: usize) {
        let delay = self
            .settings
            .backoff
            .next_backoff()
            .unwrap_or(self.settings.backoff.max_interval);
        self.retry_at = Some(Instant::now() + delay);
        debug!(?delay, remaining, "Scheduled retry pass");
    }
}

async fn wait_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
