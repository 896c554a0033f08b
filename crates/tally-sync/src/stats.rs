//! # Sync Stats Board
//!
//! Holds the derived [`SyncStats`] and publishes every change, both on a
//! `watch` channel (for subscribers) and through the event emitter.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;

use tally_core::{SyncPhase, SyncStats};

use crate::events::SyncEventEmitter;

pub struct StatsBoard {
    tx: watch::Sender<SyncStats>,
    emitter: Arc<dyn SyncEventEmitter>,
}

impl StatsBoard {
    pub fn new(initial: SyncStats, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        StatsBoard { tx, emitter }
    }

    /// Applies `f` and publishes if anything actually changed.
    fn update(&self, f: impl FnOnce(&mut SyncStats)) {
        let changed = self.tx.send_if_modified(|stats| {
            let before = stats.clone();
            f(stats);
            *stats != before
        });

        if changed {
            let current = self.current();
            self.emitter.emit_stats(&current);
        }
    }

    pub fn set_online(&self, online: bool) {
        self.update(|s| s.is_online = online);
    }

    pub fn set_phase(&self, phase: SyncPhase) {
        self.update(|s| s.phase = phase);
    }

    pub fn set_counts(&self, pending: usize, failed: usize) {
        self.update(|s| {
            s.pending_count = pending;
            s.failed_count = failed;
        });
    }

    pub fn set_last_sync(&self, at: DateTime<Utc>) {
        self.update(|s| s.last_sync_time = Some(at));
    }

    pub fn set_conflicts(&self, has_conflicts: bool) {
        self.update(|s| s.has_conflicts = has_conflicts);
    }

    pub fn current(&self) -> SyncStats {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStats> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingEmitter;

    #[test]
    fn test_only_real_changes_are_emitted() {
        let emitter = Arc::new(RecordingEmitter::default());
        let board = StatsBoard::new(SyncStats::default(), emitter.clone());

        board.set_online(true);
        board.set_online(true);
        board.set_counts(2, 0);

        let seen = emitter.stats.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].label(), "2 Pending");
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let board = StatsBoard::new(SyncStats::default(), Arc::new(crate::events::NoOpEmitter));
        let mut rx = board.subscribe();

        board.set_phase(SyncPhase::Syncing);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().phase, SyncPhase::Syncing);
    }
}
