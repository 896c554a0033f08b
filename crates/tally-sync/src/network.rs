//! # Network Monitor
//!
//! Binary online/offline state fed by the platform's connectivity signals.
//!
//! ```text
//!   platform event ──► set_online(bool) ──► watch channel ──► FlushWorker
//!                                              │
//!                                              └──────────► SyncStats
//! ```
//!
//! Going online makes the flush worker start a pass immediately. Going
//! offline stops new passes from starting; a pass already running keeps
//! going until its current remote call returns.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Connectivity as last reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Online,
    Offline,
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Online => write!(f, "online"),
            Connectivity::Offline => write!(f, "offline"),
        }
    }
}

/// Shared handle on the current connectivity state.
#[derive(Clone, Debug)]
pub struct NetworkMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl NetworkMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        NetworkMonitor { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn connectivity(&self) -> Connectivity {
        if self.is_online() {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }

    /// Records a platform connectivity event.
    ///
    /// ## Returns
    /// `true` if the state actually changed. Repeated events with the same
    /// value do not wake subscribers.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            info!(state = %self.connectivity(), "Connectivity changed");
        }
        changed
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        assert!(NetworkMonitor::new(true).is_online());
        assert_eq!(NetworkMonitor::new(false).connectivity(), Connectivity::Offline);
    }

    #[tokio::test]
    async fn test_transition_notifies_subscribers() {
        let monitor = NetworkMonitor::new(false);
        let mut rx = monitor.subscribe();

        assert!(monitor.set_online(true));
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }

    #[test]
    fn test_repeated_event_is_not_a_change() {
        let monitor = NetworkMonitor::new(true);
        let rx = monitor.subscribe();

        assert!(!monitor.set_online(true));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_clones_share_state() {
        let monitor = NetworkMonitor::new(true);
        let other = monitor.clone();
        other.set_online(false);
        assert!(!monitor.is_online());
    }
}
