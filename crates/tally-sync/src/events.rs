//! # Sync Events
//!
//! Notifications the engine pushes to the UI layer.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Engine Events                                 │
//! │                                                                         │
//! │  emit_stats              status chip, pending badge, last-sync time     │
//! │  emit_failure            once per operation that exhausted its retries  │
//! │  emit_integrity_warning  dedup removed something (data-quality signal)  │
//! │  emit_conflicts          bulk sync left conflicts for the user          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use tally_core::{Operation, SyncStats};

use crate::error::SyncError;

// =============================================================================
// Integrity Warning
// =============================================================================

/// What kind of data-quality problem was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityWarningKind {
    /// The reconciler dropped records sharing a uniqueness key from the view.
    DuplicateInView,
    /// The reconciler saw two records with the same id.
    IdCollision,
    /// A sweep deleted duplicate records from the remote store.
    SweepRemovedDuplicates,
}

impl fmt::Display for IntegrityWarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityWarningKind::DuplicateInView => write!(f, "duplicate_in_view"),
            IntegrityWarningKind::IdCollision => write!(f, "id_collision"),
            IntegrityWarningKind::SweepRemovedDuplicates => write!(f, "sweep_removed_duplicates"),
        }
    }
}

/// A logged, never-thrown signal that duplicate data was found.
///
/// Seeing one means something upstream produced duplicates and is worth
/// investigating. The engine has already corrected the view or the store.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrityWarning {
    pub collection: String,
    pub kind: IntegrityWarningKind,
    /// Records dropped or deleted.
    pub removed: usize,
    pub detail: String,
}

// =============================================================================
// Event Emitter Trait
// =============================================================================

/// Receives engine events (implemented by the UI integration).
pub trait SyncEventEmitter: Send + Sync {
    /// Emits updated sync stats.
    fn emit_stats(&self, stats: &SyncStats);

    /// Emits a user-visible failure for an operation that exhausted its
    /// retry budget. Called exactly once per exhaustion.
    fn emit_failure(&self, op: &Operation, error: &SyncError);

    fn emit_integrity_warning(&self, warning: &IntegrityWarning);

    /// Emits the number of unresolved bulk-sync conflicts.
    fn emit_conflicts(&self, collection: &str, count: usize);
}

/// No-op event emitter for headless use and tests.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_stats(&self, _stats: &SyncStats) {}
    fn emit_failure(&self, _op: &Operation, _error: &SyncError) {}
    fn emit_integrity_warning(&self, _warning: &IntegrityWarning) {}
    fn emit_conflicts(&self, _collection: &str, _count: usize) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Emitter that keeps everything it receives.
    #[derive(Default)]
    pub struct RecordingEmitter {
        pub stats: Mutex<Vec<SyncStats>>,
        pub failures: Mutex<Vec<(Operation, String)>>,
        pub warnings: Mutex<Vec<IntegrityWarning>>,
        pub conflicts: Mutex<Vec<(String, usize)>>,
    }

    impl RecordingEmitter {
        pub fn failure_count(&self) -> usize {
            self.failures.lock().unwrap().len()
        }

        pub fn warnings(&self) -> Vec<IntegrityWarning> {
            self.warnings.lock().unwrap().clone()
        }
    }

    impl SyncEventEmitter for RecordingEmitter {
        fn emit_stats(&self, stats: &SyncStats) {
            self.stats.lock().unwrap().push(stats.clone());
        }

        fn emit_failure(&self, op: &Operation, error: &SyncError) {
            self.failures
                .lock()
                .unwrap()
                .push((op.clone(), error.to_string()));
        }

        fn emit_integrity_warning(&self, warning: &IntegrityWarning) {
            self.warnings.lock().unwrap().push(warning.clone());
        }

        fn emit_conflicts(&self, collection: &str, count: usize) {
            self.conflicts
                .lock()
                .unwrap()
                .push((collection.to_string(), count));
        }
    }
}
