//! # Sync Error Types
//!
//! Error types for the sync engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │  Remote Store   │  │    Write Rejection      │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Network ⟲      │  │  Duplicate              │ │
//! │  │  MissingDeviceId│  │  RemoteNotFound │  │  Validation             │ │
//! │  │  ConfigLoad/Save│  │  RemoteRejected │  │  Offline                │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Storage      │  │     Queue       │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  StorageError   │  │ ExhaustedRetries│  │  ChannelError           │ │
//! │  │  Serialization  │  │                 │  │  ShuttingDown           │ │
//! │  │                 │  │                 │  │  NotStarted             │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ⟲ = retried by the executor, surfaced only after the budget runs out  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Integrity warnings are not errors; see [`crate::events::IntegrityWarning`].

use thiserror::Error;

use tally_core::{CoreError, OperationId, ValidationError};

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID.
    #[error("Device ID not configured. Run initial setup first.")]
    MissingDeviceId,

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Remote Store Errors
    // =========================================================================
    /// Transient network failure talking to the remote store.
    ///
    /// ## When This Occurs
    /// - Connectivity dropped mid-request
    /// - Remote store temporarily unavailable or timed out
    ///
    /// ## Handling
    /// Counted against the operation's retry budget; the user only hears
    /// about it once the budget is exhausted.
    #[error("Network error: {0}")]
    Network(String),

    /// The target document does not exist.
    #[error("{collection}/{id} not found in remote store")]
    RemoteNotFound { collection: String, id: String },

    /// The remote store refused the write.
    #[error("Remote store rejected write: {0}")]
    RemoteRejected(String),

    // =========================================================================
    // Write Rejection
    // =========================================================================
    /// A record with the same uniqueness key already exists.
    ///
    /// ## When This Occurs
    /// - Creating a product whose normalized (name, barcode) is taken
    /// - Recording a sale that matches another in the same time bucket
    ///
    /// ## Handling
    /// Raised before anything is queued. Never retried.
    #[error("Duplicate {collection} record: key '{key}' already used by {existing_id}")]
    Duplicate {
        collection: String,
        key: String,
        existing_id: String,
    },

    /// Input failed validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The action needs connectivity.
    ///
    /// ## When This Occurs
    /// - Manual force sync while offline
    /// - Bulk collection sync or duplicate sweep while offline
    #[error("Device is offline")]
    Offline,

    // =========================================================================
    // Queue Errors
    // =========================================================================
    /// An operation failed on every attempt and was moved to the failed list.
    ///
    /// ## Handling
    /// Reported once through the event emitter. A manual `force_flush`
    /// puts the operation back in the queue with a fresh budget.
    #[error("Operation {op_id} failed after {attempts} attempts: {last_error}")]
    ExhaustedRetries {
        op_id: OperationId,
        attempts: u32,
        last_error: String,
    },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Durable Queue Store failure.
    #[error("Queue store error: {0}")]
    StorageError(String),

    /// Failed to (de)serialize queue contents or records.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Engine is shutting down.
    #[error("Sync engine is shutting down")]
    ShuttingDown,

    /// The flush worker has not been started.
    #[error("Sync engine not started")]
    NotStarted,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<tally_db::DbError> for SyncError {
    fn from(err: tally_db::DbError) -> Self {
        SyncError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => SyncError::Validation(v.to_string()),
            CoreError::MalformedPayload { .. } => SyncError::SerializationFailed(err.to_string()),
            CoreError::InvalidTransition { .. } => SyncError::Internal(err.to_string()),
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::Validation(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if a later attempt of the same write may succeed.
    ///
    /// ## Retryable Errors
    /// - Network failures
    /// - Queue store contention
    ///
    /// ## Non-Retryable Errors
    /// - Duplicates and validation failures
    /// - Configuration errors
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_) | SyncError::StorageError(_))
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if a uniqueness check rejected the write.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, SyncError::Duplicate { .. })
    }

    /// Returns true if the write was rejected before reaching the queue.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SyncError::Duplicate { .. } | SyncError::Validation(_) | SyncError::Offline
        )
    }
}
