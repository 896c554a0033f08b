//! # Error Types
//!
//! Domain-specific error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tally-core errors (this file)                                         │
//! │  ├── CoreError        - Operation state machine violations             │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tally-db errors (separate crate)                                      │
//! │  └── DbError          - Durable Queue Store failures                   │
//! │                                                                         │
//! │  tally-sync errors                                                     │
//! │  └── SyncError        - What the UI sees                               │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → UI                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::operation::OperationStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An operation was asked to move between two states that are not
    /// connected in its state machine.
    ///
    /// ## When This Occurs
    /// - Retrying an operation that already reached `applied`
    /// - Executing an operation that is already `failed`
    ///
    /// ## Allowed Transitions
    /// ```text
    /// queued ──► executing ──► applied   (terminal)
    ///               │    └───► failed    (terminal until manual resync)
    ///               └────────► queued    (retry)
    /// failed ──► queued                  (manual resync only)
    /// ```
    #[error("Operation {op_id} cannot move from {from} to {to}")]
    InvalidTransition {
        op_id: String,
        from: OperationStatus,
        to: OperationStatus,
    },

    /// A payload could not be read back into a domain record.
    #[error("Payload for {collection} is not a valid record: {reason}")]
    MalformedPayload { collection: String, reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before an operation is accepted into the queue, so a rejected
/// write never costs a retry.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., payload is not an object).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_message() {
        let err = CoreError::InvalidTransition {
            op_id: "1700000000000-ab12cd34".to_string(),
            from: OperationStatus::Applied,
            to: OperationStatus::Queued,
        };
        assert_eq!(
            err.to_string(),
            "Operation 1700000000000-ab12cd34 cannot move from applied to queued"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "collection".to_string(),
        };
        assert_eq!(err.to_string(), "collection is required");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "name".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
