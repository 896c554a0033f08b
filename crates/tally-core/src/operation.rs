//! # Operations
//!
//! A queued mutation intent that has not yet been confirmed by the remote
//! store.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Operation State Machine                            │
//! │                                                                         │
//! │   enqueue()                                                            │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │  ┌────────┐  flush pass  ┌───────────┐   success   ┌─────────┐         │
//! │  │ QUEUED │─────────────►│ EXECUTING │────────────►│ APPLIED │ terminal│
//! │  └────────┘              └─────┬─────┘             └─────────┘         │
//! │      ▲                         │ failure                               │
//! │      │     retry_count < 3     │                                        │
//! │      └─────────────────────────┤                                        │
//! │      │                         │ retry_count >= 3                       │
//! │      │                         ▼                                        │
//! │      │                    ┌────────┐                                    │
//! │      └────────────────────│ FAILED │  terminal until manual resync      │
//! │        force_flush()      └────────┘                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Operation Id
// =============================================================================

/// Identifier of a queued operation.
///
/// Formatted as `<unix millis>-<8 hex chars>` so ids sort roughly by enqueue
/// time and never collide between two operations created in the same
/// millisecond.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export)]
pub struct OperationId(String);

impl OperationId {
    /// Generates a new id from the current time and a random suffix.
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis();
        let suffix = Uuid::new_v4().simple().to_string();
        OperationId(format!("{}-{}", millis, &suffix[..8]))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OperationId {
    fn from(value: String) -> Self {
        OperationId(value)
    }
}

impl From<&str> for OperationId {
    fn from(value: &str) -> Self {
        OperationId(value.to_string())
    }
}

// =============================================================================
// Operation Kind
// =============================================================================

/// Which remote-store primitive an operation dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Insert a new record (id optional).
    Create,
    /// Merge fields into an existing record.
    Update,
    /// Remove a record.
    Delete,
    /// Update if the record exists, create it with the given id otherwise.
    Upsert,
}

impl OperationKind {
    /// Returns true if this kind needs a target id to dispatch.
    pub fn requires_target(&self) -> bool {
        !matches!(self, OperationKind::Create)
    }

    /// Returns true if this kind carries a payload.
    pub fn carries_payload(&self) -> bool {
        !matches!(self, OperationKind::Delete)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
            OperationKind::Upsert => write!(f, "upsert"),
        }
    }
}

// =============================================================================
// Operation Status
// =============================================================================

/// Where an operation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting for the next flush pass.
    #[default]
    Queued,
    /// Dispatched to the remote store, result not yet known.
    Executing,
    /// Confirmed by the remote store.
    Applied,
    /// Gave up after exhausting the retry budget.
    Failed,
}

impl OperationStatus {
    /// Returns true if no automatic transition leaves this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationStatus::Applied | OperationStatus::Failed)
    }

    /// Returns true if the state machine allows `self -> next`.
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Queued, Executing)
                | (Executing, Applied)
                | (Executing, Queued)
                | (Executing, Failed)
                | (Failed, Queued)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStatus::Queued => write!(f, "queued"),
            OperationStatus::Executing => write!(f, "executing"),
            OperationStatus::Applied => write!(f, "applied"),
            OperationStatus::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// New Operation (enqueue input)
// =============================================================================

/// A mutation as submitted by a caller, before the queue assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOperation {
    /// Remote collection the mutation targets.
    pub collection: String,
    /// Primitive to dispatch to.
    pub kind: OperationKind,
    /// Record id; required for everything but `create`.
    pub target_id: Option<String>,
    /// JSON object with the record fields. `Null` for deletes.
    pub payload: Value,
}

impl NewOperation {
    /// Create with a server-assigned id.
    pub fn create(collection: impl Into<String>, payload: Value) -> Self {
        NewOperation {
            collection: collection.into(),
            kind: OperationKind::Create,
            target_id: None,
            payload,
        }
    }

    /// Create with a client-assigned id (used for optimistic records).
    pub fn create_with_id(
        collection: impl Into<String>,
        id: impl Into<String>,
        payload: Value,
    ) -> Self {
        NewOperation {
            collection: collection.into(),
            kind: OperationKind::Create,
            target_id: Some(id.into()),
            payload,
        }
    }

    pub fn update(collection: impl Into<String>, id: impl Into<String>, payload: Value) -> Self {
        NewOperation {
            collection: collection.into(),
            kind: OperationKind::Update,
            target_id: Some(id.into()),
            payload,
        }
    }

    pub fn delete(collection: impl Into<String>, id: impl Into<String>) -> Self {
        NewOperation {
            collection: collection.into(),
            kind: OperationKind::Delete,
            target_id: Some(id.into()),
            payload: Value::Null,
        }
    }

    pub fn upsert(collection: impl Into<String>, id: impl Into<String>, payload: Value) -> Self {
        NewOperation {
            collection: collection.into(),
            kind: OperationKind::Upsert,
            target_id: Some(id.into()),
            payload,
        }
    }
}

// =============================================================================
// Operation
// =============================================================================

/// A queued mutation.
///
/// Persisted to the Durable Queue Store on every change, so the JSON shape
/// is the on-disk format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Operation {
    pub id: OperationId,
    pub collection: String,
    pub kind: OperationKind,
    pub target_id: Option<String>,
    #[ts(type = "unknown")]
    pub payload: Value,
    #[ts(as = "String")]
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub status: OperationStatus,
    /// Message from the most recent failed attempt.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Operation {
    /// Stamps a new operation with an id, `retry_count = 0` and `queued`.
    pub fn from_new(new: NewOperation) -> Self {
        Operation {
            id: OperationId::generate(),
            collection: new.collection,
            kind: new.kind,
            target_id: new.target_id,
            payload: new.payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
            status: OperationStatus::Queued,
            last_error: None,
        }
    }

    /// Moves to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: OperationStatus) -> CoreResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                op_id: self.id.to_string(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Records a failed attempt.
    ///
    /// Increments `retry_count` and moves to `failed` once it reaches
    /// `max_attempts`, otherwise back to `queued`. Returns the new status.
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        max_attempts: u32,
    ) -> CoreResult<OperationStatus> {
        self.retry_count += 1;
        self.last_error = Some(error.into());

        let next = if self.retry_count >= max_attempts {
            OperationStatus::Failed
        } else {
            OperationStatus::Queued
        };
        self.transition(next)?;
        Ok(next)
    }

    /// Puts a failed operation back in line with a fresh retry budget.
    pub fn reset_for_resync(&mut self) -> CoreResult<()> {
        self.transition(OperationStatus::Queued)?;
        self.retry_count = 0;
        self.last_error = None;
        Ok(())
    }

    /// Returns true if this operation writes to `collection`/`id`.
    pub fn targets(&self, collection: &str, id: &str) -> bool {
        self.collection == collection && self.target_id.as_deref() == Some(id)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_ids_are_distinct() {
        let a = OperationId::generate();
        let b = OperationId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().contains('-'));
    }

    #[test]
    fn test_new_operation_defaults() {
        let op = Operation::from_new(NewOperation::create("products", json!({"name": "Tea"})));
        assert_eq!(op.status, OperationStatus::Queued);
        assert_eq!(op.retry_count, 0);
        assert!(op.target_id.is_none());
        assert!(op.last_error.is_none());
    }

    #[test]
    fn test_three_failures_exhaust_budget() {
        let mut op = Operation::from_new(NewOperation::delete("products", "p-1"));

        for expected in [OperationStatus::Queued, OperationStatus::Queued, OperationStatus::Failed] {
            op.transition(OperationStatus::Executing).unwrap();
            let status = op.record_failure("network down", 3).unwrap();
            assert_eq!(status, expected);
        }

        assert_eq!(op.retry_count, 3);
        assert_eq!(op.last_error.as_deref(), Some("network down"));
    }

    #[test]
    fn test_applied_is_terminal() {
        let mut op = Operation::from_new(NewOperation::delete("products", "p-1"));
        op.transition(OperationStatus::Executing).unwrap();
        op.transition(OperationStatus::Applied).unwrap();

        assert!(op.status.is_terminal());
        assert!(op.transition(OperationStatus::Queued).is_err());
        assert!(op.transition(OperationStatus::Executing).is_err());
    }

    #[test]
    fn test_resync_resets_budget() {
        let mut op = Operation::from_new(NewOperation::update("sales", "s-1", json!({})));
        op.transition(OperationStatus::Executing).unwrap();
        op.record_failure("boom", 1).unwrap();
        assert_eq!(op.status, OperationStatus::Failed);

        op.reset_for_resync().unwrap();
        assert_eq!(op.status, OperationStatus::Queued);
        assert_eq!(op.retry_count, 0);
    }

    #[test]
    fn test_kind_requirements() {
        assert!(!OperationKind::Create.requires_target());
        assert!(OperationKind::Upsert.requires_target());
        assert!(!OperationKind::Delete.carries_payload());
    }

    #[test]
    fn test_serialized_shape() {
        let op = Operation::from_new(NewOperation::upsert("products", "p-9", json!({"a": 1})));
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["kind"], "upsert");
        assert_eq!(value["status"], "queued");
        assert_eq!(value["target_id"], "p-9");
        assert!(value["id"].is_string());
    }
}
