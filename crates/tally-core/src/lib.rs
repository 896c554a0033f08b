//! # tally-core: Pure Types for the Tally Sync Engine
//!
//! Everything the sync engine reasons about, with zero I/O: the records the
//! POS writes, the operations it queues, and the keys used to decide whether
//! two records are the same real-world entity.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Tally Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  POS UI (inventory, checkout)                   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ enqueue / create_unique / stats        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    tally-sync (SyncEngine)                      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tally-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌────────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ operation │  │ uniqueness │  │ validation│  │   │
//! │  │   │  Product  │  │ Operation │  │ Uniqueness │  │   rules   │  │   │
//! │  │   │   Sale    │  │  Status   │  │    Key     │  │  checks   │  │   │
//! │  │   │ SyncStats │  │   Kind    │  │   Filter   │  │           │  │   │
//! │  │   └───────────┘  └───────────┘  └────────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain records (Product, Sale) and SyncStats
//! - [`operation`] - Queued mutations and their state machine
//! - [`uniqueness`] - Uniqueness keys, record trait, query filters
//! - [`error`] - Domain error types
//! - [`validation`] - Validation before anything reaches the queue
//!
//! ## Example Usage
//!
//! ```rust
//! use tally_core::operation::{NewOperation, Operation, OperationStatus};
//! use serde_json::json;
//!
//! let op = Operation::from_new(NewOperation::update("products", "p-1", json!({"price_cents": 250})));
//! assert_eq!(op.status, OperationStatus::Queued);
//! assert_eq!(op.retry_count, 0);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod operation;
pub mod types;
pub mod uniqueness;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use operation::{NewOperation, Operation, OperationId, OperationKind, OperationStatus};
pub use types::*;
pub use uniqueness::{DomainRecord, Filter, KeyPolicy, UniquenessKey};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Attempts an operation gets before it is moved to the failed list.
pub const MAX_SYNC_ATTEMPTS: u32 = 3;

/// Width of the bucket used by the sale uniqueness key.
pub const DEFAULT_SALE_WINDOW_SECS: i64 = 10;

/// Widest sale bucket a configuration may ask for (one day).
pub const MAX_SALE_WINDOW_SECS: i64 = 86_400;

/// Collection name for products in the remote store.
pub const PRODUCTS_COLLECTION: &str = "products";

/// Collection name for sales in the remote store.
pub const SALES_COLLECTION: &str = "sales";
