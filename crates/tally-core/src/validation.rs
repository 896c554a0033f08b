//! # Validation Module
//!
//! Checks run before anything is accepted into the operation queue.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: POS UI                                                       │
//! │  └── Basic format checks, immediate feedback                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: SyncEngine::enqueue / create_unique                          │
//! │  ├── THIS MODULE: shape of the operation and the record                │
//! │  └── Duplicate Guard: uniqueness key                                   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Remote store                                                 │
//! │  └── Whatever rules the hosted store enforces                          │
//! │                                                                         │
//! │  A write rejected here never enters the queue and never retries.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::operation::NewOperation;
use crate::types::{Product, Sale};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

const MAX_NAME_LEN: usize = 200;
const MAX_BARCODE_LEN: usize = 64;

// =============================================================================
// Operation Validation
// =============================================================================

/// Validates an operation before it is queued.
///
/// ## Rules
/// - `collection` must not be blank
/// - everything but `create` needs a non-blank `target_id`
/// - `create`, `update` and `upsert` payloads must be JSON objects
pub fn validate_operation(op: &NewOperation) -> ValidationResult<()> {
    if op.collection.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "collection".to_string(),
        });
    }

    if op.kind.requires_target() {
        let blank = op.target_id.as_deref().map_or(true, |id| id.trim().is_empty());
        if blank {
            return Err(ValidationError::Required {
                field: "target_id".to_string(),
            });
        }
    }

    if op.kind.carries_payload() && !op.payload.is_object() {
        return Err(ValidationError::InvalidFormat {
            field: "payload".to_string(),
            reason: format!("{} payload must be a JSON object", op.kind),
        });
    }

    Ok(())
}

// =============================================================================
// Record Validation
// =============================================================================

/// Validates a product name.
///
/// ## Example
/// ```rust
/// use tally_core::validation::validate_product_name;
///
/// assert!(validate_product_name("Lemon 500ml").is_ok());
/// assert!(validate_product_name("   ").is_err());
/// ```
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }

    if name.len() > MAX_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: MAX_NAME_LEN,
        });
    }

    Ok(())
}

pub fn validate_product(product: &Product) -> ValidationResult<()> {
    validate_product_name(&product.name)?;

    if let Some(barcode) = product.barcode.as_deref() {
        if barcode.trim().len() > MAX_BARCODE_LEN {
            return Err(ValidationError::TooLong {
                field: "barcode".to_string(),
                max: MAX_BARCODE_LEN,
            });
        }
    }

    if product.price_cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "price_cents".to_string(),
        });
    }

    Ok(())
}

/// Validates a sale.
///
/// ## Rules
/// - at least one line
/// - every line has a positive quantity
/// - total is not negative
pub fn validate_sale(sale: &Sale) -> ValidationResult<()> {
    if sale.items.is_empty() {
        return Err(ValidationError::Required {
            field: "items".to_string(),
        });
    }

    if sale.items.iter().any(|item| item.quantity <= 0) {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }

    if sale.total_cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "total_cents".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
