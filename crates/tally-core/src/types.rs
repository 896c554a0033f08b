//! # Domain Types
//!
//! The records the POS writes through the sync engine, and the derived
//! status shown in the UI chrome.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Product      │   │      Sale       │   │   SyncStats     │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  is_online      │       │
//! │  │  name    ◄─key  │   │  total   ◄─key  │   │  phase          │       │
//! │  │  barcode ◄─key  │   │  items   ◄─key  │   │  pending_count  │       │
//! │  │  price_cents    │   │  method  ◄─key  │   │  last_sync_time │       │
//! │  │  stock          │   │  created ◄─key  │   │  failed_count   │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ◄─key marks the fields feeding the uniqueness key (see uniqueness.rs)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All monetary values are integer cents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;
use uuid::Uuid;

// =============================================================================
// Product
// =============================================================================

/// A product in the shop's catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Product {
    /// Unique identifier (UUID v4), assigned on the device.
    pub id: String,

    /// Display name shown to cashier and on receipt.
    pub name: String,

    /// Barcode (EAN-13, UPC-A, etc.).
    #[serde(default)]
    pub barcode: Option<String>,

    /// Price in cents.
    pub price_cents: i64,

    /// Current stock level.
    #[serde(default)]
    pub current_stock: Option<i64>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Creates a product with a fresh id, stamped now.
    pub fn new(name: impl Into<String>, barcode: Option<&str>, price_cents: i64) -> Self {
        let now = Utc::now();
        Product {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            barcode: barcode.map(str::to_string),
            price_cents,
            current_stock: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// Payment Method
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Physical cash payment.
    Cash,
    /// Card payment on external terminal.
    ExternalCard,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Cash => write!(f, "cash"),
            PaymentMethod::ExternalCard => write!(f, "external_card"),
        }
    }
}

// =============================================================================
// Sale
// =============================================================================

/// A line on a sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleItem {
    pub product_id: String,
    /// Product name at time of sale (frozen).
    pub name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

/// A completed checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Sale {
    pub id: String,

    /// Client-generated idempotency token. Stored with the sale but not part
    /// of the uniqueness key.
    #[serde(default)]
    pub transaction_id: Option<String>,

    pub items: Vec<SaleItem>,

    pub total_cents: i64,

    pub payment_method: PaymentMethod,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    /// Creates a sale with fresh id and transaction id, stamped `at`.
    pub fn new(
        items: Vec<SaleItem>,
        total_cents: i64,
        payment_method: PaymentMethod,
        at: DateTime<Utc>,
    ) -> Self {
        Sale {
            id: Uuid::new_v4().to_string(),
            transaction_id: Some(Uuid::new_v4().to_string()),
            items,
            total_cents,
            payment_method,
            created_at: at,
            updated_at: at,
        }
    }

    /// Number of lines on the sale.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

// =============================================================================
// Sync Stats
// =============================================================================

/// What the executor is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    /// The last pass moved at least one operation to the failed list.
    Error,
}

/// Derived sync status for the UI chrome (online dot, pending badge,
/// last-sync timestamp). Never stored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncStats {
    pub is_online: bool,
    pub phase: SyncPhase,
    /// Operations still in the active queue.
    pub pending_count: usize,
    /// Operations that exhausted their retries and wait for a manual resync.
    pub failed_count: usize,
    #[ts(as = "Option<String>")]
    pub last_sync_time: Option<DateTime<Utc>>,
    /// The last bulk sync returned unresolved conflicts.
    pub has_conflicts: bool,
}

impl SyncStats {
    /// Status chip text, in priority order: offline beats error beats
    /// syncing beats pending.
    pub fn label(&self) -> String {
        if !self.is_online {
            "Offline".to_string()
        } else if self.phase == SyncPhase::Error {
            "Sync Error".to_string()
        } else if self.phase == SyncPhase::Syncing {
            "Syncing...".to_string()
        } else if self.pending_count > 0 {
            format!("{} Pending", self.pending_count)
        } else {
            "Synced".to_string()
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_labels() {
        let mut stats = SyncStats::default();
        assert_eq!(stats.label(), "Offline");

        stats.is_online = true;
        assert_eq!(stats.label(), "Synced");

        stats.pending_count = 4;
        assert_eq!(stats.label(), "4 Pending");

        stats.phase = SyncPhase::Syncing;
        assert_eq!(stats.label(), "Syncing...");

        stats.phase = SyncPhase::Error;
        assert_eq!(stats.label(), "Sync Error");

        stats.is_online = false;
        assert_eq!(stats.label(), "Offline");
    }

    #[test]
    fn test_product_json_field_names() {
        let product = Product::new("Lemon 500ml", Some("B1"), 250);
        let value = serde_json::to_value(&product).unwrap();
        assert_eq!(value["name"], "Lemon 500ml");
        assert_eq!(value["barcode"], "B1");
        assert_eq!(value["price_cents"], 250);
    }

    #[test]
    fn test_sale_carries_transaction_id() {
        let sale = Sale::new(vec![], 0, PaymentMethod::Cash, Utc::now());
        assert!(sale.transaction_id.is_some());
        assert_ne!(sale.transaction_id.as_deref(), Some(sale.id.as_str()));
        assert_eq!(sale.item_count(), 0);
    }
}
