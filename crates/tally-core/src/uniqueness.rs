//! # Uniqueness Keys
//!
//! Deciding whether two records are "the same" real-world entity.
//!
//! The same derivation feeds the pre-write check, the post-hoc sweep and the
//! reconciler's final dedup pass, so prevention and cleanup never disagree.
//!
//! ## Key Derivation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Uniqueness Keys                                  │
//! │                                                                         │
//! │  PRODUCT                                                               │
//! │  ───────                                                               │
//! │  ("  Lemon  500ml ", " B1 ")  ──►  ("lemon 500ml", Some("B1"))         │
//! │   name: trim, collapse inner whitespace, lowercase                      │
//! │   barcode: trim, empty → None                                          │
//! │                                                                         │
//! │  SALE (windowed fuzzy key)                                             │
//! │  ────                                                                  │
//! │  (total_cents, item_count, payment_method, floor(created_at / 10s))    │
//! │                                                                         │
//! │   12:00:00.0 ─┐                                                         │
//! │   12:00:02.0 ─┼─► bucket N   (same key if other fields match)           │
//! │   12:00:09.9 ─┘                                                         │
//! │   12:00:10.0 ───► bucket N+1 (different key)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::types::{PaymentMethod, Product, Sale};
use crate::validation::{validate_product, validate_sale};
use crate::{DEFAULT_SALE_WINDOW_SECS, PRODUCTS_COLLECTION, SALES_COLLECTION};

// =============================================================================
// Key Policy
// =============================================================================

/// Tunables for key derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPolicy {
    /// Width of a sale bucket in seconds.
    pub sale_window_secs: i64,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        KeyPolicy {
            sale_window_secs: DEFAULT_SALE_WINDOW_SECS,
        }
    }
}

// =============================================================================
// Uniqueness Key
// =============================================================================

/// Derived tuple deciding record identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UniquenessKey {
    Product {
        name: String,
        barcode: Option<String>,
    },
    Sale {
        total_cents: i64,
        item_count: usize,
        payment_method: PaymentMethod,
        bucket: i64,
    },
}

impl fmt::Display for UniquenessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniquenessKey::Product { name, barcode } => {
                write!(f, "{}|{}", name, barcode.as_deref().unwrap_or(""))
            }
            UniquenessKey::Sale {
                total_cents,
                item_count,
                payment_method,
                bucket,
            } => write!(f, "{}_{}_{}_{}", total_cents, item_count, payment_method, bucket),
        }
    }
}

/// Trims, collapses inner whitespace and lowercases a product name.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Trims a barcode; blank barcodes count as absent.
pub fn normalize_barcode(barcode: Option<&str>) -> Option<String> {
    barcode
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
}

/// `floor(timestamp / window)` with the window in seconds.
pub fn window_bucket(at: DateTime<Utc>, window_secs: i64) -> i64 {
    let window_ms = window_secs.max(1).saturating_mul(1000);
    at.timestamp_millis().div_euclid(window_ms)
}

// =============================================================================
// Query Filter
// =============================================================================

/// Filter understood by the remote store's `query` and `snapshot`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Filter {
    /// Every document in the collection.
    #[default]
    All,
    /// The document with this id.
    Id(String),
    /// Documents whose top-level `field` equals `value`.
    Eq { field: String, value: Value },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Returns true if a document with `id` and `data` passes this filter.
    pub fn matches(&self, id: &str, data: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Id(wanted) => wanted == id,
            Filter::Eq { field, value } => data.get(field) == Some(value),
        }
    }
}

// =============================================================================
// Domain Record
// =============================================================================

/// A record kind the engine can guard, reconcile and bulk-sync.
pub trait DomainRecord:
    Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Remote collection holding this record kind.
    const COLLECTION: &'static str;

    fn id(&self) -> &str;

    fn created_at(&self) -> DateTime<Utc>;

    fn updated_at(&self) -> DateTime<Utc>;

    fn uniqueness_key(&self, policy: &KeyPolicy) -> UniquenessKey;

    /// Field-level checks run before the record may be queued.
    fn validate(&self) -> CoreResult<()> {
        Ok(())
    }

    /// Narrows the remote lookup done by the pre-write check. Candidates
    /// are still compared by full key afterwards.
    fn lookup_filter(&self) -> Filter {
        Filter::All
    }

    /// Serializes the record as an operation payload.
    fn to_payload(&self) -> CoreResult<Value> {
        serde_json::to_value(self).map_err(|e| CoreError::MalformedPayload {
            collection: Self::COLLECTION.to_string(),
            reason: e.to_string(),
        })
    }

    /// Reads a record back from a stored document, filling in `id` when the
    /// document body does not carry it.
    fn from_document(id: &str, data: &Value) -> CoreResult<Self> {
        let mut data = data.clone();
        if let Value::Object(ref mut map) = data {
            map.entry("id")
                .or_insert_with(|| Value::String(id.to_string()));
        }
        serde_json::from_value(data).map_err(|e| CoreError::MalformedPayload {
            collection: Self::COLLECTION.to_string(),
            reason: e.to_string(),
        })
    }
}

impl DomainRecord for Product {
    const COLLECTION: &'static str = PRODUCTS_COLLECTION;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn uniqueness_key(&self, _policy: &KeyPolicy) -> UniquenessKey {
        UniquenessKey::Product {
            name: normalize_name(&self.name),
            barcode: normalize_barcode(self.barcode.as_deref()),
        }
    }

    fn validate(&self) -> CoreResult<()> {
        Ok(validate_product(self)?)
    }
}

impl DomainRecord for Sale {
    const COLLECTION: &'static str = SALES_COLLECTION;

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn uniqueness_key(&self, policy: &KeyPolicy) -> UniquenessKey {
        UniquenessKey::Sale {
            total_cents: self.total_cents,
            item_count: self.item_count(),
            payment_method: self.payment_method,
            bucket: window_bucket(self.created_at, policy.sale_window_secs),
        }
    }

    fn lookup_filter(&self) -> Filter {
        Filter::eq("total_cents", self.total_cents)
    }

    fn validate(&self) -> CoreResult<()> {
        Ok(validate_sale(self)?)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SaleItem;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sale_at(secs: i64, millis: u32) -> Sale {
        let at = Utc.timestamp_opt(secs, millis * 1_000_000).unwrap();
        let items = vec![
            SaleItem {
                product_id: "p-1".into(),
                name: "Lemon".into(),
                quantity: 1,
                unit_price_cents: 500,
            },
            SaleItem {
                product_id: "p-2".into(),
                name: "Bread".into(),
                quantity: 1,
                unit_price_cents: 750,
            },
        ];
        Sale::new(items, 1250, PaymentMethod::Cash, at)
    }

    #[test]
    fn test_product_key_normalization() {
        let a = Product::new("  Lemon   500ML ", Some(" B1 "), 100);
        let b = Product::new("lemon 500ml", Some("B1"), 250);
        let policy = KeyPolicy::default();

        assert_eq!(a.uniqueness_key(&policy), b.uniqueness_key(&policy));
        assert_eq!(a.uniqueness_key(&policy).to_string(), "lemon 500ml|B1");
    }

    #[test]
    fn test_blank_barcode_is_absent() {
        assert_eq!(normalize_barcode(Some("   ")), None);
        assert_eq!(normalize_barcode(None), None);

        let policy = KeyPolicy::default();
        let with_blank = Product::new("Tea", Some(""), 100);
        let without = Product::new("Tea", None, 100);
        assert_eq!(with_blank.uniqueness_key(&policy), without.uniqueness_key(&policy));
    }

    #[test]
    fn test_different_barcode_is_different_product() {
        let policy = KeyPolicy::default();
        let a = Product::new("Tea", Some("111"), 100);
        let b = Product::new("Tea", Some("222"), 100);
        assert_ne!(a.uniqueness_key(&policy), b.uniqueness_key(&policy));
    }

    #[test]
    fn test_sale_bucket_edges() {
        let policy = KeyPolicy::default();
        let base = 1_700_000_000; // divisible by 10

        let first = sale_at(base, 0);
        let inside = sale_at(base + 9, 999);
        let next = sale_at(base + 10, 0);

        assert_eq!(first.uniqueness_key(&policy), inside.uniqueness_key(&policy));
        assert_ne!(first.uniqueness_key(&policy), next.uniqueness_key(&policy));
    }

    #[test]
    fn test_sale_key_display() {
        let policy = KeyPolicy::default();
        let sale = sale_at(1_700_000_000, 0);
        assert_eq!(
            sale.uniqueness_key(&policy).to_string(),
            "1250_2_cash_170000000"
        );
    }

    #[test]
    fn test_window_bucket_before_epoch_floors() {
        let at = Utc.timestamp_opt(-1, 0).unwrap();
        assert_eq!(window_bucket(at, 10), -1);
    }

    #[test]
    fn test_window_bucket_huge_window_saturates() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        assert_eq!(window_bucket(at, i64::MAX), 0);
        assert_eq!(window_bucket(at, 0), at.timestamp_millis() / 1000);
    }

    #[test]
    fn test_filter_matching() {
        let data = json!({"total_cents": 1250, "name": "x"});
        assert!(Filter::All.matches("a", &data));
        assert!(Filter::Id("a".into()).matches("a", &data));
        assert!(!Filter::Id("b".into()).matches("a", &data));
        assert!(Filter::eq("total_cents", 1250).matches("a", &data));
        assert!(!Filter::eq("total_cents", 99).matches("a", &data));
        assert!(!Filter::eq("missing", 1).matches("a", &data));
    }

    #[test]
    fn test_from_document_fills_id() {
        let product = Product::new("Tea", None, 100);
        let mut payload = product.to_payload().unwrap();
        payload.as_object_mut().unwrap().remove("id");

        let back = Product::from_document(&product.id, &payload).unwrap();
        assert_eq!(back, product);
    }

    #[test]
    fn test_from_document_rejects_garbage() {
        let result = Product::from_document("x", &json!({"name": 5}));
        assert!(matches!(result, Err(CoreError::MalformedPayload { .. })));
    }
}
