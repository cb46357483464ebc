//! Transaction domain entity.
//! Framework-agnostic representation of a payment or refund transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Outcome of a transaction. `Succeeded` is terminal: no operation may
/// move a succeeded transaction to any other status. `Failed` is
/// re-enterable so a delayed success notification can still land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Succeeded,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Succeeded => "succeeded",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(TransactionStatus::Pending),
            "succeeded" => Some(TransactionStatus::Succeeded),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Succeeded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Payment,
    Refund,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Payment => "payment",
            TransactionKind::Refund => "refund",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "payment" => Some(TransactionKind::Payment),
            "refund" => Some(TransactionKind::Refund),
            _ => None,
        }
    }
}

/// Well-known metadata keys written by this service.
pub struct MetadataKey;

impl MetadataKey {
    pub const SESSION_KEY: &'static str = "vendor_session_key";
    pub const VENDOR_RESPONSE: &'static str = "vendor_response";
    pub const RAW_NOTIFICATION: &'static str = "vendor_raw_notification";
    pub const FAILURE_REASON: &'static str = "failure_reason";
    pub const VENDOR_REFUND_ID: &'static str = "vendor_refund_id";
}

/// A payment (or refund) transaction. The host order system owns the
/// record; this service only mutates the payment fields. Amounts are
/// integer minor units, never floats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub order_id: Uuid,
    /// Opaque, vendor-visible correlation id. Stable for the lifetime
    /// of the transaction.
    pub reference: String,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub total_minor: i64,
    pub refunded_total_minor: i64,
    pub currency: String,
    /// Vendor's validation id, set only on success.
    pub vendor_charge_id: Option<String>,
    pub card_brand: Option<String>,
    pub card_last_4: Option<String>,
    /// Reference of the parent payment, set on refund records.
    pub parent_reference: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new_payment(order_id: Uuid, total_minor: i64, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            reference: Uuid::new_v4().to_string(),
            kind: TransactionKind::Payment,
            status: TransactionStatus::Pending,
            total_minor,
            refunded_total_minor: 0,
            currency: currency.to_uppercase(),
            vendor_charge_id: None,
            card_brand: None,
            card_last_4: None,
            parent_reference: None,
            metadata: Value::Object(Map::new()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Reads a string value out of the metadata map.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Last-write-wins union of two metadata objects, computed without
/// mutating either input. Non-object inputs are treated as empty maps.
pub fn merge_metadata(old: &Value, patch: Value) -> Value {
    let mut merged = match old {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Value::Object(incoming) = patch {
        for (key, value) in incoming {
            merged.insert(key, value);
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Succeeded,
            TransactionStatus::Failed,
        ] {
            assert_eq!(TransactionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TransactionStatus::parse("refunded"), None);
    }

    #[test]
    fn test_only_succeeded_is_terminal() {
        assert!(TransactionStatus::Succeeded.is_terminal());
        assert!(!TransactionStatus::Pending.is_terminal());
        assert!(!TransactionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_merge_metadata_last_write_wins() {
        let old = json!({"a": 1, "b": "keep"});
        let merged = merge_metadata(&old, json!({"a": 2, "c": true}));
        assert_eq!(merged, json!({"a": 2, "b": "keep", "c": true}));
        // inputs untouched
        assert_eq!(old, json!({"a": 1, "b": "keep"}));
    }

    #[test]
    fn test_merge_metadata_tolerates_non_objects() {
        let merged = merge_metadata(&Value::Null, json!({"k": "v"}));
        assert_eq!(merged, json!({"k": "v"}));
        let merged = merge_metadata(&json!({"k": "v"}), Value::Null);
        assert_eq!(merged, json!({"k": "v"}));
    }

    #[test]
    fn test_new_payment_defaults() {
        let tx = Transaction::new_payment(Uuid::new_v4(), 10_000, "bdt");
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.currency, "BDT");
        assert!(tx.vendor_charge_id.is_none());
        assert!(tx.metadata.is_object());
    }
}
