//! Trait seams between the payment core and its collaborators: the
//! transaction store, the host order system, and the vendor API.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{OrderContext, Transaction};
use crate::vendor::wire::{
    RefundResponse, SessionPayload, SessionResponse, ValidationRecord,
};
use crate::vendor::VendorError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("store error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a compare-and-set status update. `AlreadySucceeded` means
/// the guard refused the write because the row is terminal.
#[derive(Debug, Clone)]
pub enum CasOutcome {
    Applied(Transaction),
    AlreadySucceeded(Transaction),
}

/// Fields applied atomically when a transaction is confirmed. The
/// validated amount is authoritative over the originally requested one.
#[derive(Debug, Clone)]
pub struct SuccessUpdate {
    pub vendor_charge_id: String,
    pub total_minor: i64,
    pub card_brand: Option<String>,
    pub card_last_4: Option<String>,
    pub metadata_patch: Value,
}

#[derive(Debug, Clone)]
pub struct FailureUpdate {
    pub metadata_patch: Value,
}

/// A new refund record, linked to its parent payment.
#[derive(Debug, Clone)]
pub struct NewRefund {
    pub order_id: Uuid,
    pub parent_reference: String,
    pub vendor_charge_id: Option<String>,
    pub total_minor: i64,
    pub currency: String,
    pub metadata: Value,
}

/// Host-owned transaction records. Writes to the status column must be
/// atomic relative to concurrent reconciliation attempts for the same
/// reference; implementations guard the succeed/fail transitions with a
/// compare-and-set on the current status.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>>;

    /// Most recent pending payment for an order, if any. Used by the
    /// session bootstrap when the caller holds an order reference
    /// instead of a transaction reference.
    async fn find_pending_payment_for_order(
        &self,
        order_id: Uuid,
    ) -> StoreResult<Option<Transaction>>;

    /// Transition to `succeeded` unless the row is already terminal.
    async fn mark_succeeded(
        &self,
        reference: &str,
        update: SuccessUpdate,
    ) -> StoreResult<CasOutcome>;

    /// Transition to `failed` unless the row is terminal. The metadata
    /// patch is merged only on the first transition to `failed`;
    /// repeated failing probes do not churn metadata.
    async fn mark_failed(&self, reference: &str, update: FailureUpdate)
        -> StoreResult<CasOutcome>;

    /// Functional last-write-wins merge into the metadata map.
    async fn merge_metadata(&self, reference: &str, patch: Value) -> StoreResult<()>;

    /// All refund records for an order, newest first.
    async fn refunds_for_order(&self, order_id: Uuid) -> StoreResult<Vec<Transaction>>;

    async fn insert_refund(&self, refund: NewRefund) -> StoreResult<Transaction>;

    /// Adopt vendor-confirmed data onto an existing refund record.
    async fn update_refund(&self, refund_id: Uuid, data: NewRefund) -> StoreResult<Transaction>;

    /// Add to the parent payment's cumulative refunded total.
    async fn add_refunded_total(&self, reference: &str, delta_minor: i64) -> StoreResult<()>;
}

/// Read-only access to the host order system.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn order_context(&self, order_id: Uuid) -> StoreResult<OrderContext>;

    async fn order_id_by_reference(&self, reference: &str) -> StoreResult<Option<Uuid>>;
}

/// Notified after every success transition so the host order can be
/// marked paid. Must be invoked exactly once per transaction.
#[async_trait]
pub trait OrderStatusSync: Send + Sync {
    async fn sync_statuses(&self, transaction: &Transaction) -> StoreResult<()>;
}

/// The three vendor calls. Mode (sandbox vs production) and store
/// credentials are baked in at construction; no retries happen here.
#[async_trait]
pub trait VendorApi: Send + Sync {
    async fn initialize_transaction(
        &self,
        payload: &SessionPayload,
    ) -> Result<SessionResponse, VendorError>;

    async fn validate_transaction(&self, val_id: &str) -> Result<ValidationRecord, VendorError>;

    async fn initiate_refund(
        &self,
        bank_tran_id: &str,
        refund_trans_id: &str,
        amount_decimal: &str,
        remarks: &str,
        refe_id: Option<&str>,
    ) -> Result<RefundResponse, VendorError>;

    async fn query_refund_status(&self, refund_ref_id: &str) -> Result<RefundResponse, VendorError>;
}
