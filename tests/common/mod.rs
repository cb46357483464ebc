//! Shared test doubles: a scripted vendor and a counting order sync.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use hostedpay::config::{Config, GatewayMode, GatewaySettings, Presentation};
use hostedpay::adapters::{InMemoryTransactionStore, StaticOrderRepository};
use hostedpay::domain::{Transaction, TransactionStatus};
use hostedpay::ports::{OrderStatusSync, StoreResult, VendorApi};
use hostedpay::vendor::wire::{
    RefundResponse, SessionPayload, SessionResponse, ValidationRecord,
};
use hostedpay::vendor::VendorError;
use hostedpay::AppState;

/// What the stub answers to a validation call.
#[derive(Clone)]
pub enum ValidationScript {
    Record(ValidationRecord),
    Unavailable,
}

/// Scripted vendor. Every answer is set up-front; call counts are
/// recorded for assertions.
pub struct StubVendor {
    pub validation: Mutex<ValidationScript>,
    pub validate_calls: AtomicUsize,
    pub session: Mutex<Option<SessionResponse>>,
    pub refund: Mutex<Option<RefundResponse>>,
    pub query: Mutex<Option<RefundResponse>>,
}

impl StubVendor {
    pub fn new() -> Self {
        Self {
            validation: Mutex::new(ValidationScript::Unavailable),
            validate_calls: AtomicUsize::new(0),
            session: Mutex::new(None),
            refund: Mutex::new(None),
            query: Mutex::new(None),
        }
    }

    pub fn script_validation(&self, record: ValidationRecord) {
        *self.validation.lock().unwrap() = ValidationScript::Record(record);
    }

    pub fn script_session(&self, response: SessionResponse) {
        *self.session.lock().unwrap() = Some(response);
    }

    pub fn script_validation_down(&self) {
        *self.validation.lock().unwrap() = ValidationScript::Unavailable;
    }

    pub fn script_refund(&self, response: RefundResponse) {
        *self.refund.lock().unwrap() = Some(response);
    }

    pub fn script_query(&self, response: RefundResponse) {
        *self.query.lock().unwrap() = Some(response);
    }

    pub fn validate_call_count(&self) -> usize {
        self.validate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VendorApi for StubVendor {
    async fn initialize_transaction(
        &self,
        _payload: &SessionPayload,
    ) -> Result<SessionResponse, VendorError> {
        self.session.lock().unwrap().clone().ok_or(VendorError::Protocol {
            status: 503,
            body: "session endpoint not scripted".to_string(),
        })
    }

    async fn validate_transaction(&self, _val_id: &str) -> Result<ValidationRecord, VendorError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        match self.validation.lock().unwrap().clone() {
            ValidationScript::Record(record) => Ok(record),
            ValidationScript::Unavailable => Err(VendorError::Protocol {
                status: 503,
                body: "validator down".to_string(),
            }),
        }
    }

    async fn initiate_refund(
        &self,
        _bank_tran_id: &str,
        _refund_trans_id: &str,
        _amount_decimal: &str,
        _remarks: &str,
        _refe_id: Option<&str>,
    ) -> Result<RefundResponse, VendorError> {
        self.refund.lock().unwrap().clone().ok_or(VendorError::Protocol {
            status: 503,
            body: "refund endpoint not scripted".to_string(),
        })
    }

    async fn query_refund_status(
        &self,
        _refund_ref_id: &str,
    ) -> Result<RefundResponse, VendorError> {
        self.query.lock().unwrap().clone().ok_or(VendorError::Protocol {
            status: 503,
            body: "refund query not scripted".to_string(),
        })
    }
}

/// Counts how many times the host order was told about a settled
/// transaction. The invariant under test is "exactly once".
#[derive(Default)]
pub struct RecordingSync {
    calls: AtomicUsize,
}

impl RecordingSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderStatusSync for RecordingSync {
    async fn sync_statuses(&self, _transaction: &Transaction) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn test_config() -> Config {
    Config {
        server_port: 3000,
        database_url: "postgres://localhost/ignored".to_string(),
        public_base_url: "https://shop.example".to_string(),
        gateway: GatewaySettings {
            mode: GatewayMode::Test,
            store_id: "store-1".to_string(),
            store_secret: "secret".to_string(),
            base_url: "https://sandbox.gateway.example".to_string(),
            presentation: Presentation::Hosted,
        },
    }
}

/// A pending BDT payment over 10000 minor units (100.00).
pub fn seeded_payment(store: &InMemoryTransactionStore) -> Transaction {
    let tx = Transaction::new_payment(Uuid::new_v4(), 10_000, "BDT");
    store.seed_payment(tx.clone());
    tx
}

/// A succeeded payment carrying the cached vendor validation record,
/// as left behind by a completed reconciliation.
pub fn seeded_charged_payment(store: &InMemoryTransactionStore) -> Transaction {
    let mut tx = Transaction::new_payment(Uuid::new_v4(), 10_000, "BDT");
    tx.status = TransactionStatus::Succeeded;
    tx.vendor_charge_id = Some("VAL-1".to_string());
    tx.metadata = json!({
        "vendor_response": { "bank_tran_id": "BANK-9" },
    });
    store.seed_payment(tx.clone());
    tx
}

pub fn valid_record(reference: &str, amount: &str) -> ValidationRecord {
    record_with_status(reference, amount, "VALID")
}

pub fn record_with_status(reference: &str, amount: &str, status: &str) -> ValidationRecord {
    serde_json::from_value(json!({
        "status": status,
        "tran_id": reference,
        "val_id": "VAL-1",
        "currency_amount": amount,
        "currency_type": "BDT",
        "bank_tran_id": "BANK-9",
        "card_brand": "VISA",
        "card_no": "432111******1234",
    }))
    .unwrap()
}

pub struct TestApp {
    pub store: Arc<InMemoryTransactionStore>,
    pub orders: Arc<StaticOrderRepository>,
    pub vendor: Arc<StubVendor>,
    pub sync: Arc<RecordingSync>,
    pub state: AppState,
}

pub fn build_app() -> TestApp {
    let store = Arc::new(InMemoryTransactionStore::new());
    let orders = Arc::new(StaticOrderRepository::new());
    let vendor = Arc::new(StubVendor::new());
    let sync = Arc::new(RecordingSync::new());
    let state = AppState::new(
        store.clone(),
        orders.clone(),
        sync.clone(),
        vendor.clone(),
        Arc::new(test_config()),
    );
    TestApp {
        store,
        orders,
        vendor,
        sync,
        state,
    }
}
