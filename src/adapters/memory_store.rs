//! In-memory implementations of the store ports, used by the test
//! suite and by local development without a database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{
    merge_metadata, OrderContext, Transaction, TransactionKind, TransactionStatus,
};
use crate::ports::{
    CasOutcome, FailureUpdate, NewRefund, OrderRepository, StoreError, StoreResult,
    SuccessUpdate, TransactionStore,
};

#[derive(Default)]
struct Inner {
    /// Payments keyed by reference.
    payments: HashMap<String, Transaction>,
    /// Refund records in insertion order.
    refunds: Vec<Transaction>,
}

#[derive(Default)]
pub struct InMemoryTransactionStore {
    inner: Mutex<Inner>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a host-created payment record. The payment core itself
    /// never creates the initial transaction.
    pub fn seed_payment(&self, transaction: Transaction) {
        let mut inner = self.inner.lock().expect("store poisoned");
        inner
            .payments
            .insert(transaction.reference.clone(), transaction);
    }

    pub fn payment(&self, reference: &str) -> Option<Transaction> {
        let inner = self.inner.lock().expect("store poisoned");
        inner.payments.get(reference).cloned()
    }

    pub fn refund_count(&self) -> usize {
        let inner = self.inner.lock().expect("store poisoned");
        inner.refunds.len()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>> {
        let inner = self.inner.lock().expect("store poisoned");
        Ok(inner.payments.get(reference).cloned())
    }

    async fn find_pending_payment_for_order(
        &self,
        order_id: Uuid,
    ) -> StoreResult<Option<Transaction>> {
        let inner = self.inner.lock().expect("store poisoned");
        Ok(inner
            .payments
            .values()
            .filter(|t| t.order_id == order_id && t.status == TransactionStatus::Pending)
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn mark_succeeded(
        &self,
        reference: &str,
        update: SuccessUpdate,
    ) -> StoreResult<CasOutcome> {
        let mut inner = self.inner.lock().expect("store poisoned");
        let tx = inner
            .payments
            .get_mut(reference)
            .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;

        if tx.status == TransactionStatus::Succeeded {
            return Ok(CasOutcome::AlreadySucceeded(tx.clone()));
        }

        tx.status = TransactionStatus::Succeeded;
        tx.vendor_charge_id = Some(update.vendor_charge_id);
        tx.total_minor = update.total_minor;
        if update.card_brand.is_some() {
            tx.card_brand = update.card_brand;
        }
        if update.card_last_4.is_some() {
            tx.card_last_4 = update.card_last_4;
        }
        tx.metadata = merge_metadata(&tx.metadata, update.metadata_patch);
        tx.updated_at = Utc::now();
        Ok(CasOutcome::Applied(tx.clone()))
    }

    async fn mark_failed(
        &self,
        reference: &str,
        update: FailureUpdate,
    ) -> StoreResult<CasOutcome> {
        let mut inner = self.inner.lock().expect("store poisoned");
        let tx = inner
            .payments
            .get_mut(reference)
            .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;

        if tx.status == TransactionStatus::Succeeded {
            return Ok(CasOutcome::AlreadySucceeded(tx.clone()));
        }

        // Metadata is merged only on the first transition to failed.
        if tx.status != TransactionStatus::Failed {
            tx.metadata = merge_metadata(&tx.metadata, update.metadata_patch);
        }
        tx.status = TransactionStatus::Failed;
        tx.updated_at = Utc::now();
        Ok(CasOutcome::Applied(tx.clone()))
    }

    async fn merge_metadata(&self, reference: &str, patch: Value) -> StoreResult<()> {
        let mut inner = self.inner.lock().expect("store poisoned");
        let tx = inner
            .payments
            .get_mut(reference)
            .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;
        tx.metadata = merge_metadata(&tx.metadata, patch);
        tx.updated_at = Utc::now();
        Ok(())
    }

    async fn refunds_for_order(&self, order_id: Uuid) -> StoreResult<Vec<Transaction>> {
        let inner = self.inner.lock().expect("store poisoned");
        let mut refunds: Vec<Transaction> = inner
            .refunds
            .iter()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect();
        refunds.reverse(); // newest first
        Ok(refunds)
    }

    async fn insert_refund(&self, refund: NewRefund) -> StoreResult<Transaction> {
        let now = Utc::now();
        let record = Transaction {
            id: Uuid::new_v4(),
            order_id: refund.order_id,
            reference: Uuid::new_v4().to_string(),
            kind: TransactionKind::Refund,
            status: TransactionStatus::Pending,
            total_minor: refund.total_minor,
            refunded_total_minor: 0,
            currency: refund.currency,
            vendor_charge_id: refund.vendor_charge_id,
            card_brand: None,
            card_last_4: None,
            parent_reference: Some(refund.parent_reference),
            metadata: refund.metadata,
            created_at: now,
            updated_at: now,
        };
        let mut inner = self.inner.lock().expect("store poisoned");
        inner.refunds.push(record.clone());
        Ok(record)
    }

    async fn update_refund(&self, refund_id: Uuid, data: NewRefund) -> StoreResult<Transaction> {
        let mut inner = self.inner.lock().expect("store poisoned");
        let record = inner
            .refunds
            .iter_mut()
            .find(|r| r.id == refund_id)
            .ok_or_else(|| StoreError::NotFound(refund_id.to_string()))?;
        record.vendor_charge_id = data.vendor_charge_id;
        record.total_minor = data.total_minor;
        record.currency = data.currency;
        record.status = TransactionStatus::Succeeded;
        record.metadata = merge_metadata(&record.metadata, data.metadata);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn add_refunded_total(&self, reference: &str, delta_minor: i64) -> StoreResult<()> {
        let mut inner = self.inner.lock().expect("store poisoned");
        let tx = inner
            .payments
            .get_mut(reference)
            .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;
        tx.refunded_total_minor += delta_minor;
        tx.updated_at = Utc::now();
        Ok(())
    }
}

/// Fixed order contexts keyed by order id.
#[derive(Default)]
pub struct StaticOrderRepository {
    contexts: Mutex<HashMap<Uuid, OrderContext>>,
}

impl StaticOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, ctx: OrderContext) {
        let mut contexts = self.contexts.lock().expect("orders poisoned");
        contexts.insert(ctx.order.id, ctx);
    }
}

#[async_trait]
impl OrderRepository for StaticOrderRepository {
    async fn order_context(&self, order_id: Uuid) -> StoreResult<OrderContext> {
        let contexts = self.contexts.lock().expect("orders poisoned");
        contexts
            .get(&order_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(order_id.to_string()))
    }

    async fn order_id_by_reference(&self, reference: &str) -> StoreResult<Option<Uuid>> {
        let contexts = self.contexts.lock().expect("orders poisoned");
        Ok(contexts
            .values()
            .find(|ctx| ctx.order.reference == reference)
            .map(|ctx| ctx.order.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn seeded_store() -> (InMemoryTransactionStore, Transaction) {
        let store = InMemoryTransactionStore::new();
        let tx = Transaction::new_payment(Uuid::new_v4(), 10_000, "BDT");
        store.seed_payment(tx.clone());
        (store, tx)
    }

    fn success_update() -> SuccessUpdate {
        SuccessUpdate {
            vendor_charge_id: "VAL-1".to_string(),
            total_minor: 10_000,
            card_brand: Some("VISA".to_string()),
            card_last_4: Some("1234".to_string()),
            metadata_patch: Value::Object(Map::new()),
        }
    }

    #[tokio::test]
    async fn test_mark_succeeded_is_cas_guarded() {
        let (store, tx) = seeded_store();
        let first = store
            .mark_succeeded(&tx.reference, success_update())
            .await
            .unwrap();
        assert!(matches!(first, CasOutcome::Applied(_)));

        let second = store
            .mark_succeeded(&tx.reference, success_update())
            .await
            .unwrap();
        assert!(matches!(second, CasOutcome::AlreadySucceeded(_)));
    }

    #[tokio::test]
    async fn test_mark_failed_never_regresses_success() {
        let (store, tx) = seeded_store();
        store
            .mark_succeeded(&tx.reference, success_update())
            .await
            .unwrap();

        let outcome = store
            .mark_failed(
                &tx.reference,
                FailureUpdate {
                    metadata_patch: Value::Object(Map::new()),
                },
            )
            .await
            .unwrap();
        assert!(matches!(outcome, CasOutcome::AlreadySucceeded(_)));
        assert_eq!(
            store.payment(&tx.reference).unwrap().status,
            TransactionStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_repeated_failure_keeps_first_metadata() {
        let (store, tx) = seeded_store();
        let patch = |reason: &str| {
            let mut map = Map::new();
            map.insert("failure_reason".to_string(), Value::String(reason.into()));
            FailureUpdate {
                metadata_patch: Value::Object(map),
            }
        };

        store.mark_failed(&tx.reference, patch("FAILED")).await.unwrap();
        store.mark_failed(&tx.reference, patch("EXPIRED")).await.unwrap();

        let stored = store.payment(&tx.reference).unwrap();
        assert_eq!(stored.metadata_str("failure_reason"), Some("FAILED"));
    }

    #[tokio::test]
    async fn test_refunds_listed_newest_first() {
        let (store, tx) = seeded_store();
        for amount in [100, 200, 300] {
            store
                .insert_refund(NewRefund {
                    order_id: tx.order_id,
                    parent_reference: tx.reference.clone(),
                    vendor_charge_id: None,
                    total_minor: amount,
                    currency: "BDT".to_string(),
                    metadata: Value::Object(Map::new()),
                })
                .await
                .unwrap();
        }
        let refunds = store.refunds_for_order(tx.order_id).await.unwrap();
        let amounts: Vec<i64> = refunds.iter().map(|r| r.total_minor).collect();
        assert_eq!(amounts, vec![300, 200, 100]);
    }
}
