//! Postgres implementation of TransactionStore.
//!
//! The succeed/fail transitions are single UPDATE statements guarded by
//! `status <> 'succeeded'`, so the terminal invariant holds under
//! concurrent webhook deliveries without an explicit row lock.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Transaction, TransactionKind, TransactionStatus};
use crate::ports::{
    CasOutcome, FailureUpdate, NewRefund, StoreError, StoreResult, SuccessUpdate,
    TransactionStore,
};

#[derive(Clone)]
pub struct PostgresTransactionStore {
    pool: PgPool,
}

impl PostgresTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE reference = $1",
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        row.map(TransactionRow::into_domain).transpose()
    }
}

#[async_trait]
impl TransactionStore for PostgresTransactionStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }

    async fn find_by_reference(&self, reference: &str) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE reference = $1 AND kind = 'payment'",
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn find_pending_payment_for_order(
        &self,
        order_id: Uuid,
    ) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT * FROM transactions
            WHERE order_id = $1 AND kind = 'payment' AND status = 'pending'
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        row.map(TransactionRow::into_domain).transpose()
    }

    async fn mark_succeeded(
        &self,
        reference: &str,
        update: SuccessUpdate,
    ) -> StoreResult<CasOutcome> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            UPDATE transactions SET
                status = 'succeeded',
                vendor_charge_id = $2,
                total_minor = $3,
                card_brand = COALESCE($4, card_brand),
                card_last_4 = COALESCE($5, card_last_4),
                metadata = metadata || $6,
                updated_at = now()
            WHERE reference = $1 AND status <> 'succeeded'
            RETURNING *
            "#,
        )
        .bind(reference)
        .bind(&update.vendor_charge_id)
        .bind(update.total_minor)
        .bind(&update.card_brand)
        .bind(&update.card_last_4)
        .bind(&update.metadata_patch)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        match row {
            Some(row) => Ok(CasOutcome::Applied(row.into_domain()?)),
            None => {
                // Either the row is already terminal or it is missing.
                let current = self
                    .fetch_by_reference(reference)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;
                Ok(CasOutcome::AlreadySucceeded(current))
            }
        }
    }

    async fn mark_failed(
        &self,
        reference: &str,
        update: FailureUpdate,
    ) -> StoreResult<CasOutcome> {
        // The CASE reads the pre-update status: failure metadata is
        // written once, repeated failing probes do not churn it.
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            UPDATE transactions SET
                metadata = CASE WHEN status = 'failed' THEN metadata ELSE metadata || $2 END,
                status = 'failed',
                updated_at = now()
            WHERE reference = $1 AND status <> 'succeeded'
            RETURNING *
            "#,
        )
        .bind(reference)
        .bind(&update.metadata_patch)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        match row {
            Some(row) => Ok(CasOutcome::Applied(row.into_domain()?)),
            None => {
                let current = self
                    .fetch_by_reference(reference)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(reference.to_string()))?;
                Ok(CasOutcome::AlreadySucceeded(current))
            }
        }
    }

    async fn merge_metadata(&self, reference: &str, patch: serde_json::Value) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE transactions SET metadata = metadata || $2, updated_at = now() WHERE reference = $1",
        )
        .bind(reference)
        .bind(&patch)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(reference.to_string()));
        }
        Ok(())
    }

    async fn refunds_for_order(&self, order_id: Uuid) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT * FROM transactions
            WHERE order_id = $1 AND kind = 'refund'
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn insert_refund(&self, refund: NewRefund) -> StoreResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            INSERT INTO transactions (
                id, order_id, reference, kind, status, total_minor,
                refunded_total_minor, currency, vendor_charge_id,
                parent_reference, metadata
            ) VALUES ($1, $2, $3, 'refund', 'pending', $4, 0, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(refund.order_id)
        .bind(Uuid::new_v4().to_string())
        .bind(refund.total_minor)
        .bind(&refund.currency)
        .bind(&refund.vendor_charge_id)
        .bind(&refund.parent_reference)
        .bind(&refund.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)?;

        row.into_domain()
    }

    async fn update_refund(&self, refund_id: Uuid, data: NewRefund) -> StoreResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            UPDATE transactions SET
                vendor_charge_id = $2,
                total_minor = $3,
                currency = $4,
                status = 'succeeded',
                metadata = metadata || $5,
                updated_at = now()
            WHERE id = $1 AND kind = 'refund'
            RETURNING *
            "#,
        )
        .bind(refund_id)
        .bind(&data.vendor_charge_id)
        .bind(data.total_minor)
        .bind(&data.currency)
        .bind(&data.metadata)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        row.ok_or_else(|| StoreError::NotFound(refund_id.to_string()))?
            .into_domain()
    }

    async fn add_refunded_total(&self, reference: &str, delta_minor: i64) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transactions SET
                refunded_total_minor = refunded_total_minor + $2,
                updated_at = now()
            WHERE reference = $1
            "#,
        )
        .bind(reference)
        .bind(delta_minor)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(reference.to_string()));
        }
        Ok(())
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    order_id: Uuid,
    reference: String,
    kind: String,
    status: String,
    total_minor: i64,
    refunded_total_minor: i64,
    currency: String,
    vendor_charge_id: Option<String>,
    card_brand: Option<String>,
    card_last_4: Option<String>,
    parent_reference: Option<String>,
    metadata: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> StoreResult<Transaction> {
        let status = TransactionStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Backend(format!("unknown status {:?}", self.status)))?;
        let kind = TransactionKind::parse(&self.kind)
            .ok_or_else(|| StoreError::Backend(format!("unknown kind {:?}", self.kind)))?;

        Ok(Transaction {
            id: self.id,
            order_id: self.order_id,
            reference: self.reference,
            kind,
            status,
            total_minor: self.total_minor,
            refunded_total_minor: self.refunded_total_minor,
            currency: self.currency,
            vendor_charge_id: self.vendor_charge_id,
            card_brand: self.card_brand,
            card_last_4: self.card_last_4,
            parent_reference: self.parent_reference,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
