//! Postgres adapters for the host order system: a read-only context
//! loader and the post-success status sync.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    BillingAddress, Customer, Order, OrderContext, OrderItem, Transaction, TransactionStatus,
};
use crate::ports::{OrderRepository, OrderStatusSync, StoreError, StoreResult};

#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    reference: String,
    customer_first_name: String,
    customer_last_name: String,
    customer_email: String,
    customer_phone: Option<String>,
    billing_address_1: Option<String>,
    billing_city: Option<String>,
    billing_country: Option<String>,
    billing_postcode: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    title: String,
    category: Option<String>,
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn order_context(&self, order_id: Uuid) -> StoreResult<OrderContext> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?
            .ok_or_else(|| StoreError::NotFound(order_id.to_string()))?;

        let items = sqlx::query_as::<_, OrderItemRow>(
            "SELECT title, category FROM order_items WHERE order_id = $1 ORDER BY position",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(OrderContext {
            order: Order {
                id: row.id,
                reference: row.reference,
                items: items
                    .into_iter()
                    .map(|i| OrderItem {
                        title: i.title,
                        category: i.category,
                    })
                    .collect(),
            },
            customer: Customer {
                first_name: row.customer_first_name,
                last_name: row.customer_last_name,
                email: row.customer_email,
                phone: row.customer_phone,
            },
            billing: BillingAddress {
                address_1: row.billing_address_1,
                city: row.billing_city,
                country: row.billing_country,
                postcode: row.billing_postcode,
            },
        })
    }

    async fn order_id_by_reference(&self, reference: &str) -> StoreResult<Option<Uuid>> {
        let id = sqlx::query_scalar::<_, Uuid>("SELECT id FROM orders WHERE reference = $1")
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(id)
    }
}

/// Marks the host order paid (or failed) after a transaction settles.
#[derive(Clone)]
pub struct PostgresOrderStatusSync {
    pool: PgPool,
}

impl PostgresOrderStatusSync {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStatusSync for PostgresOrderStatusSync {
    async fn sync_statuses(&self, transaction: &Transaction) -> StoreResult<()> {
        let payment_status = match transaction.status {
            TransactionStatus::Succeeded => "paid",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Pending => return Ok(()),
        };

        sqlx::query(
            "UPDATE orders SET payment_status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(transaction.order_id)
        .bind(payment_status)
        .execute(&self.pool)
        .await
        .map_err(StoreError::from)?;

        tracing::debug!(
            module = "order",
            order_id = %transaction.order_id,
            payment_status,
            "order status synchronized"
        );
        Ok(())
    }
}
