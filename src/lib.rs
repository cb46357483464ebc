pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod ports;
pub mod services;
pub mod startup;
pub mod vendor;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::config::Config;
use crate::ports::{OrderRepository, OrderStatusSync, TransactionStore, VendorApi};
use crate::services::{PaymentInitiator, ReconciliationEngine, RefundCoordinator};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TransactionStore>,
    pub orders: Arc<dyn OrderRepository>,
    pub engine: ReconciliationEngine,
    pub initiator: PaymentInitiator,
    pub refunds: RefundCoordinator,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        orders: Arc<dyn OrderRepository>,
        sync: Arc<dyn OrderStatusSync>,
        vendor: Arc<dyn VendorApi>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            engine: ReconciliationEngine::new(store.clone(), vendor.clone(), sync),
            initiator: PaymentInitiator::new(store.clone(), vendor.clone(), config.clone()),
            refunds: RefundCoordinator::new(store.clone(), vendor),
            store,
            orders,
            config,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/webhooks/gateway", post(handlers::webhook::receive_notification))
        .route(
            "/payments/return",
            get(handlers::checkout::payment_return).post(handlers::checkout::payment_return_post),
        )
        .route(
            "/payments/cancelled",
            get(handlers::checkout::payment_return).post(handlers::checkout::payment_return_post),
        )
        .route("/checkout/session", post(handlers::checkout::create_session))
        .route(
            "/transactions/:reference",
            get(handlers::transactions::get_transaction),
        )
        .route(
            "/transactions/:reference/confirm",
            post(handlers::transactions::confirm_transaction),
        )
        .route(
            "/transactions/:reference/refunds",
            post(handlers::transactions::create_refund),
        )
        .route(
            "/transactions/:reference/refunds/:refund_ref_id",
            get(handlers::transactions::get_refund_status),
        )
        .with_state(state)
}
