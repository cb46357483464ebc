//! Builds an outbound checkout session with the vendor.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::Config;
use crate::domain::{MetadataKey, OrderContext, Transaction};
use crate::error::GatewayError;
use crate::ports::{TransactionStore, VendorApi};
use crate::vendor::{to_vendor_decimal, wire::SessionPayload};

/// Currencies the gateway settles.
pub const SUPPORTED_CURRENCIES: &[&str] = &[
    "BDT", "USD", "EUR", "GBP", "AUD", "CAD", "SGD", "MYR", "INR", "JPY", "CNY",
];

/// Merchant home country, used when the billing address has none.
const DEFAULT_COUNTRY: &str = "BD";
const PLACEHOLDER: &str = "Not provided";
const PLACEHOLDER_POSTCODE: &str = "0000";

/// Tells the caller what to do next: send the shopper through a full
/// redirect or hand the checkout URL to the embedded button.
#[derive(Debug, Clone, Serialize)]
pub struct NextAction {
    pub presentation: &'static str,
    pub checkout_url: String,
    pub mode: &'static str,
    pub reference: String,
    pub order_reference: String,
    pub session_key: Option<String>,
    pub logo: Option<String>,
}

#[derive(Clone)]
pub struct PaymentInitiator {
    store: Arc<dyn TransactionStore>,
    vendor: Arc<dyn VendorApi>,
    config: Arc<Config>,
}

impl PaymentInitiator {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        vendor: Arc<dyn VendorApi>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            vendor,
            config,
        }
    }

    pub fn check_currency_support(currency: &str) -> Result<(), GatewayError> {
        if SUPPORTED_CURRENCIES
            .iter()
            .any(|c| currency.eq_ignore_ascii_case(c))
        {
            Ok(())
        } else {
            Err(GatewayError::CurrencyUnsupported(currency.to_uppercase()))
        }
    }

    /// Creates a vendor checkout session for a pending transaction and
    /// persists the returned session key into its metadata.
    pub async fn initiate(
        &self,
        ctx: &OrderContext,
        transaction: &Transaction,
    ) -> Result<NextAction, GatewayError> {
        Self::check_currency_support(&transaction.currency)?;
        self.config
            .gateway
            .require_credentials()
            .map_err(GatewayError::Configuration)?;

        let payload = self.build_payload(ctx, transaction);
        let response = self.vendor.initialize_transaction(&payload).await?;

        if response.is_failed() {
            let reason = response
                .failedreason
                .clone()
                .unwrap_or_else(|| "failed to initialize payment".to_string());
            tracing::error!(
                module = "order",
                reference = %transaction.reference,
                outcome = "initiation_rejected",
                reason = %reason,
                "vendor rejected session initialization"
            );
            return Err(GatewayError::InitiationRejected(reason));
        }

        let checkout_url = response
            .checkout_url()
            .ok_or_else(|| {
                GatewayError::InitiationRejected(
                    "vendor response carried no checkout URL".to_string(),
                )
            })?
            .to_string();

        if let Some(session_key) = &response.session_key {
            let mut patch = Map::new();
            patch.insert(
                MetadataKey::SESSION_KEY.to_string(),
                Value::String(session_key.clone()),
            );
            self.store
                .merge_metadata(&transaction.reference, Value::Object(patch))
                .await?;
        }

        tracing::info!(
            module = "order",
            reference = %transaction.reference,
            outcome = "session_created",
            presentation = self.config.gateway.presentation.as_str(),
            "checkout session created"
        );

        Ok(NextAction {
            presentation: self.config.gateway.presentation.as_str(),
            checkout_url,
            mode: self.config.gateway.mode.as_str(),
            reference: transaction.reference.clone(),
            order_reference: ctx.order.reference.clone(),
            session_key: response.session_key,
            logo: response.store_logo,
        })
    }

    fn build_payload(&self, ctx: &OrderContext, transaction: &Transaction) -> SessionPayload {
        let customer = &ctx.customer;
        let billing = &ctx.billing;

        let non_empty = |value: &Option<String>, fallback: &str| -> String {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(fallback)
                .to_string()
        };

        SessionPayload {
            total_amount: to_vendor_decimal(transaction.total_minor, &transaction.currency),
            currency: transaction.currency.to_uppercase(),
            tran_id: transaction.reference.clone(),
            product_category: ctx.order.product_category(),
            product_profile: "general".to_string(),
            product_name: ctx.order.product_descriptor(),
            cus_name: format!("{} {}", customer.first_name, customer.last_name),
            cus_email: customer.email.clone(),
            cus_phone: non_empty(&customer.phone, PLACEHOLDER),
            cus_add1: non_empty(&billing.address_1, PLACEHOLDER),
            cus_city: non_empty(&billing.city, PLACEHOLDER),
            cus_country: non_empty(&billing.country, DEFAULT_COUNTRY),
            cus_postcode: non_empty(&billing.postcode, PLACEHOLDER_POSTCODE),
            success_url: self.config.success_url(&transaction.reference),
            fail_url: self.config.cancel_url(&transaction.reference),
            cancel_url: self.config.cancel_url(&transaction.reference),
            ipn_url: self.config.webhook_url(),
            shipping_method: "NO".to_string(),
        }
    }
}
