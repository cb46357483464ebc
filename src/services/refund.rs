//! Refund issuance and webhook-safe refund record bookkeeping.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::{MetadataKey, Transaction};
use crate::error::GatewayError;
use crate::ports::{NewRefund, TransactionStore, VendorApi};
use crate::services::locks::KeyedLocks;
use crate::vendor::{to_vendor_decimal, wire::RefundResponse};

/// The vendor caps refund remarks at this length.
const REMARKS_LIMIT: usize = 255;

/// Vendor-confirmed refund data arriving from a webhook delivery or a
/// refund status query, to be reconciled with local refund records.
#[derive(Debug, Clone)]
pub struct RefundData {
    pub order_id: Uuid,
    pub parent_reference: String,
    /// The vendor-side refund identifier, when confirmed.
    pub vendor_charge_id: Option<String>,
    pub total_minor: i64,
    pub currency: String,
    pub metadata: Value,
}

#[derive(Clone)]
pub struct RefundCoordinator {
    store: Arc<dyn TransactionStore>,
    vendor: Arc<dyn VendorApi>,
    locks: KeyedLocks,
}

impl RefundCoordinator {
    pub fn new(store: Arc<dyn TransactionStore>, vendor: Arc<dyn VendorApi>) -> Self {
        Self {
            store,
            vendor,
            locks: KeyedLocks::new(),
        }
    }

    /// Issues a refund with the vendor and records a local placeholder
    /// refund awaiting vendor confirmation. Returns the vendor's refund
    /// reference id.
    pub async fn refund(
        &self,
        transaction: &Transaction,
        amount_minor: i64,
        reason: &str,
        refe_id: Option<&str>,
    ) -> Result<String, GatewayError> {
        let charge_id = transaction
            .vendor_charge_id
            .as_deref()
            .ok_or_else(|| GatewayError::NotCharged(transaction.reference.clone()))?;

        let bank_tran_id = self.resolve_bank_transaction(transaction, charge_id).await?;

        // Correlates with the transaction while staying unique per attempt.
        let refund_trans_id = format!(
            "rf-{}-{}",
            transaction.id.simple(),
            Utc::now().timestamp_millis()
        );

        let amount_decimal = to_vendor_decimal(amount_minor, &transaction.currency);
        let remarks = normalize_remarks(reason, &transaction.reference);

        let response = self
            .vendor
            .initiate_refund(&bank_tran_id, &refund_trans_id, &amount_decimal, &remarks, refe_id)
            .await?;

        let refund_ref_id = interpret_refund_response(&response)?;

        let mut metadata = Map::new();
        metadata.insert(
            MetadataKey::VENDOR_REFUND_ID.to_string(),
            Value::String(refund_ref_id.clone()),
        );
        metadata.insert("refund_remarks".to_string(), Value::String(remarks));

        self.store
            .insert_refund(NewRefund {
                order_id: transaction.order_id,
                parent_reference: transaction.reference.clone(),
                vendor_charge_id: None,
                total_minor: amount_minor,
                currency: transaction.currency.clone(),
                metadata: Value::Object(metadata),
            })
            .await?;

        tracing::info!(
            module = "order",
            reference = %transaction.reference,
            refund_ref_id = %refund_ref_id,
            amount_minor,
            outcome = "refund_initiated",
            "refund accepted by vendor"
        );

        Ok(refund_ref_id)
    }

    /// Queries the vendor for a refund's fate and, when it is settled,
    /// promotes the matching local refund record.
    pub async fn sync_refund_status(
        &self,
        parent: &Transaction,
        refund_ref_id: &str,
    ) -> Result<RefundResponse, GatewayError> {
        let response = self.vendor.query_refund_status(refund_ref_id).await?;

        if !response.connected() {
            let reason = response
                .error_reason
                .clone()
                .unwrap_or_else(|| "vendor refused the refund status query".to_string());
            return Err(GatewayError::RefundRejected(reason));
        }

        if matches!(response.status.as_deref(), Some("success") | Some("refunded")) {
            let local = self
                .store
                .refunds_for_order(parent.order_id)
                .await?
                .into_iter()
                .find(|r| r.metadata_str(MetadataKey::VENDOR_REFUND_ID) == Some(refund_ref_id));

            if let Some(local) = local {
                let mut metadata = Map::new();
                metadata.insert(
                    MetadataKey::VENDOR_REFUND_ID.to_string(),
                    Value::String(refund_ref_id.to_string()),
                );
                self.create_or_update_refund(
                    RefundData {
                        order_id: parent.order_id,
                        parent_reference: parent.reference.clone(),
                        vendor_charge_id: Some(refund_ref_id.to_string()),
                        total_minor: local.total_minor,
                        currency: local.currency.clone(),
                        metadata: Value::Object(metadata),
                    },
                    parent,
                )
                .await?;
            }
        }

        Ok(response)
    }

    /// Creates or updates a refund record without ever duplicating one
    /// across repeated webhook deliveries. Serialized per order.
    ///
    /// Match rules, applied over the order's refunds newest first:
    /// 1. same vendor refund id: update the amount if it changed,
    ///    otherwise leave untouched;
    /// 2. a local placeholder (no vendor id yet) with the same amount
    ///    whose cached vendor refund id matches: adopt the vendor data;
    /// 3. no match: create a new record.
    /// The parent's cumulative refunded total grows on create/adopt.
    pub async fn create_or_update_refund(
        &self,
        data: RefundData,
        parent: &Transaction,
    ) -> Result<Transaction, GatewayError> {
        let _guard = self.locks.acquire(&data.order_id.to_string()).await;

        let existing = self.store.refunds_for_order(data.order_id).await?;

        if existing.is_empty() {
            return self.create_refund(data, parent).await;
        }

        let incoming_vendor_id = data.vendor_charge_id.clone().unwrap_or_default();
        let mut local_match: Option<&Transaction> = None;

        for refund in &existing {
            if data.vendor_charge_id.is_some()
                && refund.vendor_charge_id == data.vendor_charge_id
            {
                if refund.total_minor != data.total_minor {
                    let updated = self.store.update_refund(refund.id, to_new_refund(&data)).await?;
                    tracing::info!(
                        module = "order",
                        reference = %parent.reference,
                        refund_id = %refund.id,
                        outcome = "refund_amount_updated",
                        "existing refund amount corrected from vendor data"
                    );
                    return Ok(updated);
                }
                // Duplicate delivery of a refund we already hold.
                return Ok(refund.clone());
            }

            if refund.vendor_charge_id.is_none() && local_match.is_none() {
                let cached = refund
                    .metadata_str(MetadataKey::VENDOR_REFUND_ID)
                    .unwrap_or_default();
                if refund.total_minor == data.total_minor && cached == incoming_vendor_id {
                    local_match = Some(refund);
                }
            }
        }

        if let Some(local) = local_match {
            let updated = self.store.update_refund(local.id, to_new_refund(&data)).await?;
            self.store
                .add_refunded_total(&parent.reference, updated.total_minor)
                .await?;
            tracing::info!(
                module = "order",
                reference = %parent.reference,
                refund_id = %local.id,
                outcome = "refund_confirmed",
                "local refund promoted with vendor data"
            );
            return Ok(updated);
        }

        self.create_refund(data, parent).await
    }

    async fn create_refund(
        &self,
        data: RefundData,
        parent: &Transaction,
    ) -> Result<Transaction, GatewayError> {
        let created = self.store.insert_refund(to_new_refund(&data)).await?;
        self.store
            .add_refunded_total(&parent.reference, created.total_minor)
            .await?;
        tracing::info!(
            module = "order",
            reference = %parent.reference,
            refund_id = %created.id,
            total_minor = created.total_minor,
            outcome = "refund_created",
            "refund record created"
        );
        Ok(created)
    }

    async fn resolve_bank_transaction(
        &self,
        transaction: &Transaction,
        charge_id: &str,
    ) -> Result<String, GatewayError> {
        // The original validation record is cached in metadata; fall
        // back to re-validating when it is not.
        if let Some(cached) = transaction
            .metadata
            .get(MetadataKey::VENDOR_RESPONSE)
            .and_then(|r| r.get("bank_tran_id"))
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
        {
            return Ok(cached.to_string());
        }

        let record = self.vendor.validate_transaction(charge_id).await?;
        record
            .bank_tran_id
            .filter(|v| !v.is_empty())
            .ok_or_else(|| GatewayError::MissingBankTransaction(transaction.reference.clone()))
    }
}

fn to_new_refund(data: &RefundData) -> NewRefund {
    NewRefund {
        order_id: data.order_id,
        parent_reference: data.parent_reference.clone(),
        vendor_charge_id: data.vendor_charge_id.clone(),
        total_minor: data.total_minor,
        currency: data.currency.clone(),
        metadata: data.metadata.clone(),
    }
}

fn normalize_remarks(reason: &str, reference: &str) -> String {
    let trimmed = reason.trim();
    let remarks = if trimmed.is_empty() {
        format!("Refund for transaction {reference}")
    } else {
        trimmed.to_string()
    };
    remarks.chars().take(REMARKS_LIMIT).collect()
}

fn interpret_refund_response(response: &RefundResponse) -> Result<String, GatewayError> {
    if !response.connected() {
        let reason = response
            .error_reason
            .clone()
            .unwrap_or_else(|| "vendor connection was not established".to_string());
        return Err(GatewayError::RefundRejected(reason));
    }

    match (response.status.as_deref(), response.refund_ref_id.as_deref()) {
        // `processing` is success-in-flight; the reference id is valid.
        (Some("success"), Some(ref_id)) | (Some("processing"), Some(ref_id)) => {
            Ok(ref_id.to_string())
        }
        _ => {
            let reason = response
                .error_reason
                .clone()
                .or_else(|| response.status.clone())
                .unwrap_or_else(|| "refund was not accepted".to_string());
            Err(GatewayError::RefundRejected(reason))
        }
    }
}
