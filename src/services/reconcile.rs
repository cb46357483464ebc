//! The payment confirmation reconciliation engine.
//!
//! Three entry points (browser return redirect, the vendor's async
//! notification, and manual confirmation) converge on one core
//! `reconcile` that re-validates against the vendor, applies the
//! security checks, and performs the idempotent state transition.
//! Redirect parameters and notification bodies are hints only; the
//! vendor's validation record is the single source of truth.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::domain::{MetadataKey, Transaction, TransactionStatus};
use crate::error::GatewayError;
use crate::ports::{CasOutcome, FailureUpdate, OrderStatusSync, SuccessUpdate, TransactionStore, VendorApi};
use crate::services::locks::KeyedLocks;
use crate::vendor::{map_vendor_status, to_minor_units, Outcome};

/// Result of a reconciliation pass that reached a decision.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// This call won the transition to `succeeded`.
    Confirmed(Box<Transaction>),
    /// The transaction was already terminal; nothing was re-applied.
    AlreadyProcessed,
    /// The validation record mapped to failure.
    MarkedFailed { reason: String },
}

/// Best-effort outcome of the return-redirect hook. Never an error:
/// the page render must not be blocked on reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOutcome {
    Confirmed,
    AlreadyProcessed,
    /// Hint was not a success, a field was missing, or the transaction
    /// is unknown; nothing was attempted.
    Skipped,
    /// Reconciliation was attempted but did not confirm the payment.
    Unverified,
}

/// How an async vendor notification was handled. The HTTP layer maps
/// this onto status codes.
#[derive(Debug)]
pub enum NotificationDisposition {
    /// Empty or field-less body: the vendor probing the endpoint.
    Probe,
    Malformed(String),
    /// No local transaction for the echoed reference. Acknowledged as
    /// processed so the endpoint does not act as an existence oracle.
    UnknownReference(String),
    Completed(ReconcileOutcome),
    /// Reference or amount mismatch; final rejection.
    SecurityRejected(GatewayError),
    /// The validation call failed; no state was changed and the vendor
    /// is free to redeliver.
    VerificationUnavailable(String),
    Failed(GatewayError),
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn TransactionStore>,
    vendor: Arc<dyn VendorApi>,
    sync: Arc<dyn OrderStatusSync>,
    locks: KeyedLocks,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        vendor: Arc<dyn VendorApi>,
        sync: Arc<dyn OrderStatusSync>,
    ) -> Self {
        Self {
            store,
            vendor,
            sync,
            locks: KeyedLocks::new(),
        }
    }

    /// Browser landed back on the store. Only a success hint with a
    /// validation id triggers a verification; the hint itself is never
    /// trusted. All failures are swallowed after logging.
    pub async fn return_redirect(
        &self,
        reference: &str,
        status_hint: &str,
        val_id: Option<&str>,
    ) -> RedirectOutcome {
        let val_id = match val_id {
            Some(v) if !v.is_empty() => v,
            _ => {
                tracing::info!(
                    module = "order",
                    reference,
                    status_hint,
                    outcome = "skipped",
                    "return redirect without validation id"
                );
                return RedirectOutcome::Skipped;
            }
        };

        if map_vendor_status(status_hint) != Outcome::Succeeded {
            tracing::info!(
                module = "order",
                reference,
                status_hint,
                outcome = "skipped",
                "return redirect hint is not a success"
            );
            return RedirectOutcome::Skipped;
        }

        let transaction = match self.store.find_by_reference(reference).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                tracing::warn!(
                    module = "order",
                    reference,
                    outcome = "skipped",
                    "return redirect for unknown transaction"
                );
                return RedirectOutcome::Skipped;
            }
            Err(err) => {
                tracing::error!(module = "order", reference, error = %err, "store lookup failed on return redirect");
                return RedirectOutcome::Unverified;
            }
        };

        if transaction.status == TransactionStatus::Succeeded {
            return RedirectOutcome::AlreadyProcessed;
        }

        match self.reconcile(&transaction, val_id, None).await {
            Ok(ReconcileOutcome::Confirmed(_)) => RedirectOutcome::Confirmed,
            Ok(ReconcileOutcome::AlreadyProcessed) => RedirectOutcome::AlreadyProcessed,
            Ok(ReconcileOutcome::MarkedFailed { .. }) => RedirectOutcome::Unverified,
            Err(err) => {
                tracing::warn!(module = "order", reference, error = %err, "opportunistic confirmation on return failed");
                RedirectOutcome::Unverified
            }
        }
    }

    /// Server-to-server callback from the vendor, delivered
    /// at-least-once and possibly concurrently.
    pub async fn handle_notification(&self, payload: &Value) -> NotificationDisposition {
        let val_id = string_field(payload, "val_id");
        let reference = string_field(payload, "tran_id");
        let status_hint = string_field(payload, "status");

        if val_id.is_none() && reference.is_none() && status_hint.is_none() {
            tracing::info!(
                module = "order",
                outcome = "probe",
                "notification endpoint probe acknowledged"
            );
            return NotificationDisposition::Probe;
        }

        let (val_id, reference, status_hint) = match (val_id, reference, status_hint) {
            (Some(v), Some(r), Some(s)) => (v, r, s),
            _ => {
                tracing::error!(
                    module = "order",
                    outcome = "malformed",
                    "notification missing one of val_id, tran_id, status"
                );
                return NotificationDisposition::Malformed(
                    "val_id, tran_id and status are required".to_string(),
                );
            }
        };

        let transaction = match self.store.find_by_reference(&reference).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                tracing::warn!(
                    module = "order",
                    reference = %reference,
                    val_id = %val_id,
                    status_hint = %status_hint,
                    outcome = "unknown_reference",
                    "notification for unknown transaction acknowledged"
                );
                return NotificationDisposition::UnknownReference(reference);
            }
            Err(err) => return NotificationDisposition::Failed(err.into()),
        };

        match self.reconcile(&transaction, &val_id, Some(payload)).await {
            Ok(outcome) => NotificationDisposition::Completed(outcome),
            Err(err) if err.is_security_mismatch() => {
                NotificationDisposition::SecurityRejected(err)
            }
            Err(GatewayError::Vendor(vendor_err)) => {
                NotificationDisposition::VerificationUnavailable(vendor_err.to_string())
            }
            Err(err) => NotificationDisposition::Failed(err),
        }
    }

    /// Operator-facing or automated recheck of a single transaction.
    pub async fn manual_confirm(
        &self,
        reference: &str,
        val_id: &str,
    ) -> Result<ReconcileOutcome, GatewayError> {
        let transaction = self
            .store
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| GatewayError::TransactionNotFound(reference.to_string()))?;
        self.reconcile(&transaction, val_id, None).await
    }

    /// The core decision procedure. Validates against the vendor,
    /// enforces the reference and amount checks, and performs the
    /// compare-and-set transition. Serialized per reference.
    pub async fn reconcile(
        &self,
        transaction: &Transaction,
        val_id: &str,
        raw_notification: Option<&Value>,
    ) -> Result<ReconcileOutcome, GatewayError> {
        let _guard = self.locks.acquire(&transaction.reference).await;
        let reference = transaction.reference.as_str();

        let record = match self.vendor.validate_transaction(val_id).await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(
                    module = "order",
                    reference,
                    val_id,
                    error = %err,
                    outcome = "verification_unavailable",
                    "vendor validation call failed; no state change"
                );
                return Err(err.into());
            }
        };

        if record.tran_id != reference {
            tracing::error!(
                module = "order",
                reference,
                echoed = %record.tran_id,
                val_id,
                outcome = "reference_mismatch",
                "validation record echoes a different reference"
            );
            return Err(GatewayError::ReferenceMismatch {
                reference: reference.to_string(),
                echoed: record.tran_id,
            });
        }

        let validated_minor = to_minor_units(&record.currency_amount, &record.currency_type)?;
        // One minor unit of tolerance for vendor-side rounding.
        if (transaction.total_minor - validated_minor).abs() > 1 {
            tracing::error!(
                module = "order",
                reference,
                local_minor = transaction.total_minor,
                validated_minor,
                outcome = "amount_mismatch",
                "validated amount differs from local amount"
            );
            return Err(GatewayError::AmountMismatch {
                reference: reference.to_string(),
                local_minor: transaction.total_minor,
                validated_minor,
            });
        }

        match map_vendor_status(&record.status) {
            Outcome::Succeeded => {
                if transaction.status == TransactionStatus::Succeeded {
                    tracing::info!(
                        module = "order",
                        reference,
                        outcome = "already_processed",
                        "success re-delivered for terminal transaction"
                    );
                    return Ok(ReconcileOutcome::AlreadyProcessed);
                }

                let mut patch = Map::new();
                patch.insert(
                    MetadataKey::VENDOR_RESPONSE.to_string(),
                    serde_json::to_value(&record).unwrap_or(Value::Null),
                );
                if let Some(raw) = raw_notification {
                    patch.insert(MetadataKey::RAW_NOTIFICATION.to_string(), raw.clone());
                }

                let update = SuccessUpdate {
                    vendor_charge_id: record.val_id.clone(),
                    total_minor: validated_minor,
                    card_brand: record.card_brand.clone(),
                    card_last_4: record.card_last_4(),
                    metadata_patch: Value::Object(patch),
                };

                match self.store.mark_succeeded(reference, update).await? {
                    CasOutcome::Applied(updated) => {
                        tracing::info!(
                            module = "order",
                            reference,
                            val_id = %record.val_id,
                            outcome = "confirmed",
                            "payment confirmed by vendor validation"
                        );
                        if let Err(err) = self.sync.sync_statuses(&updated).await {
                            // The transition is committed; losing the
                            // sync is logged, not unwound.
                            tracing::error!(module = "order", reference, error = %err, "order status sync failed");
                        }
                        Ok(ReconcileOutcome::Confirmed(Box::new(updated)))
                    }
                    CasOutcome::AlreadySucceeded(_) => {
                        tracing::info!(
                            module = "order",
                            reference,
                            outcome = "already_processed",
                            "lost the confirmation race; acknowledging"
                        );
                        Ok(ReconcileOutcome::AlreadyProcessed)
                    }
                }
            }
            Outcome::Failed => {
                if transaction.status == TransactionStatus::Succeeded {
                    tracing::info!(
                        module = "order",
                        reference,
                        vendor_status = %record.status,
                        outcome = "ignored",
                        "failure signal after success; terminal state kept"
                    );
                    return Ok(ReconcileOutcome::AlreadyProcessed);
                }

                let reason = if record.status.is_empty() {
                    raw_notification
                        .and_then(|raw| string_field(raw, "status"))
                        .unwrap_or_else(|| "UNKNOWN".to_string())
                } else {
                    record.status.clone()
                };

                let mut patch = Map::new();
                patch.insert(
                    MetadataKey::VENDOR_RESPONSE.to_string(),
                    serde_json::to_value(&record).unwrap_or(Value::Null),
                );
                patch.insert(
                    MetadataKey::FAILURE_REASON.to_string(),
                    Value::String(reason.clone()),
                );
                if let Some(raw) = raw_notification {
                    patch.insert(MetadataKey::RAW_NOTIFICATION.to_string(), raw.clone());
                }

                // The snapshot was read before the lock; the store's
                // guard has the final word on whether failure lands.
                match self
                    .store
                    .mark_failed(
                        reference,
                        FailureUpdate {
                            metadata_patch: Value::Object(patch),
                        },
                    )
                    .await?
                {
                    CasOutcome::Applied(_) => {
                        tracing::info!(
                            module = "order",
                            reference,
                            vendor_status = %record.status,
                            outcome = "failed",
                            "payment marked failed"
                        );
                        Ok(ReconcileOutcome::MarkedFailed { reason })
                    }
                    CasOutcome::AlreadySucceeded(_) => {
                        tracing::info!(
                            module = "order",
                            reference,
                            vendor_status = %record.status,
                            outcome = "ignored",
                            "failure signal lost to a committed success; terminal state kept"
                        );
                        Ok(ReconcileOutcome::AlreadyProcessed)
                    }
                }
            }
        }
    }
}

fn string_field(payload: &Value, key: &str) -> Option<String> {
    match payload.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}
