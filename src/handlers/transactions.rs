//! Operator-facing transaction endpoints: inspection, manual
//! confirmation, and refunds.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::domain::Transaction;
use crate::error::GatewayError;
use crate::services::ReconcileOutcome;
use crate::AppState;

/// GET /transactions/:reference
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Response, GatewayError> {
    let transaction = find(&state, &reference).await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "transaction": transaction,
            "manage_url": state.config.gateway.manage_url(),
        })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub val_id: String,
}

/// POST /transactions/:reference/confirm
pub async fn confirm_transaction(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Response, GatewayError> {
    let outcome = state.engine.manual_confirm(&reference, &request.val_id).await?;

    let body = match outcome {
        ReconcileOutcome::Confirmed(transaction) => json!({
            "outcome": "confirmed",
            "transaction": *transaction,
        }),
        ReconcileOutcome::AlreadyProcessed => json!({
            "outcome": "already_processed",
            "reference": reference,
        }),
        ReconcileOutcome::MarkedFailed { reason } => json!({
            "outcome": "failed",
            "reference": reference,
            "reason": reason,
        }),
    };

    Ok((StatusCode::OK, Json(body)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub amount_minor: i64,
    #[serde(default)]
    pub reason: String,
    /// Optional merchant correlation id passed through to the vendor.
    pub refe_id: Option<String>,
}

/// POST /transactions/:reference/refunds
pub async fn create_refund(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    Json(request): Json<RefundRequest>,
) -> Result<Response, GatewayError> {
    let transaction = find(&state, &reference).await?;

    let refund_ref_id = state
        .refunds
        .refund(
            &transaction,
            request.amount_minor,
            &request.reason,
            request.refe_id.as_deref(),
        )
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "refund_ref_id": refund_ref_id,
            "reference": reference,
            "amount_minor": request.amount_minor,
        })),
    )
        .into_response())
}

/// GET /transactions/:reference/refunds/:refund_ref_id
pub async fn get_refund_status(
    State(state): State<AppState>,
    Path((reference, refund_ref_id)): Path<(String, String)>,
) -> Result<Response, GatewayError> {
    let transaction = find(&state, &reference).await?;

    let response = state
        .refunds
        .sync_refund_status(&transaction, &refund_ref_id)
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "refund_ref_id": refund_ref_id,
            "status": response.status,
            "bank_tran_id": response.bank_tran_id,
        })),
    )
        .into_response())
}

async fn find(state: &AppState, reference: &str) -> Result<Transaction, GatewayError> {
    state
        .store
        .find_by_reference(reference)
        .await?
        .ok_or_else(|| GatewayError::TransactionNotFound(reference.to_string()))
}
