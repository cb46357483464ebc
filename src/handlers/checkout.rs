//! Checkout session creation and the shopper's return from the vendor
//! checkout page.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::Deserialize;
use serde_json::json;

use crate::domain::TransactionStatus;
use crate::error::GatewayError;
use crate::services::RedirectOutcome;
use crate::AppState;

/// Either reference identifies the payment to bootstrap: the
/// transaction's own, or the order's (resolved to its most recent
/// pending payment).
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub transaction_reference: Option<String>,
    pub order_reference: Option<String>,
}

/// POST /checkout/session
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Response, GatewayError> {
    let transaction = match (&request.transaction_reference, &request.order_reference) {
        (Some(reference), _) => state
            .store
            .find_by_reference(reference)
            .await?
            .ok_or_else(|| GatewayError::TransactionNotFound(reference.clone()))?,
        (None, Some(order_reference)) => {
            let order_id = state
                .orders
                .order_id_by_reference(order_reference)
                .await?
                .ok_or_else(|| GatewayError::TransactionNotFound(order_reference.clone()))?;
            state
                .store
                .find_pending_payment_for_order(order_id)
                .await?
                .ok_or_else(|| GatewayError::TransactionNotFound(order_reference.clone()))?
        }
        (None, None) => {
            return Ok((
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": "transaction_reference or order_reference is required"
                })),
            )
                .into_response());
        }
    };

    if transaction.status != TransactionStatus::Pending {
        return Err(GatewayError::InitiationRejected(format!(
            "transaction is {}, only pending transactions can start checkout",
            transaction.status.as_str()
        )));
    }

    let ctx = state.orders.order_context(transaction.order_id).await?;
    let next_action = state.initiator.initiate(&ctx, &transaction).await?;

    Ok((StatusCode::OK, Json(next_action)).into_response())
}

/// The vendor appends its own fields to the return URL; the reference
/// can arrive under our name or the vendor's echo.
#[derive(Debug, Deserialize)]
pub struct ReturnParams {
    reference: Option<String>,
    tran_id: Option<String>,
    status: Option<String>,
    val_id: Option<String>,
}

/// GET /payments/return
pub async fn payment_return(
    State(state): State<AppState>,
    Query(params): Query<ReturnParams>,
) -> Response {
    finish_return(state, params).await
}

/// POST /payments/return. The vendor can also send the shopper back
/// with a form POST.
pub async fn payment_return_post(
    State(state): State<AppState>,
    Form(params): Form<ReturnParams>,
) -> Response {
    finish_return(state, params).await
}

/// Always 200: the return page renders regardless of what the
/// opportunistic confirmation attempt concluded. The webhook remains
/// the authoritative path.
async fn finish_return(state: AppState, params: ReturnParams) -> Response {
    let reference = match params.reference.or(params.tran_id) {
        Some(r) if !r.is_empty() => r,
        _ => {
            return (
                StatusCode::OK,
                Json(json!({ "outcome": "skipped", "detail": "no transaction reference" })),
            )
                .into_response();
        }
    };

    let outcome = state
        .engine
        .return_redirect(
            &reference,
            params.status.as_deref().unwrap_or_default(),
            params.val_id.as_deref(),
        )
        .await;

    let label = match outcome {
        RedirectOutcome::Confirmed => "confirmed",
        RedirectOutcome::AlreadyProcessed => "already_processed",
        RedirectOutcome::Skipped => "skipped",
        RedirectOutcome::Unverified => "unverified",
    };

    (
        StatusCode::OK,
        Json(json!({ "outcome": label, "reference": reference })),
    )
        .into_response()
}
