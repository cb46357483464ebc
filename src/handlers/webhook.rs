//! The vendor's asynchronous notification endpoint.
//!
//! Deliveries arrive at-least-once as either JSON or an HTML form
//! body. Responses are tuned so the vendor's retry machinery does the
//! right thing: 2xx acknowledges and stops redelivery, non-2xx invites
//! another attempt.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};

use crate::services::{NotificationDisposition, ReconcileOutcome};
use crate::AppState;

/// POST /webhooks/gateway
pub async fn receive_notification(State(state): State<AppState>, body: Bytes) -> Response {
    if body.is_empty() {
        tracing::info!(module = "order", outcome = "probe", "empty notification body");
        return (StatusCode::OK, Json(json!({ "received": "probe" }))).into_response();
    }

    let payload = match parse_body(&body) {
        Some(payload) => payload,
        None => {
            tracing::error!(
                module = "order",
                outcome = "malformed",
                "notification body is neither JSON nor a form"
            );
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "unparseable notification body" })),
            )
                .into_response();
        }
    };

    match state.engine.handle_notification(&payload).await {
        NotificationDisposition::Probe => {
            (StatusCode::OK, Json(json!({ "received": "probe" }))).into_response()
        }
        NotificationDisposition::Malformed(detail) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": detail })),
        )
            .into_response(),
        NotificationDisposition::UnknownReference(reference) => (
            StatusCode::OK,
            Json(json!({ "received": "acknowledged", "reference": reference })),
        )
            .into_response(),
        NotificationDisposition::Completed(outcome) => {
            let label = match outcome {
                ReconcileOutcome::Confirmed(_) => "confirmed",
                ReconcileOutcome::AlreadyProcessed => "already_processed",
                ReconcileOutcome::MarkedFailed { .. } => "failed",
            };
            (StatusCode::OK, Json(json!({ "received": label }))).into_response()
        }
        NotificationDisposition::VerificationUnavailable(detail) => {
            // No state changed; a non-2xx asks the vendor to redeliver.
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": detail })),
            )
                .into_response()
        }
        NotificationDisposition::SecurityRejected(err) | NotificationDisposition::Failed(err) => {
            err.into_response()
        }
    }
}

/// The vendor posts `application/x-www-form-urlencoded` in production
/// but JSON from its test console; accept both.
fn parse_body(body: &[u8]) -> Option<Value> {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        if value.is_object() {
            return Some(value);
        }
    }

    // Form decoding is lossy and accepts almost anything; requiring a
    // value on at least one pair filters out junk bodies.
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body).ok()?;
    if pairs.iter().all(|(_, value)| value.is_empty()) {
        return None;
    }
    let mut map = Map::new();
    for (key, value) in pairs {
        map.insert(key, Value::String(value));
    }
    Some(Value::Object(map))
}
