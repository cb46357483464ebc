use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ports::StoreError;
use crate::vendor::{AmountError, VendorError};

/// Error taxonomy for the payment core. Security mismatches are always
/// final rejections; vendor errors never change local state.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway is not configured: {0}")]
    Configuration(String),

    #[error("currency {0} is not supported by the gateway")]
    CurrencyUnsupported(String),

    #[error(transparent)]
    Vendor(#[from] VendorError),

    #[error("payment initiation rejected by vendor: {0}")]
    InitiationRejected(String),

    #[error("reference mismatch: transaction {reference}, vendor echoed {echoed}")]
    ReferenceMismatch { reference: String, echoed: String },

    #[error("amount mismatch for {reference}: local {local_minor}, validated {validated_minor}")]
    AmountMismatch {
        reference: String,
        local_minor: i64,
        validated_minor: i64,
    },

    #[error("transaction {0} not found")]
    TransactionNotFound(String),

    #[error("transaction {0} has not been charged by the vendor yet")]
    NotCharged(String),

    #[error("no bank transaction id is available for {0}")]
    MissingBankTransaction(String),

    #[error("vendor rejected refund: {0}")]
    RefundRejected(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AmountError> for GatewayError {
    fn from(err: AmountError) -> Self {
        GatewayError::Vendor(VendorError::Malformed(err.to_string()))
    }
}

impl GatewayError {
    /// Reference or amount mismatch against the validation record.
    /// Rejected outright, logged at error severity, never coerced.
    pub fn is_security_mismatch(&self) -> bool {
        matches!(
            self,
            GatewayError::ReferenceMismatch { .. } | GatewayError::AmountMismatch { .. }
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::CurrencyUnsupported(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::Vendor(_) => StatusCode::BAD_GATEWAY,
            GatewayError::InitiationRejected(_) => StatusCode::BAD_GATEWAY,
            GatewayError::ReferenceMismatch { .. } | GatewayError::AmountMismatch { .. } => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::TransactionNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::NotCharged(_) | GatewayError::MissingBankTransaction(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            GatewayError::RefundRejected(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            GatewayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
