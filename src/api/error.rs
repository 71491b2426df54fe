//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Webhook signature missing or invalid.
    #[error("invalid signature")]
    InvalidSignature,

    /// Webhook payload could not be validated.
    #[error("bad payload: {0}")]
    BadPayload(String),

    /// Contribution id is not `0x` + 64 hex digits.
    #[error("bad id: {0}")]
    BadId(String),

    /// Other invalid request input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Resource does not exist.
    #[error("not found")]
    NotFound,

    /// Admin token missing or wrong.
    #[error("unauthorized")]
    Unauthorized,

    /// Endpoint disabled by configuration.
    #[error("disabled")]
    Disabled,

    /// The ledger registrar is inactive.
    #[error("chain unavailable")]
    ChainUnavailable,

    /// Unexpected failure; details are logged, not returned.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiError {
    /// Status code and error code for this error.
    #[must_use]
    pub const fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::InvalidSignature => (StatusCode::UNAUTHORIZED, "invalid_signature"),
            Self::BadPayload(_) => (StatusCode::BAD_REQUEST, "bad_payload"),
            Self::BadId(_) => (StatusCode::BAD_REQUEST, "bad_id"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Disabled => (StatusCode::FORBIDDEN, "disabled"),
            Self::ChainUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "chain_unavailable"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl From<crate::Error> for ApiError {
    fn from(e: crate::Error) -> Self {
        match e {
            crate::Error::InvalidInput(msg) => Self::BadRequest(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            Self::BadPayload(msg) | Self::BadId(msg) | Self::BadRequest(msg) => Some(msg.clone()),
            Self::Internal(msg) => {
                error!("Request failed: {msg}");
                None
            }
            _ => None,
        };

        (
            status,
            Json(ErrorResponse {
                error: code,
                message,
            }),
        )
            .into_response()
    }
}

/// Handler result type.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
