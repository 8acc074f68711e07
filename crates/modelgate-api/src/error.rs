//! API error types
//!
//! Maps the core taxonomy onto HTTP statuses. Upstream-caused failures
//! surface as 5xx gateway statuses; caller mistakes keep their 4xx.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use modelgate_core::CoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

/// HTTP status and machine-readable code for a core error
fn map_core(err: &CoreError) -> (StatusCode, &'static str) {
    match err {
        CoreError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
        CoreError::ServerError { .. } | CoreError::Connect { .. } => {
            (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR")
        }
        CoreError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "UPSTREAM_TIMEOUT"),
        CoreError::Unauthorized { .. } => (StatusCode::BAD_GATEWAY, "PROVIDER_UNAUTHORIZED"),
        CoreError::InvalidRequest { status, .. } => (
            // The provider already judged the caller's payload; relay its verdict
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST),
            "UPSTREAM_REJECTED",
        ),
        CoreError::NoProviderAvailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "NO_PROVIDER_AVAILABLE")
        }
        CoreError::AttemptsExhausted { .. } => (StatusCode::BAD_GATEWAY, "ATTEMPTS_EXHAUSTED"),
        CoreError::Cancelled => (StatusCode::GATEWAY_TIMEOUT, "REQUEST_CANCELLED"),
        CoreError::ProviderNotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        CoreError::InvalidConfig(_) => (StatusCode::BAD_REQUEST, "INVALID_CONFIG"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
            ApiError::Core(e) => {
                let (status, code) = map_core(e);
                (status, code, e.to_string())
            }
        };

        // OpenAI-style error envelope
        let body = axum::Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
