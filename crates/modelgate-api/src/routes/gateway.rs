//! OpenAI-compatible data plane
//!
//! Request bodies pass through the failover core untouched; the serving
//! provider's status, content type and body come back verbatim, with the
//! provider name and attempt count exposed as response headers.

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use tracing::debug;

use modelgate_core::{Capability, RequestEnvelope};

use crate::error::ApiError;
use crate::state::AppState;

/// Create data plane routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/audio/transcriptions", post(audio_transcriptions))
        .route("/v1/embeddings", post(embeddings))
}

/// POST /v1/chat/completions
async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    forward(state, Capability::Chat, headers, body).await
}

/// POST /v1/audio/transcriptions
async fn audio_transcriptions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    forward(state, Capability::Audio, headers, body).await
}

/// POST /v1/embeddings
async fn embeddings(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    forward(state, Capability::Embeddings, headers, body).await
}

/// Forward a request through the failover core
async fn forward(
    state: AppState,
    capability: Capability,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("application/json")
        .to_string();

    let envelope = RequestEnvelope::new(capability, content_type, body)
        .with_deadline(state.default_deadline);

    debug!(request = %envelope.id, "Accepted {} request", capability);

    let upstream = state.executor.execute(&envelope).await?;

    let status = StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::OK);
    let mut response = (status, upstream.body).into_response();

    let response_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&upstream.content_type) {
        response_headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&upstream.provider) {
        response_headers.insert("x-modelgate-provider", value);
    }
    response_headers.insert("x-modelgate-attempts", HeaderValue::from(upstream.attempts));

    Ok(response)
}
