//! Provider management routes
//!
//! Every mutation follows the same shape: compute the new full provider set,
//! validate it, persist it through the config store, then atomically swap
//! the registry and re-sync the health tracker. Readers of the registry
//! never observe a partially applied change.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
};
use tracing::info;
use url::Url;

use modelgate_core::{HealthSnapshot, ProviderConfig, validate_providers};

use super::types::{ProviderSpec, ProviderView, TestProviderRequest, TestProviderResponse};
use crate::error::ApiError;
use crate::state::AppState;

/// Maximum length for a provider URL
const MAX_URL_LENGTH: usize = 2048;

/// Timeout for connectivity probes
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Create provider management routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/providers",
            get(list_providers)
                .post(create_provider)
                .put(replace_providers),
        )
        .route("/api/providers/health", get(providers_health))
        .route("/api/providers/test", post(test_provider))
        .route(
            "/api/providers/{name}",
            put(update_provider).delete(delete_provider),
        )
        .route("/api/providers/{name}/reset", post(reset_provider))
}

/// Validate a provider URL: http(s) only, with a host
fn validate_provider_url(url_str: &str) -> Result<(), ApiError> {
    if url_str.len() > MAX_URL_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "Provider URL is longer than {} characters",
            MAX_URL_LENGTH
        )));
    }

    let url = Url::parse(url_str)
        .map_err(|e| ApiError::BadRequest(format!("Provider URL does not parse: {}", e)))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ApiError::BadRequest(format!(
                "Unsupported URL scheme '{}', expected http or https",
                scheme
            )));
        }
    }

    if url.host_str().is_none() {
        return Err(ApiError::BadRequest(
            "Provider URL has no host".to_string(),
        ));
    }

    Ok(())
}

/// Persist a new provider set and swap it into the running gateway
async fn apply_providers(
    state: &AppState,
    providers: Vec<ProviderConfig>,
) -> Result<(), ApiError> {
    validate_providers(&providers)?;

    let store = Arc::clone(&state.config_store);
    let persisted = providers.clone();
    tokio::task::spawn_blocking(move || store.replace_providers(persisted))
        .await
        .map_err(|e| ApiError::Internal(format!("Task join error: {}", e)))?
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    state.health.sync(&providers);
    state.registry.replace(providers);
    Ok(())
}

fn current_views(state: &AppState) -> Vec<ProviderView> {
    state
        .registry
        .snapshot()
        .iter()
        .map(|config| ProviderView::from_config(config, state.health.get_snapshot(&config.name)))
        .collect()
}

/// GET /api/providers - list providers with health
async fn list_providers(State(state): State<AppState>) -> Json<Vec<ProviderView>> {
    Json(current_views(&state))
}

/// GET /api/providers/health - health snapshots only
async fn providers_health(State(state): State<AppState>) -> Json<Vec<HealthSnapshot>> {
    Json(state.health.snapshot_all())
}

/// POST /api/providers - add a provider
async fn create_provider(
    State(state): State<AppState>,
    Json(spec): Json<ProviderSpec>,
) -> Result<(StatusCode, Json<ProviderView>), ApiError> {
    validate_provider_url(&spec.url)?;

    let provider: ProviderConfig = spec.into();
    let mut providers = state.config_store.get_providers();
    if providers.iter().any(|p| p.name == provider.name) {
        return Err(ApiError::BadRequest(format!(
            "Provider with name '{}' already exists",
            provider.name
        )));
    }
    providers.push(provider.clone());

    apply_providers(&state, providers).await?;
    info!("Provider {} added", provider.name);

    Ok((
        StatusCode::CREATED,
        Json(ProviderView::from_config(&provider, None)),
    ))
}

/// PUT /api/providers - replace the provider set wholesale
async fn replace_providers(
    State(state): State<AppState>,
    Json(specs): Json<Vec<ProviderSpec>>,
) -> Result<Json<Vec<ProviderView>>, ApiError> {
    for spec in &specs {
        validate_provider_url(&spec.url)?;
    }

    let providers: Vec<ProviderConfig> = specs.into_iter().map(Into::into).collect();
    let count = providers.len();

    apply_providers(&state, providers).await?;
    info!("Provider set replaced, {} providers configured", count);

    Ok(Json(current_views(&state)))
}

/// PUT /api/providers/{name} - update a provider
async fn update_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(spec): Json<ProviderSpec>,
) -> Result<Json<ProviderView>, ApiError> {
    validate_provider_url(&spec.url)?;

    let updated: ProviderConfig = spec.into();
    let mut providers = state.config_store.get_providers();
    let idx = providers
        .iter()
        .position(|p| p.name == name)
        .ok_or_else(|| ApiError::NotFound(format!("Provider '{}'", name)))?;

    if updated.name != name && providers.iter().any(|p| p.name == updated.name) {
        return Err(ApiError::BadRequest(format!(
            "Provider with name '{}' already exists",
            updated.name
        )));
    }

    providers[idx] = updated.clone();

    apply_providers(&state, providers).await?;
    info!("Provider {} updated", name);

    Ok(Json(ProviderView::from_config(
        &updated,
        state.health.get_snapshot(&updated.name),
    )))
}

/// DELETE /api/providers/{name} - remove a provider
async fn delete_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    let mut providers = state.config_store.get_providers();
    let idx = providers
        .iter()
        .position(|p| p.name == name)
        .ok_or_else(|| ApiError::NotFound(format!("Provider '{}'", name)))?;
    providers.remove(idx);

    apply_providers(&state, providers).await?;
    info!("Provider {} removed", name);

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/providers/{name}/reset - operator circuit reset
async fn reset_provider(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<HealthSnapshot>, ApiError> {
    if !state.health.reset(&name) {
        return Err(ApiError::NotFound(format!("Provider '{}'", name)));
    }

    state
        .health
        .get_snapshot(&name)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Provider '{}'", name)))
}

/// POST /api/providers/test - connectivity probe of a candidate config
async fn test_provider(
    State(state): State<AppState>,
    Json(request): Json<TestProviderRequest>,
) -> Result<Json<TestProviderResponse>, ApiError> {
    validate_provider_url(&request.url)?;

    let result = state
        .transport
        .probe(&request.url, request.api_key.as_deref(), PROBE_TIMEOUT)
        .await;

    let response = match result {
        Ok(status) if (200..300).contains(&status) => TestProviderResponse {
            success: true,
            status: Some(status),
            message: "Provider is reachable".to_string(),
        },
        Ok(status) => TestProviderResponse {
            success: false,
            status: Some(status),
            message: format!("Provider responded with status {}", status),
        },
        Err(e) => TestProviderResponse {
            success: false,
            status: None,
            message: e.to_string(),
        },
    };

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url_accepts_http_and_https() {
        assert!(validate_provider_url("https://api.openai.com").is_ok());
        assert!(validate_provider_url("http://localhost:11434").is_ok());
    }

    #[test]
    fn test_validate_url_rejects_other_schemes() {
        assert!(validate_provider_url("ftp://example.com").is_err());
        assert!(validate_provider_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn test_validate_url_rejects_garbage() {
        assert!(validate_provider_url("not a url").is_err());
        assert!(validate_provider_url("").is_err());
    }

    #[test]
    fn test_validate_url_rejects_overlong() {
        let url = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert!(validate_provider_url(&url).is_err());
    }
}
