//! Management API request/response types

use serde::{Deserialize, Serialize};

use modelgate_core::{Capability, HealthSnapshot, ProviderConfig};

/// Provider definition as accepted by the management API
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSpec {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub capabilities: Vec<Capability>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_max_concurrent() -> usize {
    32
}

fn default_priority() -> i32 {
    100
}

fn default_enabled() -> bool {
    true
}

impl From<ProviderSpec> for ProviderConfig {
    fn from(spec: ProviderSpec) -> Self {
        ProviderConfig {
            name: spec.name,
            display_name: spec.display_name,
            url: spec.url,
            api_key: spec.api_key,
            capabilities: spec.capabilities,
            max_concurrent: spec.max_concurrent,
            priority: spec.priority,
            enabled: spec.enabled,
        }
    }
}

/// Provider view returned by the management API; the credential itself is
/// never echoed back
#[derive(Debug, Clone, Serialize)]
pub struct ProviderView {
    pub name: String,
    pub display_name: String,
    pub url: String,
    pub capabilities: Vec<Capability>,
    pub max_concurrent: usize,
    pub priority: i32,
    pub enabled: bool,
    pub api_key_set: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthSnapshot>,
}

impl ProviderView {
    pub fn from_config(config: &ProviderConfig, health: Option<HealthSnapshot>) -> Self {
        Self {
            name: config.name.clone(),
            display_name: config.display_name().to_string(),
            url: config.url.clone(),
            capabilities: config.capabilities.clone(),
            max_concurrent: config.max_concurrent,
            priority: config.priority,
            enabled: config.enabled,
            api_key_set: config.api_key.is_some(),
            health,
        }
    }
}

/// Connectivity test request for a candidate provider
#[derive(Debug, Deserialize)]
pub struct TestProviderRequest {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Connectivity test result
#[derive(Debug, Serialize)]
pub struct TestProviderResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub message: String,
}
