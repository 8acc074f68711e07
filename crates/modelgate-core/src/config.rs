//! Shared configuration types for provider management
//!
//! These types are shared across crates to avoid circular dependencies.
//! The main config loading is done in the modelgate binary, but these
//! types define the provider configuration structure used by the core.

use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// A capability an upstream provider can serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Chat,
    Audio,
    Embeddings,
}

impl Capability {
    /// OpenAI-compatible endpoint path for this capability
    pub fn endpoint_path(self) -> &'static str {
        match self {
            Capability::Chat => "/v1/chat/completions",
            Capability::Audio => "/v1/audio/transcriptions",
            Capability::Embeddings => "/v1/embeddings",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Chat => write!(f, "chat"),
            Capability::Audio => write!(f, "audio"),
            Capability::Embeddings => write!(f, "embeddings"),
        }
    }
}

/// Configuration for a single upstream provider
///
/// Immutable once loaded; reconfiguration replaces the whole provider set
/// through [`crate::provider::ProviderRegistry::replace`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique identifier for the provider
    pub name: String,
    /// Display name for operators (defaults to name if not set)
    #[serde(default)]
    pub display_name: Option<String>,
    /// Base URL of the provider endpoint
    pub url: String,
    /// API key sent as a bearer credential
    #[serde(default)]
    pub api_key: Option<String>,
    /// Capabilities this provider declares
    pub capabilities: Vec<Capability>,
    /// Maximum in-flight requests against this provider
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Selection priority (lower = preferred)
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Whether this provider is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ProviderConfig {
    /// Get the display name, falling back to name if not set
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Whether this provider declares the given capability
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Failover and health-tracking tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Maximum distinct providers tried per request
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Consecutive retryable failures before a circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Cool-down after the first circuit open, doubled on each reopen
    #[serde(default = "default_open_cooldown_secs")]
    pub open_cooldown_secs: u64,
    /// Upper bound on the circuit cool-down
    #[serde(default = "default_open_cooldown_max_secs")]
    pub open_cooldown_max_secs: u64,
    /// How long a 429 keeps a provider out of selection
    #[serde(default = "default_rate_limit_cooldown_secs")]
    pub rate_limit_cooldown_secs: u64,
    /// Per-attempt transport timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Overall deadline applied to requests that do not carry one
    #[serde(default = "default_deadline_secs")]
    pub default_deadline_secs: u64,
}

impl FailoverConfig {
    pub fn open_cooldown(&self) -> Duration {
        Duration::from_secs(self.open_cooldown_secs)
    }

    pub fn open_cooldown_max(&self) -> Duration {
        Duration::from_secs(self.open_cooldown_max_secs)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn default_deadline(&self) -> Duration {
        Duration::from_secs(self.default_deadline_secs)
    }
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            failure_threshold: default_failure_threshold(),
            open_cooldown_secs: default_open_cooldown_secs(),
            open_cooldown_max_secs: default_open_cooldown_max_secs(),
            rate_limit_cooldown_secs: default_rate_limit_cooldown_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            default_deadline_secs: default_deadline_secs(),
        }
    }
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

fn default_max_attempts() -> u32 {
    3
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_open_cooldown_secs() -> u64 {
    10
}

fn default_open_cooldown_max_secs() -> u64 {
    300
}

fn default_rate_limit_cooldown_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_deadline_secs() -> u64 {
    300
}

/// Maximum length for a provider name
pub const MAX_NAME_LENGTH: usize = 64;

/// Validate a provider set before it is installed
///
/// Rejects duplicate names, malformed names, non-HTTP URLs and empty
/// capability sets so the registry never holds a config the router cannot
/// act on.
pub fn validate_providers(providers: &[ProviderConfig]) -> Result<(), CoreError> {
    let mut seen = std::collections::HashSet::new();

    for provider in providers {
        if provider.name.is_empty() || provider.name.len() > MAX_NAME_LENGTH {
            return Err(CoreError::InvalidConfig(format!(
                "provider name must be 1-{} characters",
                MAX_NAME_LENGTH
            )));
        }

        if !provider
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CoreError::InvalidConfig(format!(
                "provider name '{}' contains invalid characters",
                provider.name
            )));
        }

        if !seen.insert(provider.name.as_str()) {
            return Err(CoreError::InvalidConfig(format!(
                "duplicate provider name '{}'",
                provider.name
            )));
        }

        if !provider.url.starts_with("http://") && !provider.url.starts_with("https://") {
            return Err(CoreError::InvalidConfig(format!(
                "provider '{}' URL must be http or https",
                provider.name
            )));
        }

        if provider.capabilities.is_empty() {
            return Err(CoreError::InvalidConfig(format!(
                "provider '{}' declares no capabilities",
                provider.name
            )));
        }

        if provider.max_concurrent == 0 {
            return Err(CoreError::InvalidConfig(format!(
                "provider '{}' max_concurrent must be at least 1",
                provider.name
            )));
        }
    }

    Ok(())
}

/// Trait for providing and persisting provider configuration
///
/// This allows the config to be managed externally (e.g., by the modelgate
/// binary's file-backed store) while the management API mutates it without
/// knowing where it lives.
pub trait ProviderConfigStore: Send + Sync {
    /// Get the current provider set
    fn get_providers(&self) -> Vec<ProviderConfig>;

    /// Replace the provider set wholesale, persisting if applicable
    fn replace_providers(&self, providers: Vec<ProviderConfig>) -> anyhow::Result<()>;
}

/// A simple in-memory implementation of [`ProviderConfigStore`] for testing
/// or when no persistence is needed
pub struct InMemoryConfigStore {
    providers: RwLock<Vec<ProviderConfig>>,
}

impl InMemoryConfigStore {
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        Self {
            providers: RwLock::new(providers),
        }
    }
}

impl ProviderConfigStore for InMemoryConfigStore {
    fn get_providers(&self) -> Vec<ProviderConfig> {
        self.providers.read().clone()
    }

    fn replace_providers(&self, providers: Vec<ProviderConfig>) -> anyhow::Result<()> {
        *self.providers.write() = providers;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_provider(name: &str) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            display_name: None,
            url: "https://api.example.com".to_string(),
            api_key: Some("sk-test".to_string()),
            capabilities: vec![Capability::Chat],
            max_concurrent: default_max_concurrent(),
            priority: default_priority(),
            enabled: true,
        }
    }

    #[test]
    fn test_endpoint_paths() {
        assert_eq!(Capability::Chat.endpoint_path(), "/v1/chat/completions");
        assert_eq!(
            Capability::Audio.endpoint_path(),
            "/v1/audio/transcriptions"
        );
        assert_eq!(Capability::Embeddings.endpoint_path(), "/v1/embeddings");
    }

    #[test]
    fn test_capability_serde_lowercase() {
        let parsed: Vec<Capability> =
            serde_json::from_str(r#"["chat", "audio", "embeddings"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![Capability::Chat, Capability::Audio, Capability::Embeddings]
        );
    }

    #[test]
    fn test_display_name_fallback() {
        let mut provider = make_provider("alpha");
        assert_eq!(provider.display_name(), "alpha");

        provider.display_name = Some("Alpha Cloud".to_string());
        assert_eq!(provider.display_name(), "Alpha Cloud");
    }

    #[test]
    fn test_validate_accepts_good_set() {
        let providers = vec![make_provider("alpha"), make_provider("beta")];
        assert!(validate_providers(&providers).is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let providers = vec![make_provider("alpha"), make_provider("alpha")];
        assert!(validate_providers(&providers).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut provider = make_provider("alpha");
        provider.url = "ftp://example.com".to_string();
        assert!(validate_providers(&[provider]).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_capabilities() {
        let mut provider = make_provider("alpha");
        provider.capabilities.clear();
        assert!(validate_providers(&[provider]).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_name() {
        let mut provider = make_provider("alpha");
        provider.name = "bad name!".to_string();
        assert!(validate_providers(&[provider]).is_err());
    }

    #[test]
    fn test_failover_defaults() {
        let config: FailoverConfig = toml::from_str("").unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.open_cooldown(), Duration::from_secs(10));
        assert_eq!(config.open_cooldown_max(), Duration::from_secs(300));
    }

    #[test]
    fn test_in_memory_store_replace() {
        let store = InMemoryConfigStore::new(vec![make_provider("alpha")]);
        assert_eq!(store.get_providers().len(), 1);

        store
            .replace_providers(vec![make_provider("beta"), make_provider("gamma")])
            .unwrap();
        let names: Vec<String> = store.get_providers().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["beta", "gamma"]);
    }
}
