//! Provider registry
//!
//! Holds the active provider set. Lookups are read-mostly; reconfiguration
//! swaps the whole set atomically so readers never observe a partially
//! applied config.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::config::{Capability, ProviderConfig};
use crate::error::CoreError;

/// Registry of configured upstream providers
pub struct ProviderRegistry {
    providers: RwLock<Arc<Vec<ProviderConfig>>>,
}

impl ProviderRegistry {
    /// Create a registry holding the given provider set
    pub fn new(providers: Vec<ProviderConfig>) -> Self {
        Self {
            providers: RwLock::new(Arc::new(providers)),
        }
    }

    /// Get the current provider set snapshot
    pub fn snapshot(&self) -> Arc<Vec<ProviderConfig>> {
        Arc::clone(&self.providers.read())
    }

    /// List enabled providers declaring a capability, ordered by
    /// `(priority, name)` for determinism
    pub fn list(&self, capability: Capability) -> Vec<ProviderConfig> {
        let snapshot = self.snapshot();
        let mut matched: Vec<ProviderConfig> = snapshot
            .iter()
            .filter(|p| p.enabled && p.has_capability(capability))
            .cloned()
            .collect();

        matched.sort_by(|a, b| (a.priority, a.name.as_str()).cmp(&(b.priority, b.name.as_str())));
        matched
    }

    /// Get a provider by name
    pub fn get(&self, name: &str) -> Result<ProviderConfig, CoreError> {
        self.snapshot()
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .ok_or_else(|| CoreError::ProviderNotFound {
                name: name.to_string(),
            })
    }

    /// Names of all configured providers
    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|p| p.name.clone()).collect()
    }

    /// Replace the provider set wholesale
    pub fn replace(&self, providers: Vec<ProviderConfig>) {
        let count = providers.len();
        *self.providers.write() = Arc::new(providers);
        info!("Provider registry replaced, {} providers active", count);
    }

    /// Number of configured providers
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_provider(name: &str, priority: i32, capabilities: Vec<Capability>) -> ProviderConfig {
        ProviderConfig {
            name: name.to_string(),
            display_name: None,
            url: format!("https://{}.example.com", name),
            api_key: None,
            capabilities,
            max_concurrent: 8,
            priority,
            enabled: true,
        }
    }

    #[test]
    fn test_list_filters_by_capability() {
        let registry = ProviderRegistry::new(vec![
            make_provider("alpha", 100, vec![Capability::Chat]),
            make_provider("beta", 100, vec![Capability::Audio]),
        ]);

        let chat = registry.list(Capability::Chat);
        assert_eq!(chat.len(), 1);
        assert_eq!(chat[0].name, "alpha");

        assert!(registry.list(Capability::Embeddings).is_empty());
    }

    #[test]
    fn test_list_skips_disabled() {
        let mut disabled = make_provider("alpha", 100, vec![Capability::Chat]);
        disabled.enabled = false;
        let registry = ProviderRegistry::new(vec![
            disabled,
            make_provider("beta", 100, vec![Capability::Chat]),
        ]);

        let chat = registry.list(Capability::Chat);
        assert_eq!(chat.len(), 1);
        assert_eq!(chat[0].name, "beta");
    }

    #[test]
    fn test_list_orders_by_priority_then_name() {
        let registry = ProviderRegistry::new(vec![
            make_provider("zeta", 50, vec![Capability::Chat]),
            make_provider("alpha", 100, vec![Capability::Chat]),
            make_provider("beta", 50, vec![Capability::Chat]),
        ]);

        let names: Vec<String> = registry
            .list(Capability::Chat)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["beta", "zeta", "alpha"]);
    }

    #[test]
    fn test_get_not_found() {
        let registry = ProviderRegistry::new(vec![]);
        assert!(matches!(
            registry.get("missing"),
            Err(CoreError::ProviderNotFound { .. })
        ));
    }

    #[test]
    fn test_replace_swaps_wholesale() {
        let registry = ProviderRegistry::new(vec![make_provider(
            "alpha",
            100,
            vec![Capability::Chat],
        )]);
        let before = registry.snapshot();

        registry.replace(vec![
            make_provider("beta", 100, vec![Capability::Chat]),
            make_provider("gamma", 100, vec![Capability::Chat]),
        ]);

        // Old snapshots are unaffected by the swap
        assert_eq!(before.len(), 1);
        assert_eq!(registry.len(), 2);
        assert!(registry.get("alpha").is_err());
        assert!(registry.get("gamma").is_ok());
    }
}
