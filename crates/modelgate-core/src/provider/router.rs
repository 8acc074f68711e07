//! Provider selection policy
//!
//! Picks the provider for the next dispatch attempt: closed circuits before
//! half-open ones, then fewest recent failures, then declared priority, then
//! name for determinism. Open and disabled circuits, active rate-limit
//! windows and saturated concurrency limits are never selected.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

use crate::config::{Capability, ProviderConfig};
use crate::error::CoreError;
use crate::provider::health::HealthTracker;
use crate::provider::registry::ProviderRegistry;

/// A selected provider together with its concurrency permit for one attempt
pub struct Selection {
    pub provider: ProviderConfig,
    pub permit: OwnedSemaphorePermit,
}

/// Selects providers for incoming requests
pub struct Router {
    registry: Arc<ProviderRegistry>,
    health: Arc<HealthTracker>,
}

impl Router {
    pub fn new(registry: Arc<ProviderRegistry>, health: Arc<HealthTracker>) -> Self {
        Self { registry, health }
    }

    /// Select an eligible provider for a capability, skipping `excluded`
    /// names. Returns the provider and a held concurrency permit.
    pub fn select(
        &self,
        capability: Capability,
        excluded: &HashSet<String>,
    ) -> Result<Selection, CoreError> {
        let mut candidates: Vec<(ProviderConfig, (u8, u32))> = self
            .registry
            .list(capability)
            .into_iter()
            .filter(|p| !excluded.contains(&p.name))
            .filter_map(|p| self.health.selection_key(&p.name).map(|key| (p, key)))
            .collect();

        candidates.sort_by(|a, b| {
            (a.1, a.0.priority, a.0.name.as_str()).cmp(&(b.1, b.0.priority, b.0.name.as_str()))
        });

        for (provider, key) in candidates {
            if let Some(permit) = self.health.try_acquire(&provider.name) {
                debug!(
                    "Selected provider {} for {} (circuit rank {}, failures {})",
                    provider.name, capability, key.0, key.1
                );
                return Ok(Selection { provider, permit });
            }
        }

        Err(CoreError::NoProviderAvailable { capability })
    }
}
