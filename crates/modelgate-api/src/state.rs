//! Application state

use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use modelgate_core::{FailoverExecutor, HealthTracker, ProviderConfigStore, ProviderRegistry};
use modelgate_proxy::ProviderTransport;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProviderRegistry>,
    pub health: Arc<HealthTracker>,
    pub executor: Arc<FailoverExecutor>,
    pub transport: Arc<dyn ProviderTransport>,
    pub config_store: Arc<dyn ProviderConfigStore>,
    /// Deadline applied to data-plane requests
    pub default_deadline: Duration,
}

impl AppState {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        health: Arc<HealthTracker>,
        executor: Arc<FailoverExecutor>,
        transport: Arc<dyn ProviderTransport>,
        config_store: Arc<dyn ProviderConfigStore>,
        default_deadline: Duration,
    ) -> Self {
        Self {
            registry,
            health,
            executor,
            transport,
            config_store,
            default_deadline,
        }
    }
}

/// Handle for rendering Prometheus metrics
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    pub fn new(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}
