//! Modelgate - Multi-provider gateway for OpenAI-compatible APIs

use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::Config;
use modelgate_api::{AppState, MetricsHandle, create_router};
use modelgate_core::{
    FailoverExecutor, HealthTracker, ProviderRegistry, Router, validate_providers,
};
use modelgate_proxy::HttpTransport;

/// Modelgate - Multi-provider gateway for OpenAI-compatible APIs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "MODELGATE_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "MODELGATE_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    init_logging(&config.logging.level, &config.logging.format);

    info!("Starting Modelgate v{}", env!("CARGO_PKG_VERSION"));

    validate_providers(&config.providers)?;
    for provider in &config.providers {
        info!(
            "Loaded provider: {} -> {} (capabilities: {})",
            provider.name,
            provider.url,
            provider
                .capabilities
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    // The recorder must exist before the first counter is touched
    let prometheus = PrometheusBuilder::new().install_recorder()?;
    let metrics_handle = Arc::new(MetricsHandle::new(prometheus));

    // Routing core: registry feeds the router, the health tracker gates it
    let registry = Arc::new(ProviderRegistry::new(config.providers.clone()));
    let health = Arc::new(HealthTracker::new(config.failover.clone()));
    health.sync(&config.providers);
    let router = Arc::new(Router::new(Arc::clone(&registry), Arc::clone(&health)));

    let transport = Arc::new(HttpTransport::new()?);
    let executor = Arc::new(FailoverExecutor::new(
        router,
        Arc::clone(&health),
        transport.clone(),
        config.failover.clone(),
    ));

    // File-backed store lets the management API persist provider changes
    let default_deadline = config.failover.default_deadline();
    let config_store = Arc::new(config::FileConfigStore::new(config.clone(), args.config));

    let state = AppState::new(
        registry,
        health,
        executor,
        transport,
        config_store,
        default_deadline,
    );

    let app = create_router(state, Some(metrics_handle)).layer(TraceLayer::new_for_http());

    let bind_addr = args.bind.unwrap_or(config.server.bind_address);
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind_addr, port).parse()?;

    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

/// Resolves on SIGINT, or on SIGTERM where that exists
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
