//! Switchyard - multi-tenant LLM gateway
//!
//! This is the main entry point for the Switchyard server.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use switchyard::config::bind_listener;
use switchyard::{
    routes, AppState, Config, ConfigRegistry, GatewayFile, JsonLinesUsageSink, TracingUsageSink,
    UsageSink,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.log_json);

    info!("Starting Switchyard LLM gateway");

    let file = GatewayFile::load(&config.gateway_config_path).with_context(|| {
        format!(
            "Failed to load gateway configuration from {}",
            config.gateway_config_path.display()
        )
    })?;
    let (host, port) = file.listen_addr(&config);

    let mut registry = ConfigRegistry::from_file(file)?;
    if let Some(order) = config.failover_order {
        registry = registry.with_failover_order(order);
    }
    info!(
        tenants = registry.tenants().len(),
        models = registry.index().len(),
        failover_order = ?registry.failover_order(),
        "Configuration loaded successfully"
    );

    // Initialize metrics
    routes::metrics::init_metrics();
    info!("Metrics initialized");

    let usage_sink: Arc<dyn UsageSink> = match &config.usage_log_path {
        Some(path) => {
            let sink = JsonLinesUsageSink::spawn(path)
                .await
                .with_context(|| format!("Failed to open usage log {}", path.display()))?;
            info!(path = %path.display(), "Writing usage facts to file");
            Arc::new(sink)
        }
        None => Arc::new(TracingUsageSink),
    };

    // Initialize application state
    let state = Arc::new(AppState::new(config, registry, usage_sink)?);
    info!("Application state initialized");

    // Build the router
    let app = routes::create_router(state);

    // Bind to address
    let listener = bind_listener(&host, port).await?;
    info!("Listening on {}", listener.local_addr()?);

    // Start server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Switchyard shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "switchyard=info,tower_http=info".into());

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    }
}

/// Handle graceful shutdown signals
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating shutdown");
        }
    }
}
