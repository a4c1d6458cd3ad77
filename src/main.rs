use anyhow::{Context, Result};
use chrono::Duration;
use growth_connect::api::{create_router, ApiState};
use growth_connect::config::ServiceConfig;
use growth_connect::oauth::{run_nonce_gc, OAuthService};
use growth_connect::store::Store;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "growth_connect=info".into()),
        )
        .init();

    info!("Growth Connect starting...");

    let config = ServiceConfig::load().context("Failed to load configuration")?;

    info!(
        listen_addr = %config.server.listen_addr,
        database_path = %config.server.database_path,
        callback_url = %config.callback_url(),
        providers = config.providers.len(),
        "Configuration loaded"
    );

    let store = Arc::new(
        Store::open(&config.server.database_path).context("Failed to open database")?,
    );
    info!("Store initialized");

    let service = Arc::new(
        OAuthService::new(&config, Arc::clone(&store))
            .context("Failed to initialize OAuth service")?,
    );

    // Periodically purge nonces past their retention window
    let gc_handle = match service.state_manager() {
        Some(manager) => {
            let retention = Duration::try_seconds(config.state.retention_seconds)
                .context("Nonce retention out of range")?;
            Some(tokio::spawn(run_nonce_gc(
                manager.clone(),
                retention,
                config.state.gc_interval_seconds.max(1),
            )))
        }
        None => {
            warn!("Nonce cleanup disabled (no state secret)");
            None
        }
    };

    let router = create_router(
        ApiState {
            service: Arc::clone(&service),
        },
        &config.redirect.allowed_origins,
    );

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen_addr))?;
    info!(addr = %config.server.listen_addr, "HTTP API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    if let Some(handle) = gc_handle {
        handle.abort();
    }
    info!("Growth Connect stopped");

    Ok(())
}
