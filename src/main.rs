//! Warden Server - Main entry point
//!
//! Stands up the admission-controlled HTTP boundary: configuration,
//! telemetry, the rate limiter and its reaper, and an axum server wrapped
//! in the admission layer. The demo wiring uses the in-memory access list;
//! production deployments supply the backend's own allow/deny list service.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use warden_core::{
    config::Config,
    middleware::AdmissionLayer,
    ratelimit::{self, MemoryAccessList, RateLimiter, UnlimitedTokens},
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config: {}. Using defaults.", e);
        Config::default()
    });

    // Initialize telemetry
    telemetry::init(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Warden Server"
    );

    // Build the limiter; tier validation is fatal here, not per request.
    let access_list = Arc::new(MemoryAccessList::new());
    let limiter = Arc::new(
        RateLimiter::new(&config.admission, access_list.clone())
            .map_err(|e| anyhow::anyhow!("invalid admission config: {e}"))?,
    );

    // Start the reaper
    ratelimit::reaper::spawn(limiter.clone(), config.admission.reaper_interval);
    tracing::info!(
        interval = ?config.admission.reaper_interval,
        idle_window = ?config.admission.idle_eviction,
        "Reaper started"
    );

    // Build router
    let admission = AdmissionLayer::new(
        limiter,
        access_list,
        Arc::new(UnlimitedTokens),
        config.admission.trusted_proxy_headers.clone(),
    );

    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/health", get(|| async { "healthy" }))
        .layer(admission)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
