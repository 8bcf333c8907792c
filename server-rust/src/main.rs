use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use aoi_server::handlers;
use aoi_server::sessions::SWEEP_MAX_AGE;
use aoi_server::state::{AppState, ServerConfig, SharedAppState};

// ─── Background sweep ─────────────────────────────────────────────────────────

/// Hourly housekeeping: stale temp directories and orphaned capture
/// directories disappear after 24 hours, so a crashed client cannot fill
/// the shared mount.
async fn run_sweeper(state: SharedAppState) {
    let mut interval = tokio::time::interval(Duration::from_secs(3600));
    loop {
        interval.tick().await;
        state.sessions.sweep(SWEEP_MAX_AGE).await;
    }
}

/// Wait for ctrl-c, then close every open session (captures are deleted,
/// outputs kept) before the process exits.
async fn shutdown_signal(state: SharedAppState) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        return;
    }
    info!("shutdown requested, closing active sessions");
    state.sessions.close_all().await;
}

// ─── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aoi_server=info".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    info!(
        "AOI inspection server v{} starting — shared root {:?}, {} detector worker(s)",
        env!("CARGO_PKG_VERSION"),
        config.shared_root,
        config.max_workers,
    );
    if config.link_url.is_none() {
        info!("barcode-link not configured; device barcodes stay raw");
    }
    if config.ocr_url.is_none() {
        info!("OCR sidecar not configured; OCR ROIs will fail individually");
    }
    if config.barcode_url.is_none() {
        info!("barcode sidecar not configured; barcode ROIs will fail individually");
    }

    let port = config.port;
    let state: SharedAppState = Arc::new(AppState::new(config));

    // Catch up on anything a previous run left behind, then keep sweeping.
    state.sessions.sweep(SWEEP_MAX_AGE).await;
    tokio::spawn(run_sweeper(state.clone()));

    // CORS — local dev UIs by default; set AOI_CORS_ORIGINS=* on a closed
    // plant network where every operator panel may connect.
    let cors_origins_env = std::env::var("AOI_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string());
    let cors = if cors_origins_env.trim() == "*" {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = cors_origins_env
            .split(',')
            .filter_map(|o| o.trim().parse::<HeaderValue>().ok())
            .collect();
        CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
    };

    let app = handlers::router(state.clone()).layer(cors);

    let addr = format!("0.0.0.0:{port}");
    info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await
        .context("server error")?;
    Ok(())
}
