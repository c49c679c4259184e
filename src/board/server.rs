use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use super::api::{self, AppState, SharedState};
use super::db::BoardDb;
use super::fanout::spawn_mutation_pump;
use super::ws;
use crate::config::ShopConfig;

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// Prime the counter cache and the board snapshot.
///
/// Failures are logged; the caches fill lazily on first read anyway.
pub async fn warm_caches(state: &AppState) {
    if let Err(e) = state.counter.warm().await {
        tracing::warn!(error = %e, "counter cache warm-up failed");
    }
    match state.board_cache.get_snapshot().await {
        Ok(snapshot) => tracing::info!(
            version = snapshot.version,
            items = snapshot.item_count(),
            "warmed board cache"
        ),
        Err(e) => tracing::warn!(error = %e, "board cache warm-up failed"),
    }
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    state: SharedState,
    dev_mode: bool,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    warm_caches(&state).await;
    let pump = spawn_mutation_pump(Arc::clone(&state.hub), state.coordinator.subscribe());

    let mut app = build_router(state);
    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error");

    pump.abort();
    result
}

/// Start the shopflow server.
pub async fn start_server(config: ShopConfig) -> Result<()> {
    // Ensure parent directory exists for DB
    if let Some(parent) = config.store.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }

    let db = BoardDb::open(&config.store.path, config.lock_timeout())
        .context("Failed to initialize board database")?;
    let state = Arc::new(AppState::new(db, &config));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, db = %config.store.path.display(), "shopflow listening");

    serve(listener, state, config.server.dev_mode, shutdown_signal()).await?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
