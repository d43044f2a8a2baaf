mod config;
mod protocol;
mod session;

use crate::config::Config;
use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{State, ws::WebSocketUpgrade},
    response::Response,
    routing::get,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
}

/// Accepts the upgrade and mounts a fresh interview on the socket.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| session::run(socket, state.config))
}

async fn health() -> &'static str {
    "ok"
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("Cannot listen for Ctrl-C");
    }
    info!("Received Ctrl-C, shutting down...");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load application configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.service.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    // The overlay is injected into third-party pages, so any origin may connect.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let bind_address = config.bind_address;
    let state = AppState {
        config: Arc::new(config),
    };
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(state)
        .layer(cors);

    info!("Starting WebSocket server, listening on {}", bind_address);
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
