//! ML Peer - development remote process for the ML bridge
//!
//! A WebSocket server speaking the bridge wire protocol. It keeps a small
//! registry of named scripts, starts them on request and answers
//! `sendInput` requests by running the active script's target function.
//!
//! Routes:
//! - `GET /` and `GET /ws`: WebSocket upgrade
//! - `GET /health`: liveness check reporting uptime and connection count
//! - `GET /metrics`: Prometheus scrape endpoint

pub mod config;
pub mod connection;
pub mod metrics;
pub mod scripts;
pub mod state;
pub mod ws_handler;

pub use config::PeerConfig;
pub use scripts::{Script, ScriptRegistry};
pub use state::AppState;

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Build the HTTP router. The WebSocket routes read the client address, so
/// serve it with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler::ws_handler))
        .route("/ws", get(ws_handler::ws_handler))
        .route("/health", get(health))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the peer on an already bound listener until the task is dropped
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

/// Liveness check with uptime and connection count
async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.uptime_secs(),
        "connections": state.connection_count(),
    }))
}

/// Initialize tracing with standard configuration
pub fn init_tracing(service_name: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let crate_target = service_name.replace('-', "_");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{crate_target}=info,ml_bridge=info,tower_http=debug"))
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
