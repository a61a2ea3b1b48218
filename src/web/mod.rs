//! HTTP gateway: WebSocket log stream, search API and the static front end.
pub mod api;
pub mod broadcast;

use std::path::Path;
use std::sync::Arc;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::info;

use crate::ring::RingReader;
use crate::store::StoreBackend;

pub use broadcast::StreamConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Tail of the broadcast log; each WebSocket client clones it.
    pub ring: RingReader,
    /// Read-only use: lookups and searches.
    pub store: Arc<StoreBackend>,
    pub stream: StreamConfig,
}

pub fn build_router(state: AppState, static_dir: impl AsRef<Path>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(broadcast::ws_handler))
        .route("/api/search", get(api::search))
        .route("/api/messages/{id}", get(api::get_message))
        .fallback_service(ServeDir::new(static_dir).append_index_html_on_directories(true))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /health`: liveness check.
async fn health_handler() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"status": "ok"}))
}

/// Serve `app` on `listener` until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    info!("web gateway listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
