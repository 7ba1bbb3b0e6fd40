//! Health and stats HTTP surface.
//!
//! `GET /health` answers 200 while the process serves; `GET /stats`
//! returns the registry counters as JSON.

use super::service::ServerInner;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tracing::info;

/// Build the router (exposed for tests).
pub(crate) fn router(inner: Arc<ServerInner>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .with_state(inner)
}

async fn health() -> &'static str {
    "ok"
}

async fn stats(State(inner): State<Arc<ServerInner>>) -> Json<super::ServerStats> {
    Json(inner.stats())
}

/// Serve the HTTP surface until the process exits.
pub(crate) async fn serve_http_inner(
    inner: Arc<ServerInner>,
    addr: &str,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Health surface listening");
    axum::serve(listener, router(inner))
        .await
        .map_err(std::io::Error::other)
}

/// Public entry used by the bootstrap binary when it manages its own
/// HTTP lifecycle.
pub async fn serve_http(server: &super::BootstrapServer, addr: &str) -> std::io::Result<()> {
    serve_http_inner(server.inner_arc(), addr).await
}
