use anyhow::Context;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;

async fn health() -> &'static str {
    "OK"
}

/// Liveness check for container platforms
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

/// Serve the health route on all interfaces until the task is dropped
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind health server to {}", addr))?;
    serve_on(listener).await
}

pub async fn serve_on(listener: TcpListener) -> anyhow::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("🩺 Health check listening on http://{}/health", addr);
    }
    axum::serve(listener, router())
        .await
        .context("Health server stopped")
}
