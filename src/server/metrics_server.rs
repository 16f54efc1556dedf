// src/server/metrics_server.rs

use crate::core::metrics::gather_metrics;
use crate::server::context::AppState;
use axum::{Router, http::StatusCode, response::IntoResponse, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Handles HTTP requests to the `/metrics` endpoint, refreshing the occupancy
/// gauges from the live cache state before gathering all registered metrics.
async fn metrics_handler(state: Arc<AppState>) -> impl IntoResponse {
    let stats = state.fetch.cache.stats();
    crate::core::metrics::CACHE_ENTRIES.set(stats.file_entries as f64);
    crate::core::metrics::CACHE_SIZE_BYTES.set(stats.total_size as f64);
    crate::core::metrics::PENDING_FETCHES.set(stats.pending as f64);

    let body = gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Runs a small, separate HTTP server exposing Prometheus metrics on `/metrics`.
pub async fn run(state: Arc<AppState>, mut shutdown_rx: broadcast::Receiver<()>) {
    let port = state.config.metrics.port;
    let app = Router::new().route("/metrics", get(move || metrics_handler(state.clone())));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Prometheus metrics server listening on http://{}/metrics", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server on port {}: {}", port, e);
            return;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("Metrics server shutting down.");
        })
        .await
        .unwrap();
}
