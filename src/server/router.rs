// src/server/router.rs

//! The client-facing HTTP surface: `/health`, `/stats`, and the catch-all
//! proxy route for everything else.

use crate::core::fetcher;
use crate::server::context::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;

pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", any(health_handler))
        .route("/stats", any(stats_handler))
        .fallback(proxy_handler)
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.fetch.cache.stats()))
}

async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let key = uri.path();
    let range_value = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());
    fetcher::dispatch(&state.fetch, &method, key, range_value).await
}
