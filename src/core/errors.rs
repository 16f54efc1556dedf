// src/core/errors.rs

//! Defines the primary error type for the proxy and its mapping onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use thiserror::Error;

/// The main error enum for the proxy. Using `thiserror` gives clean error
/// definitions and automatic `From` impls, and `Arc`-wrapping the non-`Clone`
/// variants lets the single-flight fetch share one error across every tailing
/// reader.
#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("upstream responded with status {0}")]
    UpstreamStatus(u16),

    #[error("upstream body size ({actual}) did not match Content-Length ({expected})")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("malformed or out-of-range Range header")]
    InvalidRange,

    #[error("key not found")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("client disconnected mid-stream")]
    ClientDisconnected,

    #[error("cache population aborted")]
    Aborted,
}

impl From<std::io::Error> for ProxyError {
    fn from(e: std::io::Error) -> Self {
        ProxyError::Io(Arc::new(e))
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            ProxyError::NotFound => StatusCode::NOT_FOUND,
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
            ProxyError::Upstream(_) | ProxyError::UpstreamStatus(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Io(_) | ProxyError::SizeMismatch { .. } | ProxyError::Aborted => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::ClientDisconnected => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
