// src/server/initialization.rs

//! Builds the `AppState`, binds the listener (plain or TLS), and wires up the
//! index-save timer and optional metrics server.

use crate::config::Config;
use crate::server::context::AppState;
use crate::server::{metrics_server, router, shutdown};
use anyhow::{Context, Result};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

/// Runs the proxy to completion: binds the listener, serves requests, and
/// blocks until a graceful shutdown finishes.
pub async fn run(config: Config) -> Result<()> {
    let state = AppState::new(config).await?;
    let index_save_timer = spawn_index_save_timer(Arc::clone(&state));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    if state.config.metrics.enabled {
        let metrics_rx = shutdown_tx.subscribe();
        let metrics_state = Arc::clone(&state);
        tokio::spawn(async move {
            metrics_server::run(metrics_state, metrics_rx).await;
        });
    }

    let addr: SocketAddr = state
        .config
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen_addr '{}'", state.config.listen_addr))?;

    let app = router::build(Arc::clone(&state));
    let handle = Handle::new();
    let grace_period = state.config.shutdown_grace_period;

    let shutdown_handle = handle.clone();
    let shutdown_state = Arc::clone(&state);
    let shutdown_broadcast = shutdown_tx.clone();
    tokio::spawn(async move {
        shutdown::await_shutdown_signal().await;
        shutdown_broadcast.send(()).ok();
        shutdown_handle.graceful_shutdown(Some(grace_period));
        // Give in-flight requests a matching window to finish before the
        // store is closed out from under them.
        tokio::time::sleep(Duration::from_secs(1)).await;
        // Stop the periodic save loop before the final save below, so it
        // can't race a second write against the one we're about to do.
        index_save_timer.abort();
        // Closes the CacheStore: aborts every remaining pending
        // StreamingFile writer (unlinking its partial file and waking any
        // tailing readers with an error) and writes a final index snapshot.
        shutdown_state.fetch.cache.shutdown().await;
    });

    if state.config.tls.is_enabled() {
        let cert_path = state.config.tls.cert_file.clone().unwrap();
        let key_path = state.config.tls.key_file.clone().unwrap();
        let tls_config = RustlsConfig::from_pem_file(&cert_path, &key_path)
            .await
            .context("failed to load TLS certificate/key")?;
        info!(%addr, "listening (TLS)");
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("server error")?;
    } else {
        info!(%addr, "listening");
        axum_server::bind(addr)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("server error")?;
    }

    info!("shutdown complete");
    Ok(())
}

fn spawn_index_save_timer(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    let interval = state.config.index_save_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            state.fetch.cache.save_to_disk().await;
        }
    })
}
