// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;

pub mod context;
mod initialization;
mod metrics_server;
pub mod router;
mod shutdown;

/// The main server startup function: builds state, binds the listener, and
/// runs until a graceful shutdown completes.
pub async fn run(config: Config) -> Result<()> {
    initialization::run(config).await
}
