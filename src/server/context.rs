// src/server/context.rs

//! Shared application state constructed once at startup and handed to every
//! connection handler via an `Arc`.

use crate::config::Config;
use crate::core::cache::CacheStore;
use crate::core::fetcher::FetchContext;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

pub struct AppState {
    pub config: Config,
    pub fetch: FetchContext,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let cache = Arc::new(CacheStore::new(
            std::path::PathBuf::from(&config.cache_dir),
            config.max_cache_size,
            config.default_cache_ttl,
            config.negative_cache_capacity,
            config.notfound_cache_ttl,
        ));
        cache.load_from_disk().await;

        // reqwest exposes a per-host idle cap but no separate overall ceiling;
        // `max_idle_conns` is accepted for configuration-surface parity but the
        // per-host figure is what actually bounds the pool.
        let client = reqwest::Client::builder()
            .timeout(config.upstream_timeout)
            .pool_max_idle_per_host(config.max_idle_conns_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("failed to build upstream HTTP client")?;

        let fetch = FetchContext {
            cache,
            client,
            upstream_base: config.upstream_url.clone(),
        };

        Ok(Arc::new(Self { config, fetch }))
    }
}
