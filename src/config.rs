// src/config.rs

//! Manages proxy configuration: loading from TOML, resolving defaults, and validation.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Configuration for the optional HTTPS listener. If `cert_file` and `key_file`
/// are both set, the listener serves HTTPS instead of plain HTTP.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
}

impl TlsConfig {
    pub fn is_enabled(&self) -> bool {
        self.cert_file.is_some() && self.key_file.is_some()
    }
}

/// Configuration for the optional Prometheus `/metrics` listener, run as a
/// second, separate HTTP server alongside the main proxy listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    9091
}

/// The fully resolved, validated proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// TCP bind address for the HTTP listener, e.g. `"0.0.0.0:8080"`.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Base URL prepended to every request path when fetching from origin. Required.
    pub upstream_url: String,

    /// Root directory under which cache shard directories and the index live.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Soft byte ceiling driving LRU eviction of completed cache entries.
    #[serde(default = "default_max_cache_size")]
    pub max_cache_size: u64,

    /// Sliding TTL applied to completed cache entries.
    #[serde(default = "default_cache_ttl", with = "humantime_serde")]
    pub default_cache_ttl: Duration,

    /// TTL applied to negatively-cached (404) keys.
    #[serde(default = "default_notfound_ttl", with = "humantime_serde")]
    pub notfound_cache_ttl: Duration,

    /// Maximum number of entries retained in the negative cache.
    #[serde(default = "default_negative_cache_capacity")]
    pub negative_cache_capacity: usize,

    /// Per-request deadline for the upstream fetch.
    #[serde(default = "default_upstream_timeout", with = "humantime_serde")]
    pub upstream_timeout: Duration,

    /// Overall ceiling on idle connections kept open to upstream.
    #[serde(default = "default_max_idle_conns")]
    pub max_idle_conns: usize,

    /// Idle connections kept open per upstream host.
    #[serde(default = "default_max_idle_conns_per_host")]
    pub max_idle_conns_per_host: usize,

    /// Interval between background index snapshot writes.
    #[serde(default = "default_index_save_interval", with = "humantime_serde")]
    pub index_save_interval: Duration,

    /// Seconds in-flight requests are given to finish before a forced shutdown.
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace_period: Duration,

    /// `tracing_subscriber::EnvFilter` directive string; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_cache_dir() -> String {
    "cache_data".to_string()
}
fn default_max_cache_size() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}
fn default_cache_ttl() -> Duration {
    Duration::from_secs(3600)
}
fn default_notfound_ttl() -> Duration {
    Duration::from_secs(60)
}
fn default_negative_cache_capacity() -> usize {
    10_000
}
fn default_upstream_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_max_idle_conns() -> usize {
    100
}
fn default_max_idle_conns_per_host() -> usize {
    10
}
fn default_index_save_interval() -> Duration {
    Duration::from_secs(300)
}
fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            upstream_url: String::new(),
            cache_dir: default_cache_dir(),
            max_cache_size: default_max_cache_size(),
            default_cache_ttl: default_cache_ttl(),
            notfound_cache_ttl: default_notfound_ttl(),
            negative_cache_capacity: default_negative_cache_capacity(),
            upstream_timeout: default_upstream_timeout(),
            max_idle_conns: default_max_idle_conns(),
            max_idle_conns_per_host: default_max_idle_conns_per_host(),
            index_save_interval: default_index_save_interval(),
            shutdown_grace_period: default_shutdown_grace(),
            log_level: default_log_level(),
            tls: TlsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Reads and parses a TOML config file, then validates the result.
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(std::path::Path::new(path)))
            .build()
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        let config: Config = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse config from '{path}'"))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for logical consistency.
    fn validate(&self) -> Result<()> {
        if self.upstream_url.trim().is_empty() {
            return Err(anyhow!("upstream_url cannot be empty"));
        }
        if self.max_cache_size == 0 {
            return Err(anyhow!("max_cache_size cannot be 0"));
        }
        if self.tls.cert_file.is_some() != self.tls.key_file.is_some() {
            return Err(anyhow!(
                "tls.cert_file and tls.key_file must both be set or both be unset"
            ));
        }
        if self.negative_cache_capacity == 0 {
            warn!("negative_cache_capacity is 0; 404 responses will never be negatively cached");
        }
        Ok(())
    }
}
