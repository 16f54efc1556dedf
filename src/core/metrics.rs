// src/core/metrics.rs

//! Defines and registers Prometheus metrics for proxy monitoring.
//!
//! Uses `lazy_static` so metrics are registered exactly once for the process lifetime.

use lazy_static::lazy_static;
use prometheus::{Counter, Gauge, Histogram, TextEncoder, register_counter, register_gauge, register_histogram};

lazy_static! {
    /// Total number of requests served directly from the completed cache.
    pub static ref CACHE_HITS_TOTAL: Counter =
        register_counter!("cachepane_cache_hits_total", "Total number of cache hits.").unwrap();
    /// Total number of requests that required a fresh upstream fetch.
    pub static ref CACHE_MISSES_TOTAL: Counter =
        register_counter!("cachepane_cache_misses_total", "Total number of cache misses.").unwrap();
    /// Total number of requests served from the negative cache.
    pub static ref NEGATIVE_CACHE_HITS_TOTAL: Counter =
        register_counter!("cachepane_negative_cache_hits_total", "Total number of negative cache hits.").unwrap();
    /// Total number of entries evicted from the completed-entry LRU.
    pub static ref CACHE_EVICTIONS_TOTAL: Counter =
        register_counter!("cachepane_cache_evictions_total", "Total number of cache entries evicted.").unwrap();
    /// Total number of concurrent requests that coalesced onto an in-flight fetch
    /// instead of triggering a new upstream request.
    pub static ref SINGLE_FLIGHT_JOINS_TOTAL: Counter =
        register_counter!("cachepane_single_flight_joins_total", "Total number of requests that joined an in-flight fetch.").unwrap();
    /// Total number of upstream fetches that failed (network error or non-2xx/404 status).
    pub static ref UPSTREAM_ERRORS_TOTAL: Counter =
        register_counter!("cachepane_upstream_errors_total", "Total number of failed upstream fetches.").unwrap();

    /// Current number of completed entries held in the cache.
    pub static ref CACHE_ENTRIES: Gauge =
        register_gauge!("cachepane_cache_entries", "Number of entries currently held in the cache.").unwrap();
    /// Current total size in bytes of all completed cache entries on disk.
    pub static ref CACHE_SIZE_BYTES: Gauge =
        register_gauge!("cachepane_cache_size_bytes", "Total size in bytes of cached entries on disk.").unwrap();
    /// Current number of fetches in flight (pending, not yet completed).
    pub static ref PENDING_FETCHES: Gauge =
        register_gauge!("cachepane_pending_fetches", "Number of upstream fetches currently in flight.").unwrap();

    /// Latency of upstream fetches, from dispatch to response headers.
    pub static ref UPSTREAM_FETCH_LATENCY_SECONDS: Histogram =
        register_histogram!("cachepane_upstream_fetch_latency_seconds", "Latency of upstream fetches in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
