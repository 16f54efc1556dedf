// src/core/fetcher.rs

//! Per-request dispatch: resolve a key against the caches, drive the
//! single-flight upstream fetch on a miss, and stream the result back to
//! the client while simultaneously populating the cache.

use crate::core::cache::CacheStore;
use crate::core::errors::ProxyError;
use crate::core::metrics;
use crate::core::range;
use crate::core::streaming_file::StreamingFile;
use axum::body::Body;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tracing::{error, warn};

/// Size of the pooled buffer used for all body copies (file->response and
/// StreamingFile->response).
const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// The subset of shared state the fetcher needs: the cache, the upstream
/// HTTP client, and the configured upstream base URL.
pub struct FetchContext {
    pub cache: Arc<CacheStore>,
    pub client: reqwest::Client,
    pub upstream_base: String,
}

/// Entry point for a client request. Implements the request-level contract:
/// negative cache, completed-entry hit, pending tail, or fresh upstream fetch.
pub async fn dispatch(
    ctx: &FetchContext,
    method: &Method,
    key: &str,
    range_value: Option<&str>,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return ProxyError::MethodNotAllowed.into_response();
    }

    if ctx.cache.is_not_found(key) {
        metrics::NEGATIVE_CACHE_HITS_TOTAL.inc();
        return StatusCode::NOT_FOUND.into_response();
    }

    if let Some(entry) = ctx.cache.get(key) {
        match tokio::fs::metadata(&entry.file_path).await {
            Ok(meta) if meta.len() == entry.size => {
                metrics::CACHE_HITS_TOTAL.inc();
                return serve_completed(method, &entry, range_value).await;
            }
            _ => {
                warn!(key, "cache entry failed validation, evicting");
                ctx.cache.remove(key);
            }
        }
    }

    if let Some(sf) = ctx.cache.get_pending(key) {
        metrics::SINGLE_FLIGHT_JOINS_TOTAL.inc();
        return serve_pending(method, &sf).await;
    }

    metrics::CACHE_MISSES_TOTAL.inc();
    fetch_from_upstream(ctx, method, key).await
}

/// §4.4: serve a completed cache entry, honoring a `Range` header if present.
async fn serve_completed(
    method: &Method,
    entry: &crate::core::cache::CacheEntry,
    range_value: Option<&str>,
) -> Response {
    let content_type = entry.content_type.clone();

    match range::parse(range_value, entry.size) {
        Err(()) => {
            let mut resp = StatusCode::RANGE_NOT_SATISFIABLE.into_response();
            resp.headers_mut().insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes */{}", entry.size)).unwrap(),
            );
            resp
        }
        Ok(Some(r)) => {
            let mut builder = Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::ACCEPT_RANGES, "bytes")
                .header("X-Cache", "HIT")
                .header(header::CONTENT_LENGTH, r.len())
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", r.start, r.end, entry.size),
                );
            if *method == Method::HEAD {
                return builder.body(Body::empty()).unwrap();
            }
            let path = entry.file_path.clone();
            let start = r.start;
            let len = r.len();
            let stream = async_stream::stream! {
                match tokio::fs::File::open(&path).await {
                    Ok(mut file) => {
                        if let Err(e) = file.seek(SeekFrom::Start(start)).await {
                            yield Err(std::io::Error::other(e));
                            return;
                        }
                        let mut remaining = len;
                        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
                        while remaining > 0 {
                            let to_read = std::cmp::min(buf.len() as u64, remaining) as usize;
                            match file.read(&mut buf[..to_read]).await {
                                Ok(0) => break,
                                Ok(n) => {
                                    remaining -= n as u64;
                                    yield Ok::<_, std::io::Error>(bytes::Bytes::copy_from_slice(&buf[..n]));
                                }
                                Err(e) => {
                                    yield Err(e);
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => yield Err(e),
                }
            };
            builder.body(Body::from_stream(stream)).unwrap()
        }
        Ok(None) => {
            let mut builder = Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::ACCEPT_RANGES, "bytes")
                .header("X-Cache", "HIT")
                .header(header::CONTENT_LENGTH, entry.size);
            if *method == Method::HEAD {
                return builder.body(Body::empty()).unwrap();
            }
            let path = entry.file_path.clone();
            match tokio::fs::File::open(&path).await {
                Ok(file) => {
                    let reader_stream = tokio_util::io::ReaderStream::with_capacity(file, COPY_BUFFER_SIZE);
                    builder.body(Body::from_stream(reader_stream)).unwrap()
                }
                Err(e) => {
                    error!(error = %e, "failed to open cache file for completed entry");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
    }
}

/// §4.5: serve from an in-progress `StreamingFile`, tailing new bytes as
/// they arrive. `Content-Length` is never set; `Range` is ignored.
async fn serve_pending(method: &Method, sf: &Arc<StreamingFile>) -> Response {
    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::ACCEPT_RANGES, "bytes")
        .header("X-Cache", "STREAMING");

    if *method == Method::HEAD {
        return builder.body(Body::empty()).unwrap();
    }

    let sf = Arc::clone(sf);
    let stream = async_stream::stream! {
        let mut reader = match sf.new_reader().await {
            Ok(r) => r,
            Err(e) => {
                yield Err(std::io::Error::other(e));
                return;
            }
        };
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => yield Ok::<_, std::io::Error>(bytes::Bytes::copy_from_slice(&buf[..n])),
                Err(e) => {
                    yield Err(std::io::Error::other(e));
                    break;
                }
            }
        }
    };
    builder.body(Body::from_stream(stream)).unwrap()
}

/// §4.6: issue the upstream request and tee its body into both the client
/// response and the new `StreamingFile`, completing or failing the pending
/// entry based on the terminal disposition.
async fn fetch_from_upstream(ctx: &FetchContext, method: &Method, key: &str) -> Response {
    let url = format!("{}{}", ctx.upstream_base.trim_end_matches('/'), key);

    let timer = metrics::UPSTREAM_FETCH_LATENCY_SECONDS.start_timer();
    let upstream_resp = ctx.client.get(&url).send().await;
    timer.observe_duration();

    let upstream_resp = match upstream_resp {
        Ok(r) => r,
        Err(e) => {
            metrics::UPSTREAM_ERRORS_TOTAL.inc();
            error!(error = %e, key, "upstream request failed");
            return ProxyError::Upstream(e.to_string()).into_response();
        }
    };

    match upstream_resp.status() {
        StatusCode::NOT_FOUND => {
            ctx.cache.put_not_found(key);
            return StatusCode::NOT_FOUND.into_response();
        }
        StatusCode::OK => {}
        other => {
            metrics::UPSTREAM_ERRORS_TOTAL.inc();
            warn!(key, status = %other, "upstream returned unexpected status");
            return ProxyError::UpstreamStatus(other.as_u16()).into_response();
        }
    }

    let expected_size = upstream_resp.content_length();
    let content_type = upstream_resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let (sf, is_new) = match ctx.cache.get_or_create_pending(key).await {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, key, "failed to create pending cache entry");
            return e.into_response();
        }
    };

    if !is_new {
        // Another fetcher beat us to it; abandon our upstream response and
        // tail the winner's StreamingFile instead.
        drop(upstream_resp);
        return serve_pending(method, &sf).await;
    }

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.clone())
        .header(header::ACCEPT_RANGES, "bytes")
        .header("X-Cache", "MISS");
    if let Some(len) = expected_size {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }

    if *method == Method::HEAD {
        ctx.cache.fail_pending(key).await;
        return builder.body(Body::empty()).unwrap();
    }

    let sf_for_stream = Arc::clone(&sf);
    let cache = Arc::clone(&ctx.cache);
    let key_owned = key.to_string();
    let expected = expected_size;

    let stream = async_stream::stream! {
        // If the client disconnects mid-stream, axum drops this stream
        // without polling it to completion, so the code below never runs.
        // The guard's Drop still fires, aborting the pending entry so
        // tailing readers aren't left blocked forever.
        let guard = PendingFailGuard::new(Arc::clone(&cache), key_owned.clone());

        let mut body = upstream_resp.bytes_stream();
        let mut total_written: u64 = 0;
        let mut cache_write_failed = false;

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(std::io::Error::other(e));
                    return;
                }
            };
            if !cache_write_failed {
                if let Err(e) = sf_for_stream.write(&chunk).await {
                    warn!(error = %e, key = %key_owned, "cache write failed, continuing to serve client only");
                    cache_write_failed = true;
                }
            }
            total_written += chunk.len() as u64;
            yield Ok::<_, std::io::Error>(chunk);
        }

        if cache_write_failed {
            return;
        }
        if let Some(exp) = expected {
            if exp != total_written {
                warn!(key = %key_owned, expected = exp, actual = total_written, "upstream size mismatch");
                return;
            }
        }
        cache.complete_pending(&key_owned, total_written, content_type).await;
        guard.disarm();
    };

    builder.body(Body::from_stream(stream)).unwrap()
}

/// RAII guard that aborts a pending cache entry on drop unless disarmed.
/// Covers both early `return`s in the upstream-tee stream above and the
/// stream being dropped mid-poll (client disconnect), when no code past
/// the last `await` runs and only `Drop` impls fire.
struct PendingFailGuard {
    cache: Arc<CacheStore>,
    key: String,
    disarmed: bool,
}

impl PendingFailGuard {
    fn new(cache: Arc<CacheStore>, key: String) -> Self {
        Self {
            cache,
            key,
            disarmed: false,
        }
    }

    fn disarm(mut self) {
        self.disarmed = true;
    }
}

impl Drop for PendingFailGuard {
    fn drop(&mut self) {
        if self.disarmed {
            return;
        }
        let cache = Arc::clone(&self.cache);
        let key = std::mem::take(&mut self.key);
        tokio::spawn(async move {
            cache.fail_pending(&key).await;
        });
    }
}
