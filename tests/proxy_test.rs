// tests/proxy_test.rs

//! End-to-end scenarios against a real listener, with the upstream origin
//! replaced by a `wiremock` mock server.

use cachepane::config::Config;
use cachepane::server::{context::AppState, router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn spawn_proxy(upstream: &MockServer, cache_dir: &std::path::Path) -> SocketAddr {
    let config = Config {
        listen_addr: "127.0.0.1:0".to_string(),
        upstream_url: upstream.uri(),
        cache_dir: cache_dir.to_string_lossy().to_string(),
        max_cache_size: 100 * 1024 * 1024,
        default_cache_ttl: Duration::from_secs(3600),
        notfound_cache_ttl: Duration::from_secs(5),
        negative_cache_capacity: 1000,
        upstream_timeout: Duration::from_secs(10),
        max_idle_conns: 50,
        max_idle_conns_per_host: 10,
        index_save_interval: Duration::from_secs(300),
        shutdown_grace_period: Duration::from_secs(5),
        log_level: "error".to_string(),
        tls: Default::default(),
        metrics: Default::default(),
    };

    let state = AppState::new(config).await.expect("state construction");
    let app = router::build(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    addr
}

#[tokio::test]
async fn cold_miss_then_warm_hit() {
    let upstream = MockServer::start().await;
    let body = vec![7u8; 1024];
    Mock::given(method("GET"))
        .and(path("/a.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body.clone())
                .insert_header("content-type", "application/octet-stream"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_proxy(&upstream, dir.path()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/a.bin"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers().get("x-cache").unwrap(), "MISS");
    let bytes = resp.bytes().await.unwrap();
    assert_eq!(bytes.as_ref(), body.as_slice());

    // Second request must be served without a further upstream call.
    let resp2 = client
        .get(format!("http://{addr}/a.bin"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp2.headers().get("x-cache").unwrap(), "HIT");
    let bytes2 = resp2.bytes().await.unwrap();
    assert_eq!(bytes2.as_ref(), body.as_slice());
}

#[tokio::test]
async fn negative_cache_avoids_repeat_upstream_calls() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&upstream)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_proxy(&upstream, dir.path()).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://{addr}/missing"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    let resp2 = client
        .get(format!("http://{addr}/missing"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp2.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn range_on_completed_entry() {
    let upstream = MockServer::start().await;
    let body: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    Mock::given(method("GET"))
        .and(path("/r.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&upstream)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_proxy(&upstream, dir.path()).await;
    let client = reqwest::Client::new();

    client
        .get(format!("http://{addr}/r.bin"))
        .send()
        .await
        .unwrap();

    let resp = client
        .get(format!("http://{addr}/r.bin"))
        .header("Range", "bytes=0-1023")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        resp.headers().get("content-range").unwrap(),
        "bytes 0-1023/4096"
    );
    let bytes = resp.bytes().await.unwrap();
    assert_eq!(bytes.as_ref(), &body[0..1024]);
}

#[tokio::test]
async fn concurrent_miss_coalesces_onto_one_upstream_request() {
    let upstream = MockServer::start().await;
    let body = vec![9u8; 5 * 1024 * 1024];
    Mock::given(method("GET"))
        .and(path("/b.bin"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .expect(1)
        .mount(&upstream)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_proxy(&upstream, dir.path()).await;
    let client = reqwest::Client::new();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let client = client.clone();
        let url = format!("http://{addr}/b.bin");
        handles.push(tokio::spawn(async move {
            let resp = client.get(url).send().await.unwrap();
            let cache_header = resp.headers().get("x-cache").unwrap().to_str().unwrap().to_string();
            let body = resp.bytes().await.unwrap();
            (cache_header, body)
        }));
    }

    let mut miss_count = 0;
    for h in handles {
        let (cache_header, got_body) = h.await.unwrap();
        assert_eq!(got_body.as_ref(), body.as_slice());
        if cache_header == "MISS" {
            miss_count += 1;
        } else {
            assert_eq!(cache_header, "STREAMING");
        }
    }
    assert_eq!(miss_count, 1);
}

#[tokio::test]
async fn method_not_allowed_for_non_get_head() {
    let upstream = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_proxy(&upstream, dir.path()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/anything"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn client_disconnect_mid_stream_clears_pending_entry() {
    // A slow, large upstream body lets us cancel the client request before
    // it finishes. The proxy must still notice (via the pending-fetch drop
    // guard) and clear the pending entry rather than leaving it stuck
    // forever for any future tailing reader.
    let upstream = MockServer::start().await;
    let body = vec![3u8; 16 * 1024 * 1024];
    Mock::given(method("GET"))
        .and(path("/slow.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body)
                .set_delay(Duration::from_millis(50)),
        )
        .mount(&upstream)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_proxy(&upstream, dir.path()).await;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(150))
        .build()
        .unwrap();

    let result = client
        .get(format!("http://{addr}/slow.bin"))
        .send()
        .await
        .and_then(|r| r.error_for_status());
    // Either the send times out, or it errors while reading the body; both
    // are fine, the point is the client never consumes the full stream.
    if let Ok(resp) = result {
        assert!(resp.bytes().await.is_err());
    }

    let plain_client = reqwest::Client::new();
    let mut pending_cleared = false;
    for _ in 0..50 {
        let stats: serde_json::Value = plain_client
            .get(format!("http://{addr}/stats"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if stats["pending"] == 0 {
            pending_cleared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(pending_cleared, "pending entry was never cleared after client disconnect");
}

#[tokio::test]
async fn health_and_stats_endpoints() {
    let upstream = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let addr = spawn_proxy(&upstream, dir.path()).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("http://{addr}/health")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let resp = client.get(format!("http://{addr}/stats")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["file_entries"], 0);
}
