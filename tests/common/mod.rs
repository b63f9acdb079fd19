//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use forward_proxy::config::ProxyConfig;
use forward_proxy::http::{AppState, HttpServer};
use forward_proxy::lifecycle::Shutdown;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// A request as seen by the mock upstream.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: Method,
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub type Captured = Arc<Mutex<Vec<CapturedRequest>>>;

/// A running mock upstream.
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub captured: Captured,
}

impl MockUpstream {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.captured.lock().unwrap().clone()
    }

    pub fn last(&self) -> CapturedRequest {
        self.requests().pop().expect("upstream saw no request")
    }
}

/// Start an axum upstream imitating a small REST service.
///
/// Routes:
/// - `GET  /geostore/rest/users`       → 200 text/xml
/// - `POST /geostore/rest/resources`   → 201 text/xml or application/json
/// - `PUT|DELETE /geostore/rest/resources/5` → 200
/// - `*    /echo`                      → 200, echoes body and content type
/// - `GET  /redirect`                  → 302 to /geostore/rest/users
/// - `GET  /large?size=N`              → N bytes, streamed in 8 KiB chunks
/// - `GET  /slow`                      → 200 after one second
pub async fn start_mock_upstream() -> MockUpstream {
    let captured: Captured = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/{*path}", any(upstream_handler))
        .with_state(captured.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockUpstream { addr, captured }
}

async fn upstream_handler(State(captured): State<Captured>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();

    captured.lock().unwrap().push(CapturedRequest {
        method: parts.method.clone(),
        path_and_query,
        headers: parts.headers.clone(),
        body: body.clone(),
    });

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    match (parts.method, parts.uri.path()) {
        (Method::GET, "/geostore/rest/users") => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/xml")],
            "<response>Some content</response>",
        )
            .into_response(),
        (Method::POST, "/geostore/rest/resources") if content_type.starts_with("application/json") => (
            StatusCode::CREATED,
            [(header::CONTENT_TYPE, "application/json")],
            r#"{"id":5}"#,
        )
            .into_response(),
        (Method::POST, "/geostore/rest/resources") => (
            StatusCode::CREATED,
            [(header::CONTENT_TYPE, "text/xml")],
            "<response>5</response>",
        )
            .into_response(),
        (Method::PUT, "/geostore/rest/resources/5") | (Method::DELETE, "/geostore/rest/resources/5") => {
            StatusCode::OK.into_response()
        }
        (_, "/echo") => (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response(),
        (Method::GET, "/redirect") => (
            StatusCode::FOUND,
            [(header::LOCATION, "/geostore/rest/users")],
        )
            .into_response(),
        (Method::GET, "/large") => {
            let size: usize = parts
                .uri
                .query()
                .and_then(|q| q.strip_prefix("size="))
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let chunks: Vec<Result<Bytes, std::io::Error>> = pattern(size)
                .chunks(8192)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            Body::from_stream(futures_util::stream::iter(chunks)).into_response()
        }
        (Method::GET, "/slow") => {
            tokio::time::sleep(Duration::from_secs(1)).await;
            (StatusCode::OK, "slow").into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Deterministic test payload.
pub fn pattern(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// An address nothing listens on.
pub async fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Upstream that accepts and reads but never answers.
pub async fn start_silent_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                while let Ok(n) = socket.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// Upstream that answers every connection with bytes that are not HTTP.
pub async fn start_garbage_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(b"SSH-2.0-OpenSSH_9.6\r\n\r\n").await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Upstream that answers 413 as soon as it has the request head and never
/// reads the request body.
pub async fn start_early_reject_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = socket
                    .write_all(b"HTTP/1.1 413 Payload Too Large\r\nContent-Length: 4\r\n\r\nbig!")
                    .await;
                tokio::time::sleep(Duration::from_secs(60)).await;
                drop(socket);
            });
        }
    });
    addr
}

/// Poll the pool until no connection to any origin is checked out.
pub async fn wait_until_released(proxy: &TestProxy) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while proxy.state.pool.stats().iter().any(|s| s.in_use > 0) {
        assert!(tokio::time::Instant::now() < deadline, "connection never released");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Config for tests: loopback upstreams allowed.
pub fn test_config() -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.target_policy.deny_private_addresses = false;
    config
}

/// A proxy running on an ephemeral port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub state: AppState,
    pub shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, target: &str) -> String {
        format!("http://{}/http_proxy/proxy?url={}", self.addr, target)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_proxy(config: ProxyConfig) -> TestProxy {
    let shutdown = Shutdown::new();
    let (_, config_updates) = mpsc::unbounded_channel();
    let server = HttpServer::new(config).unwrap();
    let state = server.state().clone();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    TestProxy { addr, state, shutdown }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
