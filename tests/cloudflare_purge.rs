use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::post,
};
use cache_cascade::cascade::{Invalidator, InvalidatorError};
use cache_cascade::invalidators::{CloudflareConfig, CloudflareInvalidator};
use serde_json::{Value, json};

#[derive(Debug, Clone)]
struct Captured {
    zone: String,
    authorization: Option<String>,
    body: Value,
}

#[derive(Clone)]
struct Mock {
    status: StatusCode,
    reply: Value,
    delay: Duration,
    captured: Arc<Mutex<Vec<Captured>>>,
}

async fn purge(
    State(mock): State<Mock>,
    Path(zone): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    mock.captured.lock().unwrap().push(Captured {
        zone,
        authorization: headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        body,
    });
    tokio::time::sleep(mock.delay).await;
    (mock.status, Json(mock.reply.clone())).into_response()
}

async fn spawn_mock(status: StatusCode, reply: Value) -> (SocketAddr, Arc<Mutex<Vec<Captured>>>) {
    spawn_slow_mock(status, reply, Duration::ZERO).await
}

async fn spawn_slow_mock(
    status: StatusCode,
    reply: Value,
    delay: Duration,
) -> (SocketAddr, Arc<Mutex<Vec<Captured>>>) {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let mock = Mock {
        status,
        reply,
        delay,
        captured: captured.clone(),
    };
    let app = Router::new()
        .route("/client/v4/zones/{zone}/purge_cache", post(purge))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock listener");
    let addr = listener.local_addr().expect("mock address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock server");
    });
    (addr, captured)
}

fn invalidator(addr: SocketAddr) -> CloudflareInvalidator {
    CloudflareInvalidator::new(CloudflareConfig {
        api_token: Some("secret-token".to_string()),
        zone_id: Some("zone-123".to_string()),
        site_url: Some("https://example.com".to_string()),
        extra_hosts: vec!["static.example.com".to_string()],
        api_base: format!("http://{addr}/client/v4"),
    })
}

#[tokio::test]
async fn purge_posts_hosts_with_bearer_token() {
    let (addr, captured) = spawn_mock(
        StatusCode::OK,
        json!({ "success": true, "errors": [], "result": { "id": "zone-123" } }),
    )
    .await;

    invalidator(addr).flush().await.expect("purge succeeds");

    let captured = captured.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].zone, "zone-123");
    assert_eq!(
        captured[0].authorization.as_deref(),
        Some("Bearer secret-token")
    );
    assert_eq!(
        captured[0].body,
        json!({ "hosts": ["example.com", "www.example.com", "static.example.com"] })
    );
}

#[tokio::test]
async fn error_status_is_reported() {
    let (addr, _) = spawn_mock(
        StatusCode::FORBIDDEN,
        json!({ "success": false, "errors": [{ "code": 10000, "message": "Authentication error" }] }),
    )
    .await;

    let err = invalidator(addr).flush().await.expect_err("purge fails");
    match err {
        InvalidatorError::Status { status, body, .. } => {
            assert_eq!(status, 403);
            assert!(body.contains("Authentication error"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn unsuccessful_body_is_rejected() {
    let (addr, _) = spawn_mock(
        StatusCode::OK,
        json!({ "success": false, "errors": [{ "code": 1134, "message": "Hosts purge not allowed" }] }),
    )
    .await;

    let err = invalidator(addr).flush().await.expect_err("purge fails");
    assert!(matches!(err, InvalidatorError::Rejected { .. }));
    assert!(err.to_string().contains("Hosts purge not allowed (1134)"));
}

#[tokio::test]
async fn unreachable_api_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("reserve port");
    let addr = listener.local_addr().expect("reserved address");
    drop(listener);

    let err = invalidator(addr).flush().await.expect_err("purge fails");
    assert!(matches!(err, InvalidatorError::Transport { .. }));
}

#[tokio::test]
async fn slow_purge_is_awaited_to_completion() {
    let (addr, captured) = spawn_slow_mock(
        StatusCode::OK,
        json!({ "success": true, "errors": [] }),
        Duration::from_millis(1_500),
    )
    .await;

    invalidator(addr).flush().await.expect("slow purge still succeeds");
    assert_eq!(captured.lock().unwrap().len(), 1);
}
