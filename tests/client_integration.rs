mod common;

use std::time::Duration;

use axum::{Json, Router};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::routing::{get, post};
use common::MockBackend;
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vmanomaly_mcp::config::parse_headers;
use vmanomaly_mcp::upstream::types::{DetectionTaskRequest, TaskState};
use vmanomaly_mcp::upstream::{
    CallContext, ClientConfig, NetworkFailure, UpstreamError, VmAnomalyClient,
};

fn client(url: &str) -> VmAnomalyClient {
    VmAnomalyClient::new(ClientConfig::new(url).unwrap())
}

async fn slow() -> Json<serde_json::Value> {
    tokio::time::sleep(Duration::from_secs(10)).await;
    Json(json!({}))
}

#[tokio::test]
async fn test_success_decodes_body() {
    let backend = MockBackend::start(
        Router::new().route("/api/v1/models", get(|| async { Json(json!({"models": ["zscore", "prophet"]})) })),
    )
    .await;

    let models = client(&backend.url).list_models(&CallContext::new()).await.unwrap();
    assert_eq!(models, vec!["zscore", "prophet"]);

    let request = backend.last();
    assert_eq!(request.method, "GET");
    assert_eq!(request.path, "/api/v1/models");
}

#[tokio::test]
async fn test_base_path_is_preserved() {
    let backend = MockBackend::start(
        Router::new().route("/prefix/health", get(|| async { Json(json!({"status": "ok"})) })),
    )
    .await;

    let health = client(&format!("{}/prefix/", backend.url))
        .health(&CallContext::new())
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
}

#[tokio::test]
async fn test_non_success_status_keeps_body() {
    let backend = MockBackend::start(Router::new().route(
        "/api/v1/model/schema",
        get(|| async { (StatusCode::NOT_FOUND, "unknown model class 'bogus'") }),
    ))
    .await;

    let err = client(&backend.url)
        .model_schema(&CallContext::new(), "bogus")
        .await
        .unwrap_err();

    match err {
        UpstreamError::Status { status, body } => {
            assert_eq!(status, 404);
            assert_eq!(body, "unknown model class 'bogus'");
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert_eq!(backend.last().query.as_deref(), Some("model_class=bogus"));
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let backend = MockBackend::start(
        Router::new().route("/api/v1/anomaly_detection/limits", get(|| async { "not json" })),
    )
    .await;

    let err = client(&backend.url)
        .detection_limits(&CallContext::new())
        .await
        .unwrap_err();
    match err {
        UpstreamError::Decode { body, .. } => assert_eq!(body, "not json"),
        other => panic!("expected decode error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unreachable_backend_is_network_error() {
    // Bind and drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{addr}"))
        .health(&CallContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, UpstreamError::Network(NetworkFailure::Transport(_))));
    assert_eq!(err.kind(), "network");
}

#[tokio::test]
async fn test_cancellation_returns_promptly() {
    let backend = MockBackend::start(Router::new().route("/health", get(slow))).await;
    let client = client(&backend.url);

    let token = CancellationToken::new();
    let ctx = CallContext::with_cancellation(token.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    let started = Instant::now();
    let err = client.health(&ctx).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_caller_deadline_is_cancellation() {
    let backend = MockBackend::start(Router::new().route("/health", get(slow))).await;

    let ctx = CallContext::new().with_timeout(Duration::from_millis(100));
    let err = client(&backend.url).health(&ctx).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Cancelled));
}

#[tokio::test]
async fn test_fixed_timeout_is_network_error() {
    let backend = MockBackend::start(Router::new().route("/health", get(slow))).await;
    let config = ClientConfig::new(&backend.url)
        .unwrap()
        .with_timeout(Duration::from_millis(100));

    let err = VmAnomalyClient::new(config)
        .health(&CallContext::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UpstreamError::Network(NetworkFailure::TimedOut(timeout)) if timeout == Duration::from_millis(100)
    ));
}

#[tokio::test]
async fn test_configured_credentials_are_sent() {
    let backend = MockBackend::start(
        Router::new().route("/api/v1/models", get(|| async { Json(json!({"models": []})) })),
    )
    .await;
    let config = ClientConfig::new(&backend.url)
        .unwrap()
        .with_bearer_token(Some("configured".into()))
        .with_headers(parse_headers("X-Org=acme").unwrap());

    VmAnomalyClient::new(config)
        .list_models(&CallContext::new())
        .await
        .unwrap();

    let request = backend.last();
    assert_eq!(request.header("authorization"), Some("Bearer configured"));
    assert_eq!(request.header("x-org"), Some("acme"));
}

#[tokio::test]
async fn test_forwarded_authorization_replaces_configured_token() {
    let backend = MockBackend::start(Router::new().route(
        "/api/v1/anomaly_detection/tasks",
        post(|| async { Json(json!({"task_id": "t-1", "status": "pending"})) }),
    ))
    .await;
    let mut headers = HeaderMap::new();
    headers.insert("x-org", HeaderValue::from_static("acme"));
    let client = VmAnomalyClient::new(
        ClientConfig::new(&backend.url)
            .unwrap()
            .with_bearer_token(Some("configured".into()))
            .with_headers(headers),
    );
    let ctx = CallContext::new()
        .with_inbound_authorization(Some(HeaderValue::from_static("Bearer session-token")));

    let mut request = DetectionTaskRequest {
        query: "up".into(),
        pass_auth_headers: true,
        ..Default::default()
    };
    let created = client.create_detection_task(&ctx, &request).await.unwrap();
    assert_eq!(created.task_id, "t-1");
    assert_eq!(created.status, TaskState::Pending);
    let forwarded = backend.last();
    assert_eq!(forwarded.header("authorization"), Some("Bearer session-token"));
    assert_eq!(forwarded.header("x-org"), Some("acme"));
    assert!(forwarded.json().get("pass_auth_headers").is_none());

    request.pass_auth_headers = false;
    client.create_detection_task(&ctx, &request).await.unwrap();
    assert_eq!(backend.last().header("authorization"), Some("Bearer configured"));
}

#[tokio::test]
async fn test_task_endpoints() {
    let backend = MockBackend::start(
        Router::new()
            .route(
                "/api/v1/anomaly_detection/tasks",
                get(|| async { Json(json!({"tasks": []})) }),
            )
            .route(
                "/api/v1/anomaly_detection/tasks/{id}",
                get(|| async {
                    Json(json!({"task_id": "a/b", "status": "running", "progress": 40}))
                })
                .delete(|| async { (StatusCode::CONFLICT, "task already finished") }),
            ),
    )
    .await;
    let client = client(&backend.url);
    let ctx = CallContext::new();

    let tasks = client.list_tasks(&ctx, 20, Some(TaskState::Running)).await.unwrap();
    assert!(tasks.is_empty());
    assert_eq!(backend.last().query.as_deref(), Some("limit=20&status=running"));

    let status = client.task_status(&ctx, "a/b").await.unwrap();
    assert_eq!(status.progress, 40);
    assert_eq!(backend.last().path, "/api/v1/anomaly_detection/tasks/a%2Fb");

    let err = client.cancel_task(&ctx, "a/b").await.unwrap_err();
    assert_eq!(err.status(), Some(409));
}

#[tokio::test]
async fn test_limits_are_idempotent() {
    let backend = MockBackend::start(Router::new().route(
        "/api/v1/anomaly_detection/limits",
        get(|| async { Json(json!({"max_concurrent": 4, "running": 1, "available": 3})) }),
    ))
    .await;
    let client = client(&backend.url);
    let ctx = CallContext::new();

    let first = client.detection_limits(&ctx).await.unwrap();
    let second = client.detection_limits(&ctx).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.usage_percent(), 25);
    assert_eq!(backend.requests().len(), 2);
}
