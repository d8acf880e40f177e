mod common;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use common::MockBackend;
use rmcp::model::JsonObject;
use serde_json::{Value, json};
use vmanomaly_mcp::docs::EmbeddedDocs;
use vmanomaly_mcp::tools::format::text_of;
use vmanomaly_mcp::tools::{ToolPolicy, ToolRegistry};
use vmanomaly_mcp::upstream::{CallContext, ClientConfig, VmAnomalyClient};

fn registry(url: &str, denied: &[&str]) -> ToolRegistry {
    let client = Arc::new(VmAnomalyClient::new(ClientConfig::new(url).unwrap()));
    ToolRegistry::builtin(
        client,
        Arc::new(EmbeddedDocs::new()),
        ToolPolicy::new(denied.iter().copied()),
    )
}

fn args(value: Value) -> JsonObject {
    match value {
        Value::Object(map) => map,
        other => panic!("arguments must be an object, got {other}"),
    }
}

#[tokio::test]
async fn test_create_task_fills_defaults() {
    let backend = MockBackend::start(Router::new().route(
        "/api/v1/anomaly_detection/tasks",
        post(|| async { Json(json!({"task_id": "task-42", "status": "pending"})) }),
    ))
    .await;
    let registry = registry(&backend.url, &[]);

    let result = registry
        .call(
            "vmanomaly_create_detection_task",
            CallContext::new(),
            args(json!({"query": "rate(http_requests_total[5m])", "model_spec": {"class": "zscore"}})),
        )
        .await
        .unwrap();

    assert_ne!(result.is_error, Some(true));
    assert!(text_of(&result).contains("task-42"));

    let body = backend.last().json();
    assert_eq!(body["query"], "rate(http_requests_total[5m])");
    assert_eq!(body["model_spec"], json!({"class": "zscore"}));
    assert_eq!(body["step"], "1s");
    assert_eq!(body["fit_window"], "1d");
    assert_eq!(body["fit_every"], "1d");
    assert_eq!(body["anomaly_threshold"], 1.0);
    assert_eq!(body["datasource_type"], "vm");
    assert_eq!(body["exact"], false);
    assert!(body["datasource_url"].as_str().unwrap().starts_with(&backend.url));
}

#[tokio::test]
async fn test_missing_required_argument_is_invalid_params() {
    let registry = registry("http://127.0.0.1:9", &[]);

    let err = registry
        .call(
            "vmanomaly_get_task_status",
            CallContext::new(),
            JsonObject::new(),
        )
        .await
        .unwrap_err();
    assert!(err.message.contains("task_id"));
}

#[tokio::test]
async fn test_empty_task_list_is_success() {
    let backend = MockBackend::start(Router::new().route(
        "/api/v1/anomaly_detection/tasks",
        get(|| async { Json(json!({"tasks": []})) }),
    ))
    .await;

    let result = registry(&backend.url, &[])
        .call("vmanomaly_list_tasks", CallContext::new(), JsonObject::new())
        .await
        .unwrap();

    assert_ne!(result.is_error, Some(true));
    assert!(text_of(&result).contains("found 0"));
    assert_eq!(backend.last().query.as_deref(), Some("limit=20"));
}

#[tokio::test]
async fn test_upstream_failure_is_error_result() {
    let backend = MockBackend::start(Router::new().route(
        "/api/v1/anomaly_detection/tasks/{id}",
        get(|| async { (axum::http::StatusCode::NOT_FOUND, "task not found") }),
    ))
    .await;

    let result = registry(&backend.url, &[])
        .call(
            "vmanomaly_get_task_status",
            CallContext::new(),
            args(json!({"task_id": "missing"})),
        )
        .await
        .unwrap();

    assert_eq!(result.is_error, Some(true));
    let text = text_of(&result);
    assert!(text.contains("404"));
    assert!(text.contains("task not found"));
}

#[tokio::test]
async fn test_denied_tool_is_hidden_and_rejected() {
    let backend = MockBackend::start(Router::new()).await;
    let registry = registry(&backend.url, &["vmanomaly_cancel_task"]);

    let names: Vec<String> = registry.list().into_iter().map(|t| t.name.to_string()).collect();
    assert_eq!(names.len(), 16);
    assert!(!names.iter().any(|n| n == "vmanomaly_cancel_task"));
    assert!(names.iter().any(|n| n == "vmanomaly_list_tasks"));

    let err = registry
        .call(
            "vmanomaly_cancel_task",
            CallContext::new(),
            args(json!({"task_id": "task-42"})),
        )
        .await
        .unwrap_err();
    assert!(err.message.contains("vmanomaly_cancel_task"));
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_compatibility_drop_everything() {
    let backend = MockBackend::start(Router::new().route(
        "/api/v1/compatibility",
        get(|| async {
            Json(json!({
                "runtime_version": "1.25.0",
                "stored_version": "1.18.0",
                "global_check": {
                    "has_state": true,
                    "is_compatible": false,
                    "drop_everything": true,
                    "reason": "state format changed"
                },
                "component_assessment": {
                    "models_to_purge": ["zscore_a"],
                    "should_purge_reader_data": true,
                    "issues": []
                }
            }))
        }),
    ))
    .await;

    let result = registry(&backend.url, &[])
        .call(
            "vmanomaly_check_compatibility",
            CallContext::new(),
            args(json!({"version_to": "1.25.0"})),
        )
        .await
        .unwrap();

    assert_ne!(result.is_error, Some(true));
    let structured = result.structured_content.expect("structured output");
    assert_eq!(structured["status"], "incompatible");
    assert_eq!(structured["drop_everything"], true);
    let summary = structured["summary"].as_str().unwrap();
    assert!(summary.contains("CRITICAL"));
    assert!(!summary.contains("purge models"));
    assert_eq!(backend.last().query.as_deref(), Some("version_to=1.25.0"));
}

#[tokio::test]
async fn test_search_docs_without_backend() {
    let registry = registry("http://127.0.0.1:9", &[]);

    let result = registry
        .call(
            "vmanomaly_search_docs",
            CallContext::new(),
            args(json!({"query": "qwxzyv"})),
        )
        .await
        .unwrap();
    assert_eq!(
        text_of(&result),
        "No documentation found for query: qwxzyv"
    );
}

#[tokio::test]
async fn test_alert_rule_is_fenced_yaml() -> anyhow::Result<()> {
    let backend = MockBackend::start(Router::new().route(
        "/api/vmalert/rule.yaml",
        get(|| async { "groups:\n  - name: anomaly\n" }),
    ))
    .await;

    let result = registry(&backend.url, &[])
        .call(
            "vmanomaly_generate_alert_rule",
            CallContext::new(),
            args(json!({"step": "1m", "query": "up", "anomaly_threshold": 1.5})),
        )
        .await?;

    let text = text_of(&result);
    assert!(text.contains("```yaml\ngroups:"));
    let query = backend.last().query.unwrap_or_default();
    assert!(query.contains("step=1m"));
    assert!(query.contains("anomaly_threshold=1.5"));
    Ok(())
}
