//! Detection task lifecycle tools.

use std::sync::Arc;

use async_trait::async_trait;
use rmcp::ErrorData;
use rmcp::model::{CallToolResult, JsonObject, ToolAnnotations};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{AnomalyTool, format, non_empty, parse_args, positive, read_only};
use crate::upstream::types::{
    DatasourceType, DetectionLimits, DetectionTaskRequest, TaskState, TaskStatus,
};
use crate::upstream::{CallContext, VmAnomalyClient};

const DEFAULT_STEP: &str = "1s";
const DEFAULT_FIT_WINDOW: &str = "1d";
const DEFAULT_FIT_EVERY: &str = "1d";
const DEFAULT_THRESHOLD: f64 = 1.0;
const DEFAULT_LIST_LIMIT: u32 = 20;

/// Backend address without a trailing slash, used as the datasource fallback.
pub(crate) fn fallback_datasource(client: &VmAnomalyClient) -> String {
    client.base_url().as_str().trim_end_matches('/').to_string()
}

fn status_icon(state: TaskState) -> &'static str {
    match state {
        TaskState::Done => "✓",
        TaskState::Error => "✗",
        TaskState::Canceled => "⊘",
        _ => "⏳",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Create
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateTaskArgs {
    query: String,
    model_spec: JsonObject,
    #[serde(default)]
    step: Option<String>,
    #[serde(default)]
    fit_window: Option<String>,
    #[serde(default)]
    fit_every: Option<String>,
    #[serde(default)]
    start_infer_s: Option<f64>,
    #[serde(default)]
    end_infer_s: Option<f64>,
    #[serde(default)]
    infer_every: Option<String>,
    #[serde(default)]
    exact: bool,
    #[serde(default)]
    anomaly_threshold: Option<f64>,
    #[serde(default)]
    datasource_url: Option<String>,
    #[serde(default)]
    datasource_type: Option<DatasourceType>,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    pass_auth_headers: bool,
}

impl CreateTaskArgs {
    fn into_request(self, fallback_datasource: String) -> DetectionTaskRequest {
        DetectionTaskRequest {
            query: self.query,
            model_spec: self.model_spec,
            step: Some(non_empty(self.step).unwrap_or_else(|| DEFAULT_STEP.into())),
            fit_window: Some(
                non_empty(self.fit_window).unwrap_or_else(|| DEFAULT_FIT_WINDOW.into()),
            ),
            fit_every: Some(non_empty(self.fit_every).unwrap_or_else(|| DEFAULT_FIT_EVERY.into())),
            start_infer_s: self.start_infer_s,
            end_infer_s: self.end_infer_s,
            infer_every: non_empty(self.infer_every),
            exact: self.exact,
            anomaly_threshold: Some(positive(self.anomaly_threshold).unwrap_or(DEFAULT_THRESHOLD)),
            datasource_url: Some(non_empty(self.datasource_url).unwrap_or(fallback_datasource)),
            datasource_type: Some(self.datasource_type.unwrap_or_default()),
            tenant_id: non_empty(self.tenant_id),
            pass_auth_headers: self.pass_auth_headers,
        }
    }
}

#[derive(Debug)]
pub struct CreateDetectionTaskTool {
    client: Arc<VmAnomalyClient>,
}

impl CreateDetectionTaskTool {
    pub fn new(client: Arc<VmAnomalyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnomalyTool for CreateDetectionTaskTool {
    fn name(&self) -> &'static str {
        "vmanomaly_create_detection_task"
    }

    fn description(&self) -> &'static str {
        "Start a background anomaly detection task: fit a model on historical data and \
         produce anomaly scores for the inference range. Returns the task id to poll."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "MetricsQL (or LogsQL stats) query to analyze." },
                "model_spec": { "type": "object", "description": "Model specification, e.g. {\"class\": \"zscore\"}." },
                "step": { "type": "string", "description": "Query resolution (default '1s')." },
                "fit_window": { "type": "string", "description": "Training window (default '1d')." },
                "fit_every": { "type": "string", "description": "Retraining interval (default '1d')." },
                "start_infer_s": { "type": "number", "description": "Inference range start, unix seconds." },
                "end_infer_s": { "type": "number", "description": "Inference range end, unix seconds." },
                "infer_every": { "type": "string", "description": "Inference interval." },
                "exact": { "type": "boolean", "description": "Run in exact batch mode (default false)." },
                "anomaly_threshold": { "type": "number", "description": "Anomaly score threshold (default 1.0)." },
                "datasource_url": { "type": "string", "description": "Datasource URL (defaults to the vmanomaly address)." },
                "datasource_type": { "type": "string", "enum": ["vm", "vmlogs"], "description": "Datasource kind (default 'vm')." },
                "tenant_id": { "type": "string", "description": "Tenant for cluster setups." },
                "pass_auth_headers": { "type": "boolean", "description": "Forward the caller's Authorization header to the datasource." }
            },
            "required": ["query", "model_spec"]
        })
    }

    async fn call(&self, ctx: CallContext, args: JsonObject) -> Result<CallToolResult, ErrorData> {
        let args: CreateTaskArgs = parse_args(args)?;
        let request = args.into_request(fallback_datasource(&self.client));
        Ok(match self.client.create_detection_task(&ctx, &request).await {
            Ok(created) => format::text(format!(
                "Detection task created.\n\nTask ID: {}\nStatus: {}\n\nUse vmanomaly_get_task_status to follow progress.",
                created.task_id,
                created.status.as_str()
            )),
            Err(e) => format::upstream_error("create detection task", &e),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status, list, cancel
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TaskIdArgs {
    task_id: String,
}

#[derive(Debug)]
pub struct TaskStatusTool {
    client: Arc<VmAnomalyClient>,
}

impl TaskStatusTool {
    pub fn new(client: Arc<VmAnomalyClient>) -> Self {
        Self { client }
    }
}

fn render_status(status: &TaskStatus) -> String {
    let mut out = format!(
        "{} Task {}\nStatus: {}\nProgress: {}%",
        status_icon(status.status),
        status.task_id,
        status.status.as_str(),
        status.progress
    );
    if !status.message.is_empty() {
        out.push_str(&format!("\nMessage: {}", status.message));
    }
    if let Some(updated) = &status.updated_at {
        out.push_str(&format!("\nUpdated: {updated}"));
    }
    if !status.metrics.is_empty() {
        out.push_str(&format!("\n\nMetrics:\n{}", format::pretty(&status.metrics)));
    }
    out
}

#[async_trait]
impl AnomalyTool for TaskStatusTool {
    fn name(&self) -> &'static str {
        "vmanomaly_get_task_status"
    }

    fn description(&self) -> &'static str {
        "Get status, progress and metrics of a detection task."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "string", "description": "Task id returned at creation." }
            },
            "required": ["task_id"]
        })
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        read_only()
    }

    async fn call(&self, ctx: CallContext, args: JsonObject) -> Result<CallToolResult, ErrorData> {
        let args: TaskIdArgs = parse_args(args)?;
        Ok(match self.client.task_status(&ctx, &args.task_id).await {
            Ok(status) => format::text(render_status(&status)),
            Err(e) => format::upstream_error(&format!("get status of task {}", args.task_id), &e),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ListTasksArgs {
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug)]
pub struct ListTasksTool {
    client: Arc<VmAnomalyClient>,
}

impl ListTasksTool {
    pub fn new(client: Arc<VmAnomalyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnomalyTool for ListTasksTool {
    fn name(&self) -> &'static str {
        "vmanomaly_list_tasks"
    }

    fn description(&self) -> &'static str {
        "List recent detection tasks, optionally filtered by status."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "description": "Maximum number of tasks (default 20)." },
                "status": {
                    "type": "string",
                    "enum": ["pending", "running", "done", "error", "canceled"],
                    "description": "Only return tasks in this state."
                }
            }
        })
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        read_only()
    }

    async fn call(&self, ctx: CallContext, args: JsonObject) -> Result<CallToolResult, ErrorData> {
        let args: ListTasksArgs = parse_args(args)?;
        let limit = args
            .limit
            .filter(|l| *l > 0)
            .map_or(DEFAULT_LIST_LIMIT, |l| u32::try_from(l).unwrap_or(u32::MAX));
        let status = match non_empty(args.status) {
            Some(raw) => Some(
                raw.parse::<TaskState>()
                    .map_err(|e| ErrorData::invalid_params(e, None))?,
            ),
            None => None,
        };

        Ok(match self.client.list_tasks(&ctx, limit, status).await {
            Ok(tasks) => format::titled_json(
                &format!("Anomaly Detection Tasks (found {}):", tasks.len()),
                &tasks,
            ),
            Err(e) => format::upstream_error("list tasks", &e),
        })
    }
}

#[derive(Debug)]
pub struct CancelTaskTool {
    client: Arc<VmAnomalyClient>,
}

impl CancelTaskTool {
    pub fn new(client: Arc<VmAnomalyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnomalyTool for CancelTaskTool {
    fn name(&self) -> &'static str {
        "vmanomaly_cancel_task"
    }

    fn description(&self) -> &'static str {
        "Cancel a pending or running detection task."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "string", "description": "Task id to cancel." }
            },
            "required": ["task_id"]
        })
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        Some(
            ToolAnnotations::new()
                .read_only(false)
                .destructive(true)
                .idempotent(true)
                .open_world(false),
        )
    }

    async fn call(&self, ctx: CallContext, args: JsonObject) -> Result<CallToolResult, ErrorData> {
        let args: TaskIdArgs = parse_args(args)?;
        Ok(match self.client.cancel_task(&ctx, &args.task_id).await {
            Ok(result) if result.canceled => {
                format::text(format!("Task {} canceled.", args.task_id))
            }
            Ok(_) => format::text(format!(
                "Task {} was not canceled (it may have already finished).",
                args.task_id
            )),
            Err(e) => format::upstream_error(&format!("cancel task {}", args.task_id), &e),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capacity
// ─────────────────────────────────────────────────────────────────────────────

fn render_limits(limits: &DetectionLimits) -> String {
    format!(
        "Detection Limits:\n\n{}\n\nCapacity Usage: {}% ({}/{} tasks running)",
        format::pretty(limits),
        limits.usage_percent(),
        limits.running,
        limits.max_concurrent
    )
}

#[derive(Debug)]
pub struct DetectionLimitsTool {
    client: Arc<VmAnomalyClient>,
}

impl DetectionLimitsTool {
    pub fn new(client: Arc<VmAnomalyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnomalyTool for DetectionLimitsTool {
    fn name(&self) -> &'static str {
        "vmanomaly_get_detection_limits"
    }

    fn description(&self) -> &'static str {
        "Get the maximum number of concurrent detection tasks and how many slots are free."
    }

    fn schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        read_only()
    }

    async fn call(&self, ctx: CallContext, _args: JsonObject) -> Result<CallToolResult, ErrorData> {
        Ok(match self.client.detection_limits(&ctx).await {
            Ok(limits) => format::text(render_limits(&limits)),
            Err(e) => format::upstream_error("get detection limits", &e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_task_injects_defaults() {
        let args: CreateTaskArgs =
            serde_json::from_value(json!({"query": "up", "model_spec": {"class": "zscore"}}))
                .unwrap();
        let request = args.into_request("http://vmanomaly:8490".into());

        assert_eq!(request.step.as_deref(), Some("1s"));
        assert_eq!(request.fit_window.as_deref(), Some("1d"));
        assert_eq!(request.fit_every.as_deref(), Some("1d"));
        assert_eq!(request.anomaly_threshold, Some(1.0));
        assert_eq!(request.datasource_type, Some(DatasourceType::Metrics));
        assert_eq!(request.datasource_url.as_deref(), Some("http://vmanomaly:8490"));
        assert!(request.start_infer_s.is_none());
        assert!(!request.exact);
    }

    #[test]
    fn test_create_task_keeps_explicit_values() {
        let args: CreateTaskArgs = serde_json::from_value(json!({
            "query": "rate(x[5m])",
            "model_spec": {"class": "prophet"},
            "step": "30s",
            "anomaly_threshold": 2.5,
            "datasource_type": "vmlogs",
            "datasource_url": "http://vl:9428",
            "start_infer_s": 0.0
        }))
        .unwrap();
        let request = args.into_request("http://unused".into());

        assert_eq!(request.step.as_deref(), Some("30s"));
        assert_eq!(request.anomaly_threshold, Some(2.5));
        assert_eq!(request.datasource_type, Some(DatasourceType::Logs));
        assert_eq!(request.datasource_url.as_deref(), Some("http://vl:9428"));
        assert_eq!(request.start_infer_s, Some(0.0));
    }

    #[test]
    fn test_non_positive_threshold_falls_back() {
        let args: CreateTaskArgs = serde_json::from_value(json!({
            "query": "up",
            "model_spec": {},
            "anomaly_threshold": 0
        }))
        .unwrap();
        assert_eq!(args.into_request(String::new()).anomaly_threshold, Some(1.0));
    }

    #[test]
    fn test_render_limits_truncates_percentage() {
        let limits = DetectionLimits {
            max_concurrent: 3,
            running: 2,
            available: 1,
        };
        assert!(render_limits(&limits).ends_with("Capacity Usage: 66% (2/3 tasks running)"));
    }

    #[test]
    fn test_render_status_icons() {
        let status: TaskStatus = serde_json::from_value(json!({
            "task_id": "t1",
            "status": "canceled",
            "progress": 40,
            "message": "stopped by user"
        }))
        .unwrap();
        let rendered = render_status(&status);
        assert!(rendered.starts_with("⊘ Task t1"));
        assert!(rendered.contains("Progress: 40%"));
        assert!(!rendered.contains("Metrics:"));
    }
}
