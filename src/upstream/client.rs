//! HTTP client for the vmanomaly API.

use std::fmt;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use super::context::CallContext;
use super::error::{BaseUrlError, NetworkFailure, UpstreamError};
use super::types::{
    AlertRuleRequest, CompatibilityReport, ConfigGenerationRequest, ConfigValidation,
    DetectionLimits, DetectionTaskRequest, JsonObject, ModelList, ModelValidation, QueryRequest,
    TaskCancellation, TaskCreated, TaskList, TaskState, TaskStatus,
};

/// Default upper bound for a single backend call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const TASKS_PATH: &str = "/api/v1/anomaly_detection/tasks";

/// Connection settings for [`VmAnomalyClient`]. Immutable once the client is built.
#[derive(Clone)]
pub struct ClientConfig {
    base_url: Url,
    bearer_token: Option<String>,
    headers: HeaderMap,
    timeout: Duration,
}

impl ClientConfig {
    /// Parse and validate the backend base address.
    pub fn new(base_url: &str) -> Result<Self, BaseUrlError> {
        let parsed = Url::parse(base_url.trim()).map_err(|source| BaseUrlError::Parse {
            url: base_url.to_string(),
            source,
        })?;
        if parsed.cannot_be_a_base() || !matches!(parsed.scheme(), "http" | "https") {
            return Err(BaseUrlError::Scheme(base_url.to_string()));
        }
        Ok(Self {
            base_url: parsed,
            bearer_token: None,
            headers: HeaderMap::new(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Empty tokens are treated as absent.
    #[must_use]
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer_token = token.filter(|t| !t.is_empty());
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn has_bearer_token(&self) -> bool {
        self.bearer_token.is_some()
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url.as_str())
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Which credentials a request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPolicy {
    /// Configured bearer token plus custom headers.
    Configured,
    /// Custom headers plus the inbound session's `Authorization`, if any.
    Forward,
}

impl AuthPolicy {
    fn forward_if(forward: bool) -> Self {
        if forward { Self::Forward } else { Self::Configured }
    }
}

/// One outbound call, built per request and consumed by the client.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    method: Method,
    path: &'static str,
    segment: Option<String>,
    query: Vec<(&'static str, String)>,
    body: Option<Value>,
    auth: AuthPolicy,
}

impl RequestSpec {
    fn new(method: Method, path: &'static str) -> Self {
        Self {
            method,
            path,
            segment: None,
            query: Vec::new(),
            body: None,
            auth: AuthPolicy::Configured,
        }
    }

    fn get(path: &'static str) -> Self {
        Self::new(Method::GET, path)
    }

    fn post(path: &'static str, body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::new(Method::POST, path)
        }
    }

    fn delete(path: &'static str) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Extra path segment, percent-encoded on the wire.
    fn segment(mut self, segment: &str) -> Self {
        self.segment = Some(segment.to_string());
        self
    }

    fn query(mut self, pairs: Vec<(&'static str, String)>) -> Self {
        self.query = pairs;
        self
    }

    fn auth(mut self, auth: AuthPolicy) -> Self {
        self.auth = auth;
        self
    }
}

/// Single point of outbound communication with vmanomaly.
///
/// Every method takes a [`CallContext`]; the effective deadline is the earlier
/// of the caller's deadline and the configured timeout. Failures are always
/// reported as [`UpstreamError`], never swallowed.
#[derive(Clone)]
pub struct VmAnomalyClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl fmt::Debug for VmAnomalyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmAnomalyClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl VmAnomalyClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Create a client with a custom reqwest client.
    pub fn with_http(config: ClientConfig, http: reqwest::Client) -> Self {
        Self { http, config }
    }

    pub fn base_url(&self) -> &Url {
        &self.config.base_url
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Service info
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn health(&self, ctx: &CallContext) -> Result<JsonObject, UpstreamError> {
        self.execute_json(ctx, RequestSpec::get("/health")).await
    }

    pub async fn build_info(&self, ctx: &CallContext) -> Result<JsonObject, UpstreamError> {
        self.execute_json(ctx, RequestSpec::get("/api/v1/status/buildinfo"))
            .await
    }

    /// Backend self-monitoring metrics in Prometheus text format.
    pub async fn metrics(&self, ctx: &CallContext) -> Result<String, UpstreamError> {
        self.execute(ctx, RequestSpec::get("/metrics")).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Models and configuration
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn list_models(&self, ctx: &CallContext) -> Result<Vec<String>, UpstreamError> {
        let list: ModelList = self
            .execute_json(ctx, RequestSpec::get("/api/v1/models"))
            .await?;
        Ok(list.models)
    }

    /// JSON schema of one model class; unknown classes surface as HTTP 404.
    pub async fn model_schema(
        &self,
        ctx: &CallContext,
        model_class: &str,
    ) -> Result<JsonObject, UpstreamError> {
        let spec = RequestSpec::get("/api/v1/model/schema")
            .query(vec![("model_class", model_class.to_string())]);
        self.execute_json(ctx, spec).await
    }

    pub async fn validate_model(
        &self,
        ctx: &CallContext,
        model_spec: &JsonObject,
    ) -> Result<ModelValidation, UpstreamError> {
        let spec = RequestSpec::post("/api/v1/model/validate", Value::Object(model_spec.clone()));
        self.execute_json(ctx, spec).await
    }

    pub async fn validate_config(
        &self,
        ctx: &CallContext,
        config: &JsonObject,
    ) -> Result<ConfigValidation, UpstreamError> {
        let spec = RequestSpec::post("/api/v1/config/validate", Value::Object(config.clone()));
        self.execute_json(ctx, spec).await
    }

    /// Full vmanomaly config as YAML text.
    pub async fn generate_config(
        &self,
        ctx: &CallContext,
        request: &ConfigGenerationRequest,
    ) -> Result<String, UpstreamError> {
        let spec = RequestSpec::get("/api/vmanomaly/config.yaml").query(request.query_pairs());
        self.execute(ctx, spec).await
    }

    /// vmalert rule group as YAML text.
    pub async fn generate_alert_rule(
        &self,
        ctx: &CallContext,
        request: &AlertRuleRequest,
    ) -> Result<String, UpstreamError> {
        let spec = RequestSpec::get("/api/vmalert/rule.yaml").query(request.query_pairs());
        self.execute(ctx, spec).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Detection tasks
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn create_detection_task(
        &self,
        ctx: &CallContext,
        request: &DetectionTaskRequest,
    ) -> Result<TaskCreated, UpstreamError> {
        let body = to_body(request)?;
        let spec = RequestSpec::post(TASKS_PATH, body)
            .auth(AuthPolicy::forward_if(request.pass_auth_headers));
        self.execute_json(ctx, spec).await
    }

    pub async fn task_status(
        &self,
        ctx: &CallContext,
        task_id: &str,
    ) -> Result<TaskStatus, UpstreamError> {
        self.execute_json(ctx, RequestSpec::get(TASKS_PATH).segment(task_id))
            .await
    }

    pub async fn list_tasks(
        &self,
        ctx: &CallContext,
        limit: u32,
        status: Option<TaskState>,
    ) -> Result<Vec<TaskStatus>, UpstreamError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(status) = status {
            query.push(("status", status.as_str().to_string()));
        }
        let list: TaskList = self
            .execute_json(ctx, RequestSpec::get(TASKS_PATH).query(query))
            .await?;
        Ok(list.tasks)
    }

    /// Fails with an HTTP status error when the task is unknown or already terminal.
    pub async fn cancel_task(
        &self,
        ctx: &CallContext,
        task_id: &str,
    ) -> Result<TaskCancellation, UpstreamError> {
        self.execute_json(ctx, RequestSpec::delete(TASKS_PATH).segment(task_id))
            .await
    }

    pub async fn detection_limits(
        &self,
        ctx: &CallContext,
    ) -> Result<DetectionLimits, UpstreamError> {
        self.execute_json(ctx, RequestSpec::get("/api/v1/anomaly_detection/limits"))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries and compatibility
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn query(
        &self,
        ctx: &CallContext,
        request: &QueryRequest,
    ) -> Result<JsonObject, UpstreamError> {
        let body = to_body(request)?;
        let spec = RequestSpec::post("/api/v1/query", body)
            .auth(AuthPolicy::forward_if(request.pass_auth_headers));
        self.execute_json(ctx, spec).await
    }

    pub async fn compatibility(
        &self,
        ctx: &CallContext,
        version_to: Option<&str>,
    ) -> Result<CompatibilityReport, UpstreamError> {
        let mut spec = RequestSpec::get("/api/v1/compatibility");
        if let Some(version) = version_to.filter(|v| !v.is_empty()) {
            spec = spec.query(vec![("version_to", version.to_string())]);
        }
        self.execute_json(ctx, spec).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn url(&self, spec: &RequestSpec) -> Url {
        let mut url = self.config.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(spec.path.split('/').filter(|s| !s.is_empty()));
            if let Some(segment) = &spec.segment {
                segments.push(segment);
            }
        }
        url
    }

    fn build(&self, ctx: &CallContext, spec: &RequestSpec) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(spec.method.clone(), self.url(spec))
            .headers(self.config.headers.clone());
        if !spec.query.is_empty() {
            builder = builder.query(&spec.query);
        }
        match spec.auth {
            AuthPolicy::Configured => {
                if let Some(token) = &self.config.bearer_token {
                    builder = builder.bearer_auth(token);
                }
            }
            AuthPolicy::Forward => {
                if let Some(value) = ctx.inbound_authorization() {
                    builder = builder.header(AUTHORIZATION, value.clone());
                }
            }
        }
        if let Some(body) = &spec.body {
            builder = builder.json(body);
        }
        builder
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        ctx: &CallContext,
        spec: RequestSpec,
    ) -> Result<T, UpstreamError> {
        let body = self.execute(ctx, spec).await?;
        serde_json::from_str(&body).map_err(|source| UpstreamError::Decode { body, source })
    }

    /// Send one request and return the raw 2xx body.
    async fn execute(&self, ctx: &CallContext, spec: RequestSpec) -> Result<String, UpstreamError> {
        let request = self.build(ctx, &spec);
        let started = Instant::now();
        let fixed_deadline = started + self.config.timeout;
        let (deadline, caller_bound) = match ctx.deadline() {
            Some(deadline) if deadline < fixed_deadline => (deadline, true),
            _ => (fixed_deadline, false),
        };

        debug!(
            name: "upstream.request",
            method = %spec.method,
            path = spec.path,
            "Sending request to vmanomaly"
        );

        let exchange = async move {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let result = tokio::select! {
            biased;
            () = ctx.cancellation().cancelled() => Err(UpstreamError::Cancelled),
            outcome = tokio::time::timeout_at(deadline, exchange) => match outcome {
                Err(_) if caller_bound => Err(UpstreamError::Cancelled),
                Err(_) => Err(NetworkFailure::TimedOut(self.config.timeout).into()),
                Ok(Err(err)) => Err(NetworkFailure::Transport(err).into()),
                Ok(Ok((status, body))) if status.is_success() => Ok(body),
                Ok(Ok((status, body))) => Err(UpstreamError::Status {
                    status: status.as_u16(),
                    body,
                }),
            },
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.kind(),
        };
        metrics::counter!(
            "upstream_requests_total",
            "method" => spec.method.as_str().to_owned(),
            "path" => spec.path,
            "outcome" => outcome
        )
        .increment(1);
        debug!(
            name: "upstream.response",
            method = %spec.method,
            path = spec.path,
            outcome,
            status = result.as_ref().err().and_then(UpstreamError::status),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "vmanomaly call finished"
        );

        result
    }
}

/// Encode a request DTO.
///
/// serde_json only fails on maps with non-string keys, and every request DTO
/// is a struct of strings, numbers, bools and string-keyed JSON objects, so
/// the error arm is unreachable for the types passed here. It is reported as
/// `Decode` with the marker body below rather than panicking.
fn to_body<T: serde::Serialize>(value: &T) -> Result<Value, UpstreamError> {
    serde_json::to_value(value).map_err(|source| UpstreamError::Decode {
        body: REQUEST_ENCODING_BODY.to_string(),
        source,
    })
}

const REQUEST_ENCODING_BODY: &str = "<request body could not be encoded>";
