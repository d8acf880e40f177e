//! Tool registry.
//!
//! Each vmanomaly operation is an [`AnomalyTool`]; [`ToolRegistry`] exposes
//! them over MCP, filtered by a single [`ToolPolicy`] deny-list that both the
//! catalog listing and invocation consult.

mod alerts;
mod compatibility;
mod configuration;
mod docs;
pub mod format;
mod health;
mod models;
mod query;
mod tasks;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rmcp::ErrorData;
use rmcp::model::{CallToolResult, JsonObject, Tool, ToolAnnotations};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::docs::DocsIndex;
use crate::upstream::{CallContext, VmAnomalyClient};

pub use alerts::GenerateAlertRuleTool;
pub use compatibility::{CheckCompatibilityTool, CompatibilitySummary, summarize};
pub use configuration::{GenerateConfigTool, ValidateConfigTool};
pub use docs::SearchDocsTool;
pub use health::{BuildInfoTool, HealthCheckTool, MetricsTool};
pub use models::{ListModelsTool, ModelSchemaTool, ValidateModelTool};
pub use query::QueryMetricsTool;
pub use tasks::{
    CancelTaskTool, CreateDetectionTaskTool, DetectionLimitsTool, ListTasksTool, TaskStatusTool,
};

/// A single operation callable by name over MCP.
#[async_trait]
pub trait AnomalyTool: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the arguments object.
    fn schema(&self) -> Value;

    /// Behaviour hints advertised with the tool.
    fn annotations(&self) -> Option<ToolAnnotations> {
        None
    }

    /// JSON schema of structured output, for tools that return it.
    fn output_schema(&self) -> Option<Value> {
        None
    }

    /// Run the tool.
    ///
    /// Upstream failures come back as `Ok` results flagged as errors; `Err` is
    /// reserved for malformed arguments.
    async fn call(&self, ctx: CallContext, args: JsonObject) -> Result<CallToolResult, ErrorData>;
}

/// Hints for tools that only read backend state.
pub(crate) fn read_only() -> Option<ToolAnnotations> {
    Some(
        ToolAnnotations::new()
            .read_only(true)
            .destructive(false)
            .idempotent(true)
            .open_world(false),
    )
}

/// Deserialize the arguments object into a typed struct.
pub(crate) fn parse_args<T: DeserializeOwned>(args: JsonObject) -> Result<T, ErrorData> {
    serde_json::from_value(Value::Object(args))
        .map_err(|e| ErrorData::invalid_params(format!("invalid arguments: {e}"), None))
}

/// Empty strings count as absent.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Non-positive numbers count as absent.
pub(crate) fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > 0.0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Deny-list policy
// ─────────────────────────────────────────────────────────────────────────────

/// Deny-list of tool names, fixed for the process lifetime.
#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    denied: BTreeSet<String>,
}

impl ToolPolicy {
    pub fn new<I, S>(denied: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denied: denied.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, name: &str) -> bool {
        !self.denied.contains(name)
    }

    pub fn denied(&self) -> impl Iterator<Item = &str> {
        self.denied.iter().map(String::as_str)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<Vec<Arc<dyn AnomalyTool>>>,
    policy: Arc<ToolPolicy>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tool_count", &self.tools.len())
            .field("denied", &self.policy.denied().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new(policy: ToolPolicy) -> Self {
        Self {
            tools: Arc::new(Vec::new()),
            policy: Arc::new(policy),
        }
    }

    /// Registry holding every vmanomaly tool.
    pub fn builtin(
        client: Arc<VmAnomalyClient>,
        docs: Arc<dyn DocsIndex>,
        policy: ToolPolicy,
    ) -> Self {
        let registry = Self::new(policy)
            .with_tool(Arc::new(HealthCheckTool::new(Arc::clone(&client))))
            .with_tool(Arc::new(BuildInfoTool::new(Arc::clone(&client))))
            .with_tool(Arc::new(MetricsTool::new(Arc::clone(&client))))
            .with_tool(Arc::new(ListModelsTool::new(Arc::clone(&client))))
            .with_tool(Arc::new(ModelSchemaTool::new(Arc::clone(&client))))
            .with_tool(Arc::new(ValidateModelTool::new(Arc::clone(&client))))
            .with_tool(Arc::new(ValidateConfigTool::new(Arc::clone(&client))))
            .with_tool(Arc::new(GenerateConfigTool::new(Arc::clone(&client))))
            .with_tool(Arc::new(GenerateAlertRuleTool::new(Arc::clone(&client))))
            .with_tool(Arc::new(CreateDetectionTaskTool::new(Arc::clone(&client))))
            .with_tool(Arc::new(TaskStatusTool::new(Arc::clone(&client))))
            .with_tool(Arc::new(ListTasksTool::new(Arc::clone(&client))))
            .with_tool(Arc::new(CancelTaskTool::new(Arc::clone(&client))))
            .with_tool(Arc::new(DetectionLimitsTool::new(Arc::clone(&client))))
            .with_tool(Arc::new(QueryMetricsTool::new(Arc::clone(&client))))
            .with_tool(Arc::new(CheckCompatibilityTool::new(Arc::clone(&client))))
            .with_tool(Arc::new(SearchDocsTool::new(docs)));

        for name in registry.policy.denied() {
            if registry.tools.iter().all(|t| t.name() != name) {
                warn!(name: "tools.unknown_denied", tool = name, "Deny-list names an unknown tool");
            }
        }
        registry
    }

    /// Register a tool; a later tool with the same name replaces the earlier one.
    #[must_use]
    pub fn with_tool(self, tool: Arc<dyn AnomalyTool>) -> Self {
        let mut tools: Vec<_> = self
            .tools
            .iter()
            .filter(|t| t.name() != tool.name())
            .cloned()
            .collect();
        tools.push(tool);
        Self {
            tools: Arc::new(tools),
            policy: self.policy,
        }
    }

    pub fn policy(&self) -> &ToolPolicy {
        &self.policy
    }

    /// Look up an enabled tool.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn AnomalyTool>> {
        if !self.policy.allows(name) {
            return None;
        }
        self.tools.iter().find(|t| t.name() == name)
    }

    /// MCP catalog of enabled tools, in registration order.
    pub fn list(&self) -> Vec<Tool> {
        self.tools
            .iter()
            .filter(|t| self.policy.allows(t.name()))
            .map(|t| Tool {
                name: t.name().into(),
                description: Some(t.description().into()),
                input_schema: Arc::new(as_object(t.schema())),
                title: None,
                output_schema: t.output_schema().map(|s| Arc::new(as_object(s))),
                annotations: t.annotations(),
                icons: None,
                meta: None,
            })
            .collect()
    }

    /// Invoke an enabled tool by name.
    pub async fn call(
        &self,
        name: &str,
        ctx: CallContext,
        args: JsonObject,
    ) -> Result<CallToolResult, ErrorData> {
        let Some(tool) = self.get(name) else {
            debug!(name: "tools.rejected", tool = name, "Rejected call to unavailable tool");
            return Err(ErrorData::invalid_params(
                format!("tool not found: {name}"),
                None,
            ));
        };

        let started = Instant::now();
        let result = tool.call(ctx, args).await;
        let outcome = match &result {
            Ok(r) if r.is_error == Some(true) => "error",
            Ok(_) => "ok",
            Err(_) => "invalid",
        };

        let tool_name = tool.name();
        metrics::counter!("mcp_tool_calls_total", "tool" => tool_name, "outcome" => outcome)
            .increment(1);
        metrics::histogram!("mcp_tool_call_duration_seconds", "tool" => tool_name)
            .record(started.elapsed().as_secs_f64());
        debug!(
            name: "tools.called",
            tool = tool_name,
            outcome,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Tool call finished"
        );
        result
    }
}

fn as_object(schema: Value) -> JsonObject {
    match schema {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct EchoTool(&'static str);

    #[async_trait]
    impl AnomalyTool for EchoTool {
        fn name(&self) -> &'static str {
            self.0
        }

        fn description(&self) -> &'static str {
            "Echo the arguments back"
        }

        fn schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn call(&self, _ctx: CallContext, args: JsonObject) -> Result<CallToolResult, ErrorData> {
            Ok(format::text(Value::Object(args).to_string()))
        }
    }

    fn registry(denied: &[&str]) -> ToolRegistry {
        ToolRegistry::new(ToolPolicy::new(denied.iter().copied()))
            .with_tool(Arc::new(EchoTool("alpha")))
            .with_tool(Arc::new(EchoTool("beta")))
    }

    #[test]
    fn test_denied_tool_hidden_from_catalog() {
        let registry = registry(&["beta"]);
        let names: Vec<_> = registry.list().into_iter().map(|t| t.name.to_string()).collect();
        assert_eq!(names, vec!["alpha"]);
        assert!(registry.get("beta").is_none());
    }

    #[tokio::test]
    async fn test_denied_tool_rejected_on_call() {
        let registry = registry(&["beta"]);
        let err = registry
            .call("beta", CallContext::new(), JsonObject::new())
            .await
            .unwrap_err();
        assert!(err.message.contains("beta"));
    }

    #[tokio::test]
    async fn test_unknown_tool_rejected() {
        let registry = registry(&[]);
        assert!(
            registry
                .call("gamma", CallContext::new(), JsonObject::new())
                .await
                .is_err()
        );
    }

    #[test]
    fn test_with_tool_replaces_same_name() {
        let registry = registry(&[]).with_tool(Arc::new(EchoTool("alpha")));
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_parse_args_reports_invalid_params() {
        #[derive(Debug, serde::Deserialize)]
        struct Args {
            #[allow(dead_code)]
            task_id: String,
        }
        let err = parse_args::<Args>(JsonObject::new()).unwrap_err();
        assert!(err.message.contains("task_id"));
    }

    #[test]
    fn test_blank_and_non_positive_count_as_absent() {
        assert_eq!(non_empty(Some("  ".into())), None);
        assert_eq!(non_empty(Some("1m".into())), Some("1m".into()));
        assert_eq!(positive(Some(0.0)), None);
        assert_eq!(positive(Some(-2.5)), None);
        assert_eq!(positive(Some(2.5)), Some(2.5));
    }
}
