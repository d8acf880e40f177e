use std::sync::Arc;

use async_trait::async_trait;
use rmcp::ErrorData;
use rmcp::model::{CallToolResult, JsonObject, ToolAnnotations};
use serde_json::{Value, json};

use super::{AnomalyTool, format, read_only};
use crate::upstream::{CallContext, VmAnomalyClient};

fn no_args() -> Value {
    json!({ "type": "object", "properties": {} })
}

#[derive(Debug)]
pub struct HealthCheckTool {
    client: Arc<VmAnomalyClient>,
}

impl HealthCheckTool {
    pub fn new(client: Arc<VmAnomalyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnomalyTool for HealthCheckTool {
    fn name(&self) -> &'static str {
        "vmanomaly_health_check"
    }

    fn description(&self) -> &'static str {
        "Check whether the vmanomaly server is up and responding."
    }

    fn schema(&self) -> Value {
        no_args()
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        read_only()
    }

    async fn call(&self, ctx: CallContext, _args: JsonObject) -> Result<CallToolResult, ErrorData> {
        Ok(match self.client.health(&ctx).await {
            Ok(health) => format::titled_json("vmanomaly health:", &health),
            Err(e) => format::upstream_error("check vmanomaly health", &e),
        })
    }
}

#[derive(Debug)]
pub struct BuildInfoTool {
    client: Arc<VmAnomalyClient>,
}

impl BuildInfoTool {
    pub fn new(client: Arc<VmAnomalyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnomalyTool for BuildInfoTool {
    fn name(&self) -> &'static str {
        "vmanomaly_get_buildinfo"
    }

    fn description(&self) -> &'static str {
        "Get the vmanomaly version and build information."
    }

    fn schema(&self) -> Value {
        no_args()
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        read_only()
    }

    async fn call(&self, ctx: CallContext, _args: JsonObject) -> Result<CallToolResult, ErrorData> {
        Ok(match self.client.build_info(&ctx).await {
            Ok(info) => format::titled_json("vmanomaly build info:", &info),
            Err(e) => format::upstream_error("get build info", &e),
        })
    }
}

/// vmanomaly's own Prometheus metrics, passed through as text.
#[derive(Debug)]
pub struct MetricsTool {
    client: Arc<VmAnomalyClient>,
}

impl MetricsTool {
    pub fn new(client: Arc<VmAnomalyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnomalyTool for MetricsTool {
    fn name(&self) -> &'static str {
        "vmanomaly_get_metrics"
    }

    fn description(&self) -> &'static str {
        "Get vmanomaly self-monitoring metrics in Prometheus text format \
         (model runs, errors, timings, resource usage)."
    }

    fn schema(&self) -> Value {
        no_args()
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        read_only()
    }

    async fn call(&self, ctx: CallContext, _args: JsonObject) -> Result<CallToolResult, ErrorData> {
        Ok(match self.client.metrics(&ctx).await {
            Ok(body) => format::text(body),
            Err(e) => format::upstream_error("get vmanomaly metrics", &e),
        })
    }
}
