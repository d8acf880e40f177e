use std::sync::Arc;

use async_trait::async_trait;
use rmcp::ErrorData;
use rmcp::model::{CallToolResult, JsonObject, ToolAnnotations};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{AnomalyTool, format, non_empty, parse_args, read_only};
use crate::upstream::types::ConfigGenerationRequest;
use crate::upstream::{CallContext, VmAnomalyClient};

const DEFAULT_FIT_WINDOW: &str = "1d";
const DEFAULT_FIT_EVERY: &str = "1d";

#[derive(Debug, Deserialize)]
struct ValidateConfigArgs {
    config: JsonObject,
}

#[derive(Debug)]
pub struct ValidateConfigTool {
    client: Arc<VmAnomalyClient>,
}

impl ValidateConfigTool {
    pub fn new(client: Arc<VmAnomalyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnomalyTool for ValidateConfigTool {
    fn name(&self) -> &'static str {
        "vmanomaly_validate_config"
    }

    fn description(&self) -> &'static str {
        "Validate a complete vmanomaly configuration (schedulers, models, reader, writer) \
         and return the normalized config or the list of errors."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "config": {
                    "type": "object",
                    "description": "Full vmanomaly configuration as a JSON object."
                }
            },
            "required": ["config"]
        })
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        read_only()
    }

    async fn call(&self, ctx: CallContext, args: JsonObject) -> Result<CallToolResult, ErrorData> {
        let args: ValidateConfigArgs = parse_args(args)?;
        Ok(match self.client.validate_config(&ctx, &args.config).await {
            Ok(validation) if validation.is_valid => format::text(format!(
                "Configuration is valid.\n\n{}",
                format::pretty(&validation.normalized_config.unwrap_or(Value::Null))
            )),
            Ok(validation) => format::text(format!(
                "Configuration is INVALID ({} errors):\n\n{}",
                validation.errors.len(),
                format::pretty(&validation.errors)
            )),
            Err(e) => format::upstream_error("validate config", &e),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GenerateConfigArgs {
    query: String,
    step: String,
    datasource_url: String,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    fit_window: Option<String>,
    #[serde(default)]
    fit_every: Option<String>,
    #[serde(default)]
    infer_every: Option<String>,
    #[serde(default)]
    model_spec: Option<JsonObject>,
}

impl GenerateConfigArgs {
    fn into_request(self) -> ConfigGenerationRequest {
        ConfigGenerationRequest {
            step: self.step,
            query: self.query,
            datasource_url: self.datasource_url,
            tenant_id: non_empty(self.tenant_id),
            fit_window: Some(
                non_empty(self.fit_window).unwrap_or_else(|| DEFAULT_FIT_WINDOW.into()),
            ),
            fit_every: Some(non_empty(self.fit_every).unwrap_or_else(|| DEFAULT_FIT_EVERY.into())),
            infer_every: non_empty(self.infer_every),
            model_spec: self.model_spec,
        }
    }
}

#[derive(Debug)]
pub struct GenerateConfigTool {
    client: Arc<VmAnomalyClient>,
}

impl GenerateConfigTool {
    pub fn new(client: Arc<VmAnomalyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnomalyTool for GenerateConfigTool {
    fn name(&self) -> &'static str {
        "vmanomaly_generate_config"
    }

    fn description(&self) -> &'static str {
        "Generate a ready-to-use vmanomaly YAML configuration for one query and model."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "MetricsQL query to analyze." },
                "step": { "type": "string", "description": "Query resolution, e.g. '1m'." },
                "datasource_url": { "type": "string", "description": "VictoriaMetrics URL the reader queries." },
                "tenant_id": { "type": "string", "description": "Tenant for cluster setups, e.g. '0:0'." },
                "fit_window": { "type": "string", "description": "Training window (default '1d')." },
                "fit_every": { "type": "string", "description": "Retraining interval (default '1d')." },
                "infer_every": { "type": "string", "description": "Inference interval." },
                "model_spec": { "type": "object", "description": "Model specification, e.g. {\"class\": \"zscore\"}." }
            },
            "required": ["query", "step", "datasource_url"]
        })
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        read_only()
    }

    async fn call(&self, ctx: CallContext, args: JsonObject) -> Result<CallToolResult, ErrorData> {
        let request = parse_args::<GenerateConfigArgs>(args)?.into_request();
        Ok(match self.client.generate_config(&ctx, &request).await {
            Ok(yaml) => format::text(format!("Generated vmanomaly configuration:\n\n```yaml\n{yaml}\n```")),
            Err(e) => format::upstream_error("generate config", &e),
        })
    }
}
