use std::sync::Arc;

use async_trait::async_trait;
use rmcp::ErrorData;
use rmcp::model::{CallToolResult, JsonObject, ToolAnnotations};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{AnomalyTool, format, parse_args, read_only};
use crate::upstream::{CallContext, VmAnomalyClient};

#[derive(Debug)]
pub struct ListModelsTool {
    client: Arc<VmAnomalyClient>,
}

impl ListModelsTool {
    pub fn new(client: Arc<VmAnomalyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnomalyTool for ListModelsTool {
    fn name(&self) -> &'static str {
        "vmanomaly_list_models"
    }

    fn description(&self) -> &'static str {
        "List the anomaly detection model classes available in vmanomaly."
    }

    fn schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        read_only()
    }

    async fn call(&self, ctx: CallContext, _args: JsonObject) -> Result<CallToolResult, ErrorData> {
        Ok(match self.client.list_models(&ctx).await {
            Ok(models) => {
                format::titled_json(&format!("Available models ({}):", models.len()), &models)
            }
            Err(e) => format::upstream_error("list models", &e),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SchemaArgs {
    model_class: String,
}

#[derive(Debug)]
pub struct ModelSchemaTool {
    client: Arc<VmAnomalyClient>,
}

impl ModelSchemaTool {
    pub fn new(client: Arc<VmAnomalyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnomalyTool for ModelSchemaTool {
    fn name(&self) -> &'static str {
        "vmanomaly_get_model_schema"
    }

    fn description(&self) -> &'static str {
        "Get the JSON schema describing the parameters of one model class."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "model_class": {
                    "type": "string",
                    "description": "Model class, e.g. 'zscore', 'prophet', 'isolation_forest_multivariate'."
                }
            },
            "required": ["model_class"]
        })
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        read_only()
    }

    async fn call(&self, ctx: CallContext, args: JsonObject) -> Result<CallToolResult, ErrorData> {
        let args: SchemaArgs = parse_args(args)?;
        Ok(match self.client.model_schema(&ctx, &args.model_class).await {
            Ok(schema) => {
                format::titled_json(&format!("Schema for model '{}':", args.model_class), &schema)
            }
            Err(e) => format::upstream_error(&format!("get schema for model '{}'", args.model_class), &e),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ValidateModelArgs {
    model_spec: JsonObject,
}

#[derive(Debug)]
pub struct ValidateModelTool {
    client: Arc<VmAnomalyClient>,
}

impl ValidateModelTool {
    pub fn new(client: Arc<VmAnomalyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnomalyTool for ValidateModelTool {
    fn name(&self) -> &'static str {
        "vmanomaly_validate_model_config"
    }

    fn description(&self) -> &'static str {
        "Validate a single model specification and return its normalized form."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "model_spec": {
                    "type": "object",
                    "description": "Model specification including 'class', e.g. {\"class\": \"zscore\", \"z_threshold\": 3}."
                }
            },
            "required": ["model_spec"]
        })
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        read_only()
    }

    async fn call(&self, ctx: CallContext, args: JsonObject) -> Result<CallToolResult, ErrorData> {
        let args: ValidateModelArgs = parse_args(args)?;
        Ok(match self.client.validate_model(&ctx, &args.model_spec).await {
            Ok(validation) => {
                let verdict = if validation.valid {
                    "Model configuration is valid."
                } else {
                    "Model configuration is INVALID."
                };
                format::text(format!(
                    "{verdict}\n\n{}",
                    format::pretty(&validation.model_spec)
                ))
            }
            Err(e) => format::upstream_error("validate model config", &e),
        })
    }
}
