use std::sync::Arc;

use async_trait::async_trait;
use rmcp::ErrorData;
use rmcp::model::{CallToolResult, JsonObject, ToolAnnotations};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{AnomalyTool, format, non_empty, parse_args, positive, read_only};
use crate::upstream::types::AlertRuleRequest;
use crate::upstream::{CallContext, VmAnomalyClient};

#[derive(Debug, Deserialize)]
struct AlertRuleArgs {
    step: String,
    query: String,
    #[serde(default)]
    anomaly_threshold: Option<f64>,
    #[serde(default)]
    rule_name: Option<String>,
    #[serde(default)]
    group_name: Option<String>,
    #[serde(default)]
    rule_description: Option<String>,
    #[serde(default)]
    infer_every: Option<String>,
}

impl From<AlertRuleArgs> for AlertRuleRequest {
    fn from(args: AlertRuleArgs) -> Self {
        Self {
            step: args.step,
            query: args.query,
            anomaly_threshold: positive(args.anomaly_threshold),
            rule_name: non_empty(args.rule_name),
            group_name: non_empty(args.group_name),
            rule_description: non_empty(args.rule_description),
            infer_every: non_empty(args.infer_every),
        }
    }
}

#[derive(Debug)]
pub struct GenerateAlertRuleTool {
    client: Arc<VmAnomalyClient>,
}

impl GenerateAlertRuleTool {
    pub fn new(client: Arc<VmAnomalyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnomalyTool for GenerateAlertRuleTool {
    fn name(&self) -> &'static str {
        "vmanomaly_generate_alert_rule"
    }

    fn description(&self) -> &'static str {
        "Generate a vmalert rule group that fires when the anomaly score of a query \
         exceeds a threshold."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "step": { "type": "string", "description": "Evaluation step, e.g. '1m'." },
                "query": { "type": "string", "description": "MetricsQL query the anomaly scores were produced for." },
                "anomaly_threshold": { "type": "number", "description": "Anomaly score threshold (backend default 1.0)." },
                "rule_name": { "type": "string", "description": "Alerting rule name." },
                "group_name": { "type": "string", "description": "Rule group name." },
                "rule_description": { "type": "string", "description": "Human-readable rule description." },
                "infer_every": { "type": "string", "description": "Inference interval of the model." }
            },
            "required": ["step", "query"]
        })
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        read_only()
    }

    async fn call(&self, ctx: CallContext, args: JsonObject) -> Result<CallToolResult, ErrorData> {
        let request = AlertRuleRequest::from(parse_args::<AlertRuleArgs>(args)?);
        Ok(match self.client.generate_alert_rule(&ctx, &request).await {
            Ok(yaml) => format::text(format!("Generated vmalert rule:\n\n```yaml\n{yaml}\n```")),
            Err(e) => format::upstream_error("generate alert rule", &e),
        })
    }
}
