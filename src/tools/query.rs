use std::sync::Arc;

use async_trait::async_trait;
use rmcp::ErrorData;
use rmcp::model::{CallToolResult, JsonObject, ToolAnnotations};
use serde::Deserialize;
use serde_json::{Value, json};

use super::tasks::fallback_datasource;
use super::{AnomalyTool, format, non_empty, parse_args, positive, read_only};
use crate::upstream::types::{DatasourceType, QueryRequest};
use crate::upstream::{CallContext, VmAnomalyClient};

const DEFAULT_STEP: &str = "1s";

#[derive(Debug, Deserialize)]
struct QueryArgs {
    query: String,
    #[serde(default)]
    step: Option<String>,
    #[serde(default)]
    datasource_type: Option<DatasourceType>,
    #[serde(default)]
    start: Option<f64>,
    #[serde(default)]
    end: Option<f64>,
    #[serde(default)]
    tenant_id: Option<String>,
    #[serde(default)]
    nocache: Option<CacheBypass>,
    #[serde(default)]
    pass_auth_headers: bool,
    #[serde(default)]
    datasource_url: Option<String>,
}

/// `nocache` as sent by clients: the backend's string form or a plain boolean.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CacheBypass {
    Flag(bool),
    Value(String),
}

impl CacheBypass {
    /// Wire value; the backend bypasses its cache for any non-empty string.
    fn into_wire(self) -> Option<String> {
        match self {
            Self::Flag(true) => Some("1".to_string()),
            Self::Flag(false) => None,
            Self::Value(value) => non_empty(Some(value)),
        }
    }
}

impl QueryArgs {
    fn into_request(self, fallback_datasource: String) -> QueryRequest {
        QueryRequest {
            query: self.query,
            step: Some(non_empty(self.step).unwrap_or_else(|| DEFAULT_STEP.into())),
            datasource_type: Some(self.datasource_type.unwrap_or_default()),
            start: positive(self.start),
            end: positive(self.end),
            tenant_id: non_empty(self.tenant_id),
            nocache: self.nocache.and_then(CacheBypass::into_wire),
            datasource_url: Some(non_empty(self.datasource_url).unwrap_or(fallback_datasource)),
            pass_auth_headers: self.pass_auth_headers,
        }
    }
}

#[derive(Debug)]
pub struct QueryMetricsTool {
    client: Arc<VmAnomalyClient>,
}

impl QueryMetricsTool {
    pub fn new(client: Arc<VmAnomalyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnomalyTool for QueryMetricsTool {
    fn name(&self) -> &'static str {
        "vmanomaly_query_metrics"
    }

    fn description(&self) -> &'static str {
        "Run a MetricsQL or LogsQL stats query through vmanomaly's reader, \
         e.g. to inspect anomaly scores or raw input data."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Query text." },
                "step": { "type": "string", "description": "Query resolution (default '1s')." },
                "datasource_type": { "type": "string", "enum": ["vm", "vmlogs"], "description": "Datasource kind (default 'vm')." },
                "start": { "type": "number", "description": "Range start, unix seconds." },
                "end": { "type": "number", "description": "Range end, unix seconds." },
                "tenant_id": { "type": "string", "description": "Tenant for cluster setups." },
                "nocache": { "type": "string", "description": "Any non-empty value (e.g. '1') bypasses the datasource response cache." },
                "pass_auth_headers": { "type": "boolean", "description": "Forward the caller's Authorization header to the datasource." },
                "datasource_url": { "type": "string", "description": "Datasource URL (defaults to the vmanomaly address)." }
            },
            "required": ["query"]
        })
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        read_only()
    }

    async fn call(&self, ctx: CallContext, args: JsonObject) -> Result<CallToolResult, ErrorData> {
        let args: QueryArgs = parse_args(args)?;
        let request = args.into_request(fallback_datasource(&self.client));
        Ok(match self.client.query(&ctx, &request).await {
            Ok(result) => format::titled_json("Query result:", &result),
            Err(e) => format::upstream_error("run query", &e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_defaults_and_zero_range() {
        let args: QueryArgs =
            serde_json::from_value(json!({"query": "anomaly_score", "start": 0, "end": 1700000000}))
                .unwrap();
        let request = args.into_request("http://vmanomaly:8490".into());

        assert_eq!(request.step.as_deref(), Some("1s"));
        assert_eq!(request.datasource_type, Some(DatasourceType::Metrics));
        assert_eq!(request.start, None);
        assert_eq!(request.end, Some(1_700_000_000.0));
        assert!(request.nocache.is_none());
    }

    #[test]
    fn test_nocache_sent_as_string() {
        let cases = [
            (json!("true"), Some("true")),
            (json!("1"), Some("1")),
            (json!(""), None),
            (json!(true), Some("1")),
            (json!(false), None),
        ];
        for (nocache, expected) in cases {
            let args: QueryArgs =
                serde_json::from_value(json!({"query": "up", "nocache": nocache})).unwrap();
            let request = args.into_request("http://vmanomaly:8490".into());
            assert_eq!(request.nocache.as_deref(), expected);
        }

        let args: QueryArgs =
            serde_json::from_value(json!({"query": "up", "nocache": "1"})).unwrap();
        let body = serde_json::to_value(args.into_request(String::new())).unwrap();
        assert_eq!(body["nocache"], "1");
    }
}
