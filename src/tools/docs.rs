use std::sync::Arc;

use async_trait::async_trait;
use rmcp::ErrorData;
use rmcp::model::{CallToolResult, Content, JsonObject, ResourceContents, ToolAnnotations};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{AnomalyTool, format, parse_args, read_only};
use crate::docs::{DocsIndex, MARKDOWN_MIME};
use crate::upstream::CallContext;

const DEFAULT_LIMIT: usize = 30;
const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Debug)]
pub struct SearchDocsTool {
    docs: Arc<dyn DocsIndex>,
}

impl SearchDocsTool {
    pub fn new(docs: Arc<dyn DocsIndex>) -> Self {
        Self { docs }
    }
}

#[async_trait]
impl AnomalyTool for SearchDocsTool {
    fn name(&self) -> &'static str {
        "vmanomaly_search_docs"
    }

    fn description(&self) -> &'static str {
        "Search the vmanomaly documentation (models, configuration, alerting, upgrades)."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search terms." },
                "limit": { "type": "integer", "description": "Maximum number of documents (default 30)." }
            },
            "required": ["query"]
        })
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        read_only()
    }

    async fn call(&self, _ctx: CallContext, args: JsonObject) -> Result<CallToolResult, ErrorData> {
        let args: SearchArgs = parse_args(args)?;
        let limit = args
            .limit
            .filter(|l| *l > 0)
            .map_or(DEFAULT_LIMIT, |l| usize::try_from(l).unwrap_or(MAX_LIMIT))
            .min(MAX_LIMIT);

        let contents: Vec<Content> = self
            .docs
            .search(&args.query, limit)
            .filter_map(|hit| self.docs.content(&hit.uri))
            .map(|doc| {
                let mut resource = ResourceContents::text(doc.text, doc.uri);
                if let ResourceContents::TextResourceContents { mime_type, .. } = &mut resource {
                    *mime_type = Some(MARKDOWN_MIME.to_string());
                }
                Content::resource(resource)
            })
            .collect();

        if contents.is_empty() {
            return Ok(format::text(format!(
                "No documentation found for query: {}",
                args.query
            )));
        }
        Ok(CallToolResult::success(contents))
    }
}
