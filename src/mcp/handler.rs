//! MCP server handler exposing the tool registry and documentation resources.

use std::sync::Arc;

use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use rmcp::model::{
    AnnotateAble, CallToolRequestParam, CallToolResult, Implementation,
    ListResourcesRequestMethod, ListResourcesResult, ListToolsResult, PaginatedRequestParam,
    RawResource, ReadResourceRequestMethod, ReadResourceRequestParam, ReadResourceResult,
    ResourceContents, ServerCapabilities, ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData, ServerHandler};

use crate::docs::{DocsIndex, MARKDOWN_MIME};
use crate::tools::ToolRegistry;
use crate::upstream::CallContext;

const INSTRUCTIONS: &str = "Tools for the VictoriaMetrics anomaly detection service (vmanomaly): \
inspect health and models, validate and generate configs and alert rules, run and follow \
detection tasks, query data and check state compatibility before upgrades.";

/// One instance is cloned per session; all clones share the registry and docs.
#[derive(Clone)]
pub struct AnomalyServer {
    registry: ToolRegistry,
    docs: Arc<dyn DocsIndex>,
    resources_enabled: bool,
}

impl std::fmt::Debug for AnomalyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnomalyServer")
            .field("registry", &self.registry)
            .field("resources_enabled", &self.resources_enabled)
            .finish_non_exhaustive()
    }
}

impl AnomalyServer {
    pub fn new(registry: ToolRegistry, docs: Arc<dyn DocsIndex>, resources_enabled: bool) -> Self {
        Self {
            registry,
            docs,
            resources_enabled,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn call_context(context: &RequestContext<RoleServer>) -> CallContext {
        // Parts are only present for HTTP transports.
        let authorization = context
            .extensions
            .get::<Parts>()
            .and_then(|parts| parts.headers.get(AUTHORIZATION))
            .cloned();
        CallContext::with_cancellation(context.ct.clone()).with_inbound_authorization(authorization)
    }
}

impl ServerHandler for AnomalyServer {
    fn get_info(&self) -> ServerInfo {
        let capabilities = if self.resources_enabled {
            ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build()
        } else {
            ServerCapabilities::builder().enable_tools().build()
        };
        ServerInfo {
            capabilities,
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Implementation::from_build_env()
            },
            instructions: Some(INSTRUCTIONS.to_string()),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(self.registry.list()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let ctx = Self::call_context(&context);
        self.registry
            .call(&request.name, ctx, request.arguments.unwrap_or_default())
            .await
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        if !self.resources_enabled {
            return Err(ErrorData::method_not_found::<ListResourcesRequestMethod>());
        }
        let resources = self
            .docs
            .documents()
            .into_iter()
            .map(|doc| {
                let mut raw = RawResource::new(doc.uri, doc.title.clone());
                raw.description = Some(doc.title);
                raw.mime_type = Some(MARKDOWN_MIME.to_string());
                raw.no_annotation()
            })
            .collect();
        Ok(ListResourcesResult::with_all_items(resources))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        if !self.resources_enabled {
            return Err(ErrorData::method_not_found::<ReadResourceRequestMethod>());
        }
        let doc = self.docs.content(&request.uri).ok_or_else(|| {
            ErrorData::resource_not_found(format!("unknown resource: {}", request.uri), None)
        })?;
        let mut contents = ResourceContents::text(doc.text, doc.uri);
        if let ResourceContents::TextResourceContents { mime_type, .. } = &mut contents {
            *mime_type = Some(MARKDOWN_MIME.to_string());
        }
        Ok(ReadResourceResult {
            contents: vec![contents],
        })
    }
}
