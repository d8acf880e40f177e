//! Turning client results into MCP tool results.

use rmcp::model::{CallToolResult, Content};
use serde::Serialize;
use tracing::warn;

use crate::upstream::UpstreamError;

/// Successful plain-text result.
pub fn text(body: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(body.into())])
}

/// Successful result with a heading line followed by pretty JSON.
pub fn titled_json<T: Serialize>(title: &str, value: &T) -> CallToolResult {
    text(format!("{title}\n\n{}", pretty(value)))
}

pub fn pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}

/// Non-fatal error result for a failed backend call.
pub fn upstream_error(action: &str, err: &UpstreamError) -> CallToolResult {
    warn!(
        name: "tools.upstream_failed",
        action,
        kind = err.kind(),
        status = err.status(),
        error = %err,
        "vmanomaly call failed"
    );
    CallToolResult::error(vec![Content::text(format!("Failed to {action}: {err}"))])
}

/// Non-fatal error result for a request the tool refuses before calling out.
pub fn rejected(message: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(message.into())])
}

/// Concatenated text content of a result.
pub fn text_of(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|c| c.as_text().map(|t| t.text.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}
