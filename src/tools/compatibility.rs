//! State compatibility check between the running vmanomaly and its persisted state.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use rmcp::ErrorData;
use rmcp::model::{CallToolResult, JsonObject, ToolAnnotations};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{AnomalyTool, format, non_empty, parse_args, read_only};
use crate::upstream::types::CompatibilityReport;
use crate::upstream::{CallContext, VmAnomalyClient};

/// Structured verdict returned by `vmanomaly_check_compatibility`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompatibilitySummary {
    pub summary: String,
    pub status: &'static str,
    pub runtime_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_version: Option<String>,
    pub has_state: bool,
    pub is_compatible: bool,
    pub drop_everything: bool,
    pub models_to_purge: Vec<String>,
    pub purge_reader_data: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Reduce a backend report to an actionable summary.
///
/// `drop_everything` is always reported and overrides any per-component purge list.
pub fn summarize(report: &CompatibilityReport) -> CompatibilitySummary {
    let global = &report.global_check;
    let assessment = report.component_assessment.clone().unwrap_or_default();
    let reason = global.reason.clone().filter(|r| !r.is_empty());

    let (status, mut summary) = if !global.has_state {
        ("no_state", "No persisted state found (fresh install).".to_string())
    } else if global.is_compatible {
        (
            "compatible",
            format!("State is COMPATIBLE with runtime {}.", report.runtime_version),
        )
    } else {
        (
            "incompatible",
            format!("State is INCOMPATIBLE with runtime {}.", report.runtime_version),
        )
    };
    let incompatible = global.has_state && !global.is_compatible;

    if global.drop_everything {
        summary.push_str(" CRITICAL: All persisted state must be dropped before upgrade.");
    } else if incompatible {
        let mut actions = Vec::new();
        if !assessment.models_to_purge.is_empty() {
            actions.push(format!("purge models: {}", assessment.models_to_purge.join(", ")));
        }
        if assessment.should_purge_reader_data {
            actions.push("purge reader data".to_string());
        }
        if !actions.is_empty() {
            let _ = write!(summary, " Required actions: {}.", actions.join("; "));
        }
    } else if global.has_state {
        summary.push_str(" No migration actions required.");
    } else {
        summary.push_str(" System is ready to use with any configuration.");
    }
    if (incompatible || global.drop_everything)
        && let Some(reason) = &reason
    {
        let _ = write!(summary, " Reason: {reason}");
    }

    CompatibilitySummary {
        summary,
        status,
        runtime_version: report.runtime_version.clone(),
        stored_version: report.stored_version.clone(),
        has_state: global.has_state,
        is_compatible: global.is_compatible,
        drop_everything: global.drop_everything,
        models_to_purge: assessment.models_to_purge,
        purge_reader_data: assessment.should_purge_reader_data,
        reason,
    }
}

#[derive(Debug, Deserialize)]
struct CompatibilityArgs {
    #[serde(default)]
    version_to: Option<String>,
}

#[derive(Debug)]
pub struct CheckCompatibilityTool {
    client: Arc<VmAnomalyClient>,
}

impl CheckCompatibilityTool {
    pub fn new(client: Arc<VmAnomalyClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AnomalyTool for CheckCompatibilityTool {
    fn name(&self) -> &'static str {
        "vmanomaly_check_compatibility"
    }

    fn description(&self) -> &'static str {
        "Check whether persisted vmanomaly state (models, reader data) is compatible with \
         the running version or a target upgrade version, and what must be purged."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "version_to": {
                    "type": "string",
                    "description": "Target version to check against (defaults to the running version)."
                }
            }
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "summary": { "type": "string" },
                "status": { "type": "string", "enum": ["no_state", "compatible", "incompatible"] },
                "runtime_version": { "type": "string" },
                "stored_version": { "type": "string" },
                "has_state": { "type": "boolean" },
                "is_compatible": { "type": "boolean" },
                "drop_everything": { "type": "boolean" },
                "models_to_purge": { "type": "array", "items": { "type": "string" } },
                "purge_reader_data": { "type": "boolean" },
                "reason": { "type": "string" }
            },
            "required": [
                "summary", "status", "runtime_version", "has_state", "is_compatible",
                "drop_everything", "models_to_purge", "purge_reader_data"
            ]
        }))
    }

    fn annotations(&self) -> Option<ToolAnnotations> {
        read_only()
    }

    async fn call(&self, ctx: CallContext, args: JsonObject) -> Result<CallToolResult, ErrorData> {
        let args: CompatibilityArgs = parse_args(args)?;
        let version_to = non_empty(args.version_to);
        Ok(match self.client.compatibility(&ctx, version_to.as_deref()).await {
            Ok(report) => {
                let summary = summarize(&report);
                match serde_json::to_value(&summary) {
                    Ok(value) => CallToolResult::structured(value),
                    Err(e) => format::rejected(format!("failed to encode compatibility summary: {e}")),
                }
            }
            Err(e) => format::upstream_error("check compatibility", &e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(value: Value) -> CompatibilityReport {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_fresh_install() {
        let summary = summarize(&report(json!({
            "runtime_version": "1.25.0",
            "global_check": {"has_state": false, "is_compatible": true, "drop_everything": false}
        })));
        assert_eq!(summary.status, "no_state");
        assert!(summary.summary.starts_with("No persisted state found"));
    }

    #[test]
    fn test_drop_everything_wins_over_assessment() {
        let summary = summarize(&report(json!({
            "runtime_version": "1.26.0",
            "stored_version": "1.18.0",
            "global_check": {
                "has_state": true,
                "is_compatible": false,
                "drop_everything": true,
                "reason": "state format changed"
            },
            "component_assessment": {
                "models_to_purge": ["zscore_a"],
                "should_purge_reader_data": true,
                "issues": []
            }
        })));
        assert_eq!(summary.status, "incompatible");
        assert!(summary.summary.contains("All persisted state must be dropped"));
        assert!(!summary.summary.contains("Required actions"));
        assert!(summary.summary.ends_with("Reason: state format changed"));
        assert_eq!(summary.models_to_purge, vec!["zscore_a".to_string()]);
    }

    #[test]
    fn test_drop_everything_reported_even_when_compatible() {
        let summary = summarize(&report(json!({
            "runtime_version": "1.26.0",
            "stored_version": "1.26.0",
            "global_check": {"has_state": true, "is_compatible": true, "drop_everything": true}
        })));
        assert_eq!(summary.status, "compatible");
        assert!(summary.summary.contains("All persisted state must be dropped"));
        assert!(!summary.summary.contains("No migration actions required"));
    }

    #[test]
    fn test_partial_purge_lists_actions() {
        let summary = summarize(&report(json!({
            "runtime_version": "1.26.0",
            "global_check": {"has_state": true, "is_compatible": false, "drop_everything": false},
            "component_assessment": {
                "models_to_purge": ["a", "b"],
                "should_purge_reader_data": true
            }
        })));
        assert_eq!(
            summary.summary,
            "State is INCOMPATIBLE with runtime 1.26.0. Required actions: purge models: a, b; purge reader data."
        );
        assert!(summary.purge_reader_data);
    }

    #[test]
    fn test_compatible() {
        let summary = summarize(&report(json!({
            "runtime_version": "1.26.0",
            "stored_version": "1.26.0",
            "global_check": {"has_state": true, "is_compatible": true, "drop_everything": false}
        })));
        assert_eq!(summary.status, "compatible");
        assert_eq!(
            summary.summary,
            "State is COMPATIBLE with runtime 1.26.0. No migration actions required."
        );
        assert_eq!(summary.stored_version.as_deref(), Some("1.26.0"));
    }
}
