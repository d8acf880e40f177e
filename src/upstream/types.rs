//! Wire types exchanged with the vmanomaly HTTP API.
//!
//! Optional request fields are `Option` and skipped when absent, so callers
//! can tell "not supplied" apart from a zero value and the backend applies
//! its own defaults.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque JSON object as returned by health, buildinfo, schema and query.
pub type JsonObject = Map<String, Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Models and configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelList {
    #[serde(default)]
    pub models: Vec<String>,
}

/// Result of validating a single model spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelValidation {
    pub valid: bool,
    /// Normalized spec when valid, error details otherwise.
    #[serde(default)]
    pub model_spec: Value,
}

/// Result of validating a full vmanomaly config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigValidation {
    #[serde(alias = "valid")]
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_config: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,
}

/// Parameters for `GET /api/vmanomaly/config.yaml`.
#[derive(Debug, Clone, Default)]
pub struct ConfigGenerationRequest {
    pub step: String,
    pub query: String,
    pub datasource_url: String,
    pub tenant_id: Option<String>,
    pub fit_window: Option<String>,
    pub fit_every: Option<String>,
    pub infer_every: Option<String>,
    pub model_spec: Option<JsonObject>,
}

impl ConfigGenerationRequest {
    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("step", self.step.clone()),
            ("query", self.query.clone()),
            ("datasource_url", self.datasource_url.clone()),
        ];
        push_opt(&mut pairs, "tenant_id", self.tenant_id.as_ref());
        push_opt(&mut pairs, "fit_window", self.fit_window.as_ref());
        push_opt(&mut pairs, "fit_every", self.fit_every.as_ref());
        push_opt(&mut pairs, "infer_every", self.infer_every.as_ref());
        if let Some(spec) = &self.model_spec {
            pairs.push(("model_spec", Value::Object(spec.clone()).to_string()));
        }
        pairs
    }
}

/// Parameters for `GET /api/vmalert/rule.yaml`.
#[derive(Debug, Clone, Default)]
pub struct AlertRuleRequest {
    pub step: String,
    pub query: String,
    pub anomaly_threshold: Option<f64>,
    pub rule_name: Option<String>,
    pub group_name: Option<String>,
    pub rule_description: Option<String>,
    pub infer_every: Option<String>,
}

impl AlertRuleRequest {
    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("step", self.step.clone()), ("query", self.query.clone())];
        if let Some(threshold) = self.anomaly_threshold {
            pairs.push(("anomaly_threshold", threshold.to_string()));
        }
        push_opt(&mut pairs, "rule_name", self.rule_name.as_ref());
        push_opt(&mut pairs, "group_name", self.group_name.as_ref());
        push_opt(&mut pairs, "rule_description", self.rule_description.as_ref());
        push_opt(&mut pairs, "infer_every", self.infer_every.as_ref());
        pairs
    }
}

fn push_opt(pairs: &mut Vec<(&'static str, String)>, key: &'static str, value: Option<&String>) {
    if let Some(value) = value {
        pairs.push((key, value.clone()));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Detection tasks
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of datasource a query or task reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasourceType {
    /// VictoriaMetrics (MetricsQL).
    #[default]
    #[serde(rename = "vm", alias = "metrics")]
    Metrics,
    /// VictoriaLogs (LogsQL stats queries).
    #[serde(rename = "vmlogs", alias = "logs")]
    Logs,
}

impl DatasourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metrics => "vm",
            Self::Logs => "vmlogs",
        }
    }
}

impl fmt::Display for DatasourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vm" | "metrics" => Ok(Self::Metrics),
            "vmlogs" | "logs" => Ok(Self::Logs),
            other => Err(format!("unknown datasource type: {other}")),
        }
    }
}

/// Body of `POST /api/v1/anomaly_detection/tasks`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionTaskRequest {
    pub query: String,
    pub model_spec: JsonObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fit_window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fit_every: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_infer_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_infer_s: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infer_every: Option<String>,
    pub exact: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datasource_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datasource_type: Option<DatasourceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Forward the session's `Authorization` header instead of the configured one.
    #[serde(skip)]
    pub pass_auth_headers: bool,
}

/// Lifecycle state of a detection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Done,
    Error,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
            Self::Canceled => "canceled",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Canceled)
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreated {
    pub task_id: String,
    pub status: TaskState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub status: TaskState,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub metrics: JsonObject,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskList {
    #[serde(default)]
    pub tasks: Vec<TaskStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCancellation {
    pub canceled: bool,
}

/// Detection capacity of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionLimits {
    pub max_concurrent: u32,
    pub running: u32,
    pub available: u32,
}

impl DetectionLimits {
    /// Share of capacity in use, truncated toward zero.
    pub fn usage_percent(&self) -> u32 {
        if self.max_concurrent == 0 {
            return 0;
        }
        let percent = u64::from(self.running) * 100 / u64::from(self.max_concurrent);
        u32::try_from(percent).unwrap_or(u32::MAX)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Queries
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `POST /api/v1/query`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datasource_type: Option<DatasourceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Any non-empty value bypasses the datasource cache.
    pub nocache: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datasource_url: Option<String>,
    #[serde(skip)]
    pub pass_auth_headers: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Compatibility
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub runtime_version: String,
    #[serde(default)]
    pub stored_version: Option<String>,
    pub global_check: GlobalCheck,
    #[serde(default)]
    pub component_assessment: Option<ComponentAssessment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalCheck {
    pub has_state: bool,
    pub is_compatible: bool,
    pub drop_everything: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentAssessment {
    #[serde(default)]
    pub models_to_purge: Vec<String>,
    #[serde(default)]
    pub should_purge_reader_data: bool,
    #[serde(default)]
    pub issues: Vec<CompatibilityIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityIssue {
    pub component: String,
    #[serde(default)]
    pub subcomponent: Option<String>,
    #[serde(default)]
    pub requirement: Option<VersionRequirement>,
    #[serde(default)]
    pub affected_entities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRequirement {
    #[serde(default)]
    pub runtime_version: Option<String>,
    #[serde(default)]
    pub origin_version: Option<String>,
    #[serde(default)]
    pub min_state_version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_usage_percent_truncates() {
        let limits = DetectionLimits {
            max_concurrent: 3,
            running: 2,
            available: 1,
        };
        assert_eq!(limits.usage_percent(), 66);
    }

    #[test]
    fn test_usage_percent_zero_capacity() {
        let limits = DetectionLimits {
            max_concurrent: 0,
            running: 0,
            available: 0,
        };
        assert_eq!(limits.usage_percent(), 0);
    }

    #[test]
    fn test_task_request_omits_absent_fields() {
        let mut spec = JsonObject::new();
        spec.insert("class".into(), json!("zscore"));
        let req = DetectionTaskRequest {
            query: "up".into(),
            model_spec: spec,
            anomaly_threshold: Some(0.0),
            ..Default::default()
        };

        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(body["anomaly_threshold"], json!(0.0));
        assert!(body.get("step").is_none());
        assert!(body.get("pass_auth_headers").is_none());
        assert_eq!(body["exact"], json!(false));
    }

    #[test]
    fn test_task_state_tolerates_unknown_values() {
        let state: TaskState = serde_json::from_value(json!("paused")).unwrap();
        assert_eq!(state, TaskState::Unknown);
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_datasource_type_accepts_aliases() {
        assert_eq!("metrics".parse::<DatasourceType>(), Ok(DatasourceType::Metrics));
        assert_eq!("VMLOGS".parse::<DatasourceType>(), Ok(DatasourceType::Logs));
        assert!("prometheus".parse::<DatasourceType>().is_err());
        assert_eq!(
            serde_json::to_value(DatasourceType::Logs).unwrap(),
            json!("vmlogs")
        );
    }

    #[test]
    fn test_config_validation_accepts_legacy_field() {
        let parsed: ConfigValidation =
            serde_json::from_value(json!({"valid": false, "errors": ["bad"]})).unwrap();
        assert!(!parsed.is_valid);
        assert_eq!(parsed.errors.len(), 1);
    }

    #[test]
    fn test_alert_rule_query_pairs_skip_absent() {
        let req = AlertRuleRequest {
            step: "1m".into(),
            query: "up".into(),
            rule_name: Some("r".into()),
            ..Default::default()
        };
        let keys: Vec<_> = req.query_pairs().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["step", "query", "rule_name"]);
    }
}
