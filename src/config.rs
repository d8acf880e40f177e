//! Startup configuration.
//!
//! Precedence: CLI flag > CLI-bound environment variable > `VMANOMALY_MCP__*`
//! environment > config file > defaults. Everything is validated once here;
//! the rest of the crate only sees typed values.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use clap::builder::BoolishValueParser;
use config::{Config, Environment, File};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use thiserror::Error;

use crate::upstream::{BaseUrlError, ClientConfig};

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// vmanomaly base URL, e.g. http://localhost:8490
    #[arg(long, env = "VMANOMALY_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Bearer token sent to vmanomaly
    #[arg(long, env = "VMANOMALY_BEARER_TOKEN", hide_env_values = true)]
    pub bearer_token: Option<String>,

    /// Extra headers sent to vmanomaly, as k=v,k2=v2
    #[arg(long, env = "VMANOMALY_HEADERS")]
    pub headers: Option<String>,

    /// Upper bound for each vmanomaly request, e.g. 30s
    #[arg(long, env = "VMANOMALY_TIMEOUT")]
    pub request_timeout: Option<String>,

    /// Transport: stdio, http or sse
    #[arg(long, env = "MCP_SERVER_MODE")]
    pub mode: Option<String>,

    /// Listen address for http and sse modes
    #[arg(long, env = "MCP_LISTEN_ADDR")]
    pub listen_addr: Option<String>,

    /// Comma-separated tool names to hide
    #[arg(long, env = "MCP_DISABLED_TOOLS")]
    pub disabled_tools: Option<String>,

    /// Keep-alive interval for streaming transports; 0s disables it
    #[arg(long, env = "MCP_HEARTBEAT_INTERVAL")]
    pub heartbeat_interval: Option<String>,

    /// Do not expose documentation resources
    #[arg(long, env = "MCP_DISABLE_RESOURCES", value_parser = BoolishValueParser::new())]
    pub disable_resources: Option<bool>,

    /// debug, info, warn or error
    #[arg(long, env = "MCP_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long, env = "MCP_LOG_FILE")]
    pub log_file: Option<String>,

    /// text or json
    #[arg(long, env = "MCP_LOG_FORMAT")]
    pub log_format: Option<String>,
}

/// Invalid or missing configuration. Always fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Sources could not be read or merged.
    #[error(transparent)]
    Source(#[from] config::ConfigError),

    #[error("VMANOMALY_ENDPOINT is required")]
    MissingEndpoint,

    #[error("invalid VMANOMALY_ENDPOINT: {0}")]
    Endpoint(#[from] BaseUrlError),

    #[error("MCP_SERVER_MODE must be 'stdio', 'http' or 'sse', got {0:?}")]
    Mode(String),

    #[error("MCP_LOG_LEVEL must be 'debug', 'info', 'warn' or 'error', got {0:?}")]
    LogLevel(String),

    #[error("MCP_LOG_FORMAT must be 'text' or 'json', got {0:?}")]
    LogFormat(String),

    #[error("invalid {setting} {value:?}: {source}")]
    Duration {
        setting: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("{0} must not be negative")]
    NegativeDuration(&'static str),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("invalid custom header {name:?}: {reason}")]
    Header { name: String, reason: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed settings
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    /// One session over stdin/stdout.
    Stdio,
    /// Streamable HTTP at `/mcp`.
    Http,
    /// Server-sent events at `/sse` + `/message`.
    Sse,
}

impl ServerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
            Self::Sse => "sse",
        }
    }
}

impl FromStr for ServerMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "http" => Ok(Self::Http),
            "sse" => Ok(Self::Sse),
            _ => Err(ConfigError::Mode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`.
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(ConfigError::LogLevel(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::LogFormat(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: ClientConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub mode: ServerMode,
    pub listen_addr: String,
    pub disabled_tools: BTreeSet<String>,
    pub heartbeat_interval: Duration,
    pub disable_resources: bool,
}

impl ServerConfig {
    /// Keep-alive interval, `None` when disabled.
    pub fn keep_alive(&self) -> Option<Duration> {
        (!self.heartbeat_interval.is_zero()).then_some(self.heartbeat_interval)
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
    pub format: LogFormat,
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawConfig {
    backend: RawBackend,
    server: RawServer,
    logging: RawLogging,
}

#[derive(Debug, Deserialize)]
struct RawBackend {
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    bearer_token: Option<String>,
    #[serde(default)]
    headers: Option<String>,
    timeout: String,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    mode: String,
    listen_addr: String,
    #[serde(default)]
    disabled_tools: Option<String>,
    heartbeat_interval: String,
    disable_resources: bool,
}

#[derive(Debug, Deserialize)]
struct RawLogging {
    level: String,
    #[serde(default)]
    file: Option<String>,
    format: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("backend.timeout", "30s")?
            .set_default("server.mode", "stdio")?
            .set_default("server.listen_addr", "localhost:8080")?
            .set_default("server.heartbeat_interval", "30s")?
            .set_default("server.disable_resources", false)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "text")?;

        if let Some(path) = &cli.config {
            builder = builder.add_source(File::with_name(path));
        }

        // E.g. VMANOMALY_MCP__SERVER__LISTEN_ADDR=0.0.0.0:8080
        builder = builder.add_source(
            Environment::with_prefix("VMANOMALY_MCP")
                .prefix_separator("__")
                .separator("__"),
        );

        // clap already folded the plain env vars (VMANOMALY_ENDPOINT, MCP_*) into `cli`.
        let overrides: [(&str, Option<String>); 11] = [
            ("backend.endpoint", cli.endpoint),
            ("backend.bearer_token", cli.bearer_token),
            ("backend.headers", cli.headers),
            ("backend.timeout", cli.request_timeout),
            ("server.mode", cli.mode),
            ("server.listen_addr", cli.listen_addr),
            ("server.disabled_tools", cli.disabled_tools),
            ("server.heartbeat_interval", cli.heartbeat_interval),
            ("logging.level", cli.log_level),
            ("logging.file", cli.log_file),
            ("logging.format", cli.log_format),
        ];
        for (key, value) in overrides {
            if let Some(value) = value {
                builder = builder.set_override(key, value)?;
            }
        }
        if let Some(disable) = cli.disable_resources {
            builder = builder.set_override("server.disable_resources", disable)?;
        }

        let raw: RawConfig = builder.build()?.try_deserialize()?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let endpoint = raw
            .backend
            .endpoint
            .filter(|e| !e.trim().is_empty())
            .ok_or(ConfigError::MissingEndpoint)?;
        let timeout = parse_duration("VMANOMALY_TIMEOUT", &raw.backend.timeout)?;
        if timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("VMANOMALY_TIMEOUT"));
        }
        let backend = ClientConfig::new(&endpoint)?
            .with_bearer_token(raw.backend.bearer_token)
            .with_headers(parse_headers(raw.backend.headers.as_deref().unwrap_or_default())?)
            .with_timeout(timeout);

        let server = ServerConfig {
            mode: raw.server.mode.parse()?,
            listen_addr: raw.server.listen_addr,
            disabled_tools: parse_tool_list(raw.server.disabled_tools.as_deref().unwrap_or_default()),
            heartbeat_interval: parse_duration(
                "MCP_HEARTBEAT_INTERVAL",
                &raw.server.heartbeat_interval,
            )?,
            disable_resources: raw.server.disable_resources,
        };

        let logging = LoggingConfig {
            level: raw.logging.level.parse()?,
            file: raw
                .logging
                .file
                .filter(|f| !f.trim().is_empty())
                .map(PathBuf::from),
            format: raw.logging.format.parse()?,
        };

        Ok(Self {
            backend,
            server,
            logging,
        })
    }
}

fn parse_duration(setting: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    if value.starts_with('-') {
        return Err(ConfigError::NegativeDuration(setting));
    }
    humantime::parse_duration(value).map_err(|source| ConfigError::Duration {
        setting,
        value: value.to_string(),
        source,
    })
}

/// Parse `k=v,k2=v2`. Entries without `=` or with an empty side are skipped.
pub fn parse_headers(raw: &str) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    for pair in raw.split(',') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() || value.is_empty() {
            continue;
        }
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::Header {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| ConfigError::Header {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Parse a comma-separated tool list, dropping blanks.
pub fn parse_tool_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(|t| t.trim_matches(|c| c == ' ' || c == ','))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_headers_skips_malformed_entries() {
        let headers = parse_headers(" X-Org = acme ,broken,=v,k=, X-Env=prod").unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["x-org"], "acme");
        assert_eq!(headers["x-env"], "prod");
    }

    #[test]
    fn test_parse_headers_rejects_invalid_name() {
        assert!(matches!(
            parse_headers("bad header=v"),
            Err(ConfigError::Header { .. })
        ));
    }

    #[test]
    fn test_parse_tool_list() {
        let tools = parse_tool_list(" vmanomaly_cancel_task, ,vmanomaly_query_metrics,,");
        assert_eq!(
            tools.into_iter().collect::<Vec<_>>(),
            vec!["vmanomaly_cancel_task", "vmanomaly_query_metrics"]
        );
        assert!(parse_tool_list("").is_empty());
    }

    #[test]
    fn test_parse_duration_rejects_negative() {
        assert!(matches!(
            parse_duration("MCP_HEARTBEAT_INTERVAL", "-5s"),
            Err(ConfigError::NegativeDuration(_))
        ));
        assert_eq!(
            parse_duration("MCP_HEARTBEAT_INTERVAL", "1m 30s").unwrap(),
            Duration::from_secs(90)
        );
        assert!(parse_duration("MCP_HEARTBEAT_INTERVAL", "soon").is_err());
    }

    #[test]
    fn test_mode_and_level_parsing() {
        assert_eq!("SSE".parse::<ServerMode>().unwrap(), ServerMode::Sse);
        assert!(matches!("grpc".parse::<ServerMode>(), Err(ConfigError::Mode(_))));
        assert_eq!("Warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("trace".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_zero_heartbeat_disables_keep_alive() {
        let server = ServerConfig {
            mode: ServerMode::Http,
            listen_addr: "localhost:8080".into(),
            disabled_tools: BTreeSet::new(),
            heartbeat_interval: Duration::ZERO,
            disable_resources: false,
        };
        assert_eq!(server.keep_alive(), None);
    }
}
