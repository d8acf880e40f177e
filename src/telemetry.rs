//! Logging and metrics initialisation.

use std::fs::OpenOptions;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tokio::task::JoinHandle;
use tracing::warn;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingConfig};

/// Install the global tracing subscriber.
///
/// Logs never go to stdout, which carries the stdio transport. `RUST_LOG`
/// overrides the configured level. An unwritable log file falls back to stderr.
pub fn init(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_directive()));

    let mut fallback = None;
    let (writer, ansi) = match &logging.file {
        Some(path) => match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => (BoxMakeWriter::new(Mutex::new(file)), false),
            Err(e) => {
                fallback = Some((path.clone(), e));
                (BoxMakeWriter::new(std::io::stderr), true)
            }
        },
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match logging.format {
        LogFormat::Text => fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .compact()
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();

    if let Some((path, error)) = fallback {
        warn!(
            name: "telemetry.log_file_unavailable",
            path = %path.display(),
            error = %error,
            "Cannot open log file, logging to stderr"
        );
    }
}

/// How often histogram buckets are drained when nothing scrapes `/metrics`.
pub const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Install the global Prometheus recorder and return the handle `/metrics` renders.
///
/// Must be called inside a Tokio runtime: it spawns the recorder upkeep task.
pub fn install_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    spawn_upkeep(handle.clone(), UPKEEP_INTERVAL);

    metrics::describe_counter!("mcp_tool_calls_total", "Tool invocations by tool and outcome");
    metrics::describe_histogram!(
        "mcp_tool_call_duration_seconds",
        metrics::Unit::Seconds,
        "Tool invocation latency"
    );
    metrics::describe_counter!("upstream_requests_total", "Requests sent to vmanomaly");
    metrics::describe_counter!("mcp_sessions_total", "MCP sessions opened by transport");
    metrics::describe_gauge!(
        "process_start_time_seconds",
        metrics::Unit::Seconds,
        "Start time of the process since unix epoch"
    );

    let started = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    metrics::gauge!("process_start_time_seconds").set(started);

    Ok(handle)
}

/// Periodically run recorder upkeep so histogram samples do not accumulate.
pub fn spawn_upkeep(handle: PrometheusHandle, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            handle.run_upkeep();
        }
    })
}
