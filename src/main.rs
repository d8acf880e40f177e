//! vmanomaly MCP server
//!
//! Entry point: load configuration, set up telemetry, serve until shutdown.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use dotenvy::dotenv;
use tracing::info;

use vmanomaly_mcp::config::AppConfig;
use vmanomaly_mcp::server::{Orchestrator, shutdown_signal};
use vmanomaly_mcp::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    telemetry::init(&config.logging);
    let metrics = telemetry::install_metrics()?;

    info!(
        name: "config.loaded",
        endpoint = %config.backend.base_url(),
        mode = config.server.mode.as_str(),
        listen_addr = %config.server.listen_addr,
        disabled_tools = ?config.server.disabled_tools,
        resources = !config.server.disable_resources,
        "Configuration loaded"
    );

    Orchestrator::from_config(&config, metrics)
        .run(shutdown_signal())
        .await?;
    Ok(())
}
