//! Server lifecycle: transport modes, probes, signals and graceful drain.

mod lifecycle;
pub mod routes;
mod state;

use std::io;

use thiserror::Error;
use tracing::info;

pub use lifecycle::{BoundServer, Orchestrator, ShutdownTimings};
pub use state::{ServerState, StateCell};

/// Fatal lifecycle failure; the process exits non-zero.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The listener failed while serving.
    #[error("listener failed: {0}")]
    Serve(#[source] io::Error),

    /// The server task panicked or was cancelled.
    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The stdio session could not start or ended abnormally.
    #[error("MCP session failed: {0}")]
    Session(String),
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(name: "server.signal_error", error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(name: "server.signal_error", error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!(name: "server.signal", signal = "SIGINT", "Received termination signal"),
        () = terminate => info!(name: "server.signal", signal = "SIGTERM", "Received termination signal"),
    }
}
