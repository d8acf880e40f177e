//! Transport selection and the startup → listening → draining → stopped sequence.

use std::future::{Future, IntoFuture};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use rmcp::ServiceExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::{ServerError, ServerState, StateCell, routes};
use crate::config::{AppConfig, ServerMode};
use crate::docs::{DocsIndex, EmbeddedDocs};
use crate::mcp::{self, AnomalyServer, SseTransport};
use crate::tools::{ToolPolicy, ToolRegistry};
use crate::upstream::VmAnomalyClient;

/// Delays applied between a termination signal and process exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownTimings {
    /// Time between reporting not-ready and closing the listener.
    pub drain_delay: Duration,
    /// Bound on graceful connection shutdown.
    pub graceful_period: Duration,
    /// Extra time after sessions are forcibly cancelled.
    pub hard_cutoff: Duration,
}

impl Default for ShutdownTimings {
    fn default() -> Self {
        Self {
            drain_delay: Duration::from_secs(3),
            graceful_period: Duration::from_secs(15),
            hard_cutoff: Duration::from_secs(3),
        }
    }
}

/// Drives one server run from configuration to exit.
pub struct Orchestrator {
    mode: ServerMode,
    listen_addr: String,
    keep_alive: Option<Duration>,
    handler: AnomalyServer,
    metrics: PrometheusHandle,
    state: StateCell,
    timings: ShutdownTimings,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("mode", &self.mode)
            .field("listen_addr", &self.listen_addr)
            .field("keep_alive", &self.keep_alive)
            .field("state", &self.state)
            .field("timings", &self.timings)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build the client, registry and handler from configuration.
    pub fn from_config(config: &AppConfig, metrics: PrometheusHandle) -> Self {
        let client = Arc::new(VmAnomalyClient::new(config.backend.clone()));
        let docs: Arc<dyn DocsIndex> = Arc::new(EmbeddedDocs::new());
        let policy = ToolPolicy::new(config.server.disabled_tools.iter().cloned());
        let registry = ToolRegistry::builtin(client, Arc::clone(&docs), policy);
        let handler = AnomalyServer::new(registry, docs, !config.server.disable_resources);

        Self::new(config.server.mode, config.server.listen_addr.clone(), handler, metrics)
            .with_keep_alive(config.server.keep_alive())
    }

    pub fn new(
        mode: ServerMode,
        listen_addr: String,
        handler: AnomalyServer,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            mode,
            listen_addr,
            keep_alive: None,
            handler,
            metrics,
            state: StateCell::new(),
            timings: ShutdownTimings::default(),
        }
    }

    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Option<Duration>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    #[must_use]
    pub fn with_timings(mut self, timings: ShutdownTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Handle for observing the lifecycle from outside.
    pub fn state(&self) -> StateCell {
        self.state.clone()
    }

    /// Serve until `shutdown` resolves (network modes) or the session ends (stdio).
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self.mode {
            ServerMode::Stdio => self.serve_stdio().await,
            ServerMode::Http | ServerMode::Sse => self.bind().await?.serve(shutdown).await,
        }
    }

    async fn serve_stdio(self) -> Result<(), ServerError> {
        info!(name: "server.started", mode = "stdio", "Serving MCP over stdio");
        metrics::counter!("mcp_sessions_total", "transport" => "stdio").increment(1);

        let result = match self.handler.serve(rmcp::transport::stdio()).await {
            Ok(service) => match service.waiting().await {
                Ok(reason) => {
                    info!(name: "server.session_ended", reason = ?reason, "stdio session ended");
                    Ok(())
                }
                Err(e) => Err(ServerError::Session(e.to_string())),
            },
            Err(e) => Err(ServerError::Session(e.to_string())),
        };
        self.state.advance(ServerState::Stopped);
        result
    }

    /// Bind the listener for a network mode.
    ///
    /// A bind failure moves the state straight to `Stopped`.
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        let listener = match TcpListener::bind(&self.listen_addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.state.advance(ServerState::Stopped);
                return Err(ServerError::Bind {
                    addr: self.listen_addr,
                    source,
                });
            }
        };

        let sessions = CancellationToken::new();
        let transport = match self.mode {
            ServerMode::Sse => SseTransport::new(
                self.handler.clone(),
                self.keep_alive,
                self.state.clone(),
                sessions.clone(),
            )
            .router(),
            ServerMode::Http | ServerMode::Stdio => mcp::streamable_router(
                self.handler.clone(),
                self.keep_alive,
                self.state.clone(),
                sessions.clone(),
            ),
        };
        let router = Router::new()
            .merge(routes::health_router(self.state.clone(), self.metrics.clone()))
            .merge(transport)
            .layer(TraceLayer::new_for_http());

        Ok(BoundServer {
            mode: self.mode,
            listener,
            router,
            state: self.state,
            sessions,
            timings: self.timings,
        })
    }
}

/// A network server whose listener is bound but not yet accepting.
#[derive(Debug)]
pub struct BoundServer {
    mode: ServerMode,
    listener: TcpListener,
    router: Router,
    state: StateCell,
    sessions: CancellationToken,
    timings: ShutdownTimings,
}

impl BoundServer {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> StateCell {
        self.state.clone()
    }

    /// Accept connections until `shutdown` resolves, then drain and stop.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr().map_err(ServerError::Serve)?;
        let graceful = CancellationToken::new();
        let server = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(graceful.clone().cancelled_owned());
        let mut task: JoinHandle<io::Result<()>> = tokio::spawn(server.into_future());

        self.state.advance(ServerState::Listening);
        info!(
            name: "server.started",
            address = %addr,
            mode = self.mode.as_str(),
            "Server started"
        );

        tokio::select! {
            () = shutdown => {}
            exited = &mut task => {
                // The listener stopped on its own; nothing left to drain.
                self.state.advance(ServerState::Stopped);
                return flatten(exited);
            }
        }

        self.state.advance(ServerState::Draining);
        info!(
            name: "server.draining",
            drain_delay_ms = duration_ms(self.timings.drain_delay),
            "Termination signal received, reporting not ready"
        );
        tokio::time::sleep(self.timings.drain_delay).await;

        info!(name: "server.shutting_down", "Closing listener");
        graceful.cancel();
        let result = match tokio::time::timeout(self.timings.graceful_period, &mut task).await {
            Ok(exited) => flatten(exited),
            Err(_) => {
                warn!(
                    name: "server.shutdown_timeout",
                    graceful_period_ms = duration_ms(self.timings.graceful_period),
                    "Graceful shutdown timed out, cancelling open sessions"
                );
                self.sessions.cancel();
                match tokio::time::timeout(self.timings.hard_cutoff, &mut task).await {
                    Ok(exited) => flatten(exited),
                    Err(_) => {
                        warn!(name: "server.forced_stop", "Hard cutoff reached, aborting listener");
                        task.abort();
                        Ok(())
                    }
                }
            }
        };

        self.sessions.cancel();
        self.state.advance(ServerState::Stopped);
        info!(name: "server.stopped", "Server stopped");
        result
    }
}

fn flatten(exited: Result<io::Result<()>, tokio::task::JoinError>) -> Result<(), ServerError> {
    match exited {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ServerError::Serve(e)),
        Err(e) => Err(ServerError::Task(e)),
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
