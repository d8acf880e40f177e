//! MCP protocol surface.
//!
//! [`AnomalyServer`] is transport-agnostic; the streaming (`/mcp`) and
//! pub/sub (`/sse` + `/message`) adapters are separate routers composed onto
//! one listener by the server module.

mod handler;
pub mod sse;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use tokio_util::sync::CancellationToken;

pub use handler::AnomalyServer;
pub use sse::SseTransport;

use crate::server::StateCell;

pub const STREAMABLE_PATH: &str = "/mcp";

const SESSION_HEADER: &str = "mcp-session-id";

/// Streamable HTTP router served at `/mcp`.
///
/// `keep_alive` is the SSE heartbeat interval; `None` disables it.
/// Cancelling `sessions` ends every open session and its streams.
pub fn streamable_router(
    handler: AnomalyServer,
    keep_alive: Option<Duration>,
    state: StateCell,
    sessions: CancellationToken,
) -> Router {
    let config = StreamableHttpServerConfig {
        sse_keep_alive: keep_alive,
        stateful_mode: true,
        cancellation_token: sessions,
        ..Default::default()
    };
    let service = StreamableHttpService::new(
        move || Ok(handler.clone()),
        Arc::new(LocalSessionManager::default()),
        config,
    );
    Router::new()
        .nest_service(STREAMABLE_PATH, service)
        .layer(middleware::from_fn_with_state(state, reject_new_sessions))
}

/// Refuse session-opening requests once draining has started.
async fn reject_new_sessions(State(state): State<StateCell>, request: Request, next: Next) -> Response {
    let opens_session =
        request.method() == Method::POST && !request.headers().contains_key(SESSION_HEADER);
    if opens_session && !state.accepts_sessions() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down\n").into_response();
    }
    if opens_session {
        metrics::counter!("mcp_sessions_total", "transport" => "streamable_http").increment(1);
    }
    next.run(request).await
}
