//! Publish/subscribe MCP transport over HTTP.
//!
//! `GET /sse` opens a session: the first event (`endpoint`) tells the client
//! where to POST, every later event (`message`) carries one JSON-RPC message
//! from the server. `POST /message?sessionId=<id>` delivers client messages.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::{StreamExt, stream};
use rmcp::ServiceExt;
use rmcp::model::{ClientJsonRpcMessage, GetExtensions, ServerJsonRpcMessage};
use serde::Deserialize;
use tokio::sync::{RwLock, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, PollSender};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AnomalyServer;
use crate::server::StateCell;

pub const SSE_PATH: &str = "/sse";
pub const MESSAGE_PATH: &str = "/message";

const CHANNEL_CAPACITY: usize = 64;

type Sessions = Arc<RwLock<HashMap<String, mpsc::Sender<ClientJsonRpcMessage>>>>;

/// SSE transport state shared by both routes.
#[derive(Clone)]
pub struct SseTransport {
    handler: AnomalyServer,
    sessions: Sessions,
    keep_alive: Option<Duration>,
    state: StateCell,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for SseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseTransport")
            .field("keep_alive", &self.keep_alive)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl SseTransport {
    /// `shutdown` closes every open event stream when cancelled.
    pub fn new(
        handler: AnomalyServer,
        keep_alive: Option<Duration>,
        state: StateCell,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            handler,
            sessions: Arc::default(),
            keep_alive,
            state,
            shutdown,
        }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route(SSE_PATH, get(open_stream))
            .route(MESSAGE_PATH, post(post_message))
            .with_state(self)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

async fn open_stream(State(transport): State<SseTransport>) -> Response {
    if !transport.state.accepts_sessions() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down\n").into_response();
    }

    let session_id = Uuid::new_v4().simple().to_string();
    let (client_tx, client_rx) = mpsc::channel::<ClientJsonRpcMessage>(CHANNEL_CAPACITY);
    let (server_tx, server_rx) = mpsc::channel::<ServerJsonRpcMessage>(CHANNEL_CAPACITY);
    transport
        .sessions
        .write()
        .await
        .insert(session_id.clone(), client_tx);

    metrics::counter!("mcp_sessions_total", "transport" => "sse").increment(1);
    info!(name: "sse.session_opened", session_id = %session_id, "SSE session opened");

    let handler = transport.handler.clone();
    let sessions = Arc::clone(&transport.sessions);
    let id = session_id.clone();
    tokio::spawn(async move {
        let closed = server_tx.clone();
        let io = (PollSender::new(server_tx), ReceiverStream::new(client_rx));
        let session = async move {
            match handler.serve(io).await {
                Ok(service) => service.waiting().await.map(drop).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            }
        };
        // Dropping the session future cancels the running service.
        tokio::select! {
            result = session => {
                if let Err(error) = result {
                    warn!(name: "sse.session_failed", session_id = %id, error = %error, "SSE session failed");
                }
            }
            () = closed.closed() => {
                debug!(name: "sse.stream_closed", session_id = %id, "SSE stream closed by peer");
            }
        }
        sessions.write().await.remove(&id);
        info!(name: "sse.session_closed", session_id = %id, "SSE session closed");
    });

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("{MESSAGE_PATH}?sessionId={session_id}"));
    let messages = ReceiverStream::new(server_rx).filter_map(|message| async move {
        match serde_json::to_string(&message) {
            Ok(data) => Some(Event::default().event("message").data(data)),
            Err(e) => {
                warn!(name: "sse.encode_failed", error = %e, "Dropping unencodable server message");
                None
            }
        }
    });
    let events = stream::once(async { endpoint })
        .chain(messages)
        .map(Ok::<_, Infallible>)
        .take_until(transport.shutdown.clone().cancelled_owned());

    let sse = Sse::new(events);
    match transport.keep_alive {
        Some(interval) => sse.keep_alive(KeepAlive::new().interval(interval)).into_response(),
        None => sse.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: String,
}

async fn post_message(
    State(transport): State<SseTransport>,
    Query(query): Query<MessageQuery>,
    parts: Parts,
    body: Bytes,
) -> Response {
    let mut message: ClientJsonRpcMessage = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            debug!(name: "sse.bad_message", session_id = %query.session_id, error = %e, "Malformed JSON-RPC message");
            return (StatusCode::BAD_REQUEST, format!("invalid JSON-RPC message: {e}\n"))
                .into_response();
        }
    };

    let Some(sender) = transport.sessions.read().await.get(&query.session_id).cloned() else {
        return (StatusCode::NOT_FOUND, "Session not found\n").into_response();
    };

    // Gives tool calls access to the inbound headers, as the streamable transport does.
    if let ClientJsonRpcMessage::Request(request) = &mut message {
        request.request.extensions_mut().insert(parts);
    }

    if sender.send(message).await.is_err() {
        return (StatusCode::NOT_FOUND, "Session closed\n").into_response();
    }
    StatusCode::ACCEPTED.into_response()
}
