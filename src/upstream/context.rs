//! Per-call context carried from the MCP request into the upstream call.

use std::time::Duration;

use reqwest::header::HeaderValue;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation, deadline and inbound credentials for one tool invocation.
///
/// The token is usually the one rmcp hands out per request, so a client
/// cancelling the MCP request aborts the in-flight backend call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    inbound_authorization: Option<HeaderValue>,
}

impl CallContext {
    /// Context with a fresh token and no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context bound to an existing cancellation token.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Attach the `Authorization` header of the inbound MCP request.
    #[must_use]
    pub fn with_inbound_authorization(mut self, value: Option<HeaderValue>) -> Self {
        self.inbound_authorization = value;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn inbound_authorization(&self) -> Option<&HeaderValue> {
        self.inbound_authorization.as_ref()
    }
}
