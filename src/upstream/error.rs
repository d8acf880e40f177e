//! Error types for the vmanomaly client.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single upstream call.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// Connection, DNS, TLS or client-side timeout failure.
    #[error("network failure: {0}")]
    Network(#[from] NetworkFailure),

    /// The caller cancelled the call or its deadline passed.
    #[error("request cancelled or deadline exceeded")]
    Cancelled,

    /// The backend answered with a non-2xx status.
    #[error("vmanomaly returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body, verbatim.
        body: String,
    },

    /// A 2xx body did not match the expected shape.
    #[error("failed to decode vmanomaly response: {source}")]
    Decode {
        /// Raw response body, verbatim.
        body: String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl UpstreamError {
    /// HTTP status for [`UpstreamError::Status`] failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Cancelled => "cancelled",
            Self::Status { .. } => "status",
            Self::Decode { .. } => "decode",
        }
    }
}

/// Transport-level cause of [`UpstreamError::Network`].
#[derive(Error, Debug)]
pub enum NetworkFailure {
    /// reqwest could not complete the exchange.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// The client's own request timeout elapsed.
    #[error("no response within {0:?}")]
    TimedOut(Duration),
}

/// Rejected backend address.
#[derive(Error, Debug)]
pub enum BaseUrlError {
    /// Not parseable as a URL.
    #[error("invalid URL {url:?}: {source}")]
    Parse {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// Parsed, but cannot carry HTTP paths.
    #[error("{0:?} is not an http(s) URL")]
    Scheme(String),
}
