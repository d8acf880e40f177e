//! Upstream client core.
//!
//! Every outbound call to vmanomaly goes through [`VmAnomalyClient`], which
//! owns the auth/header policy, the request timeout and the error taxonomy.

mod client;
mod context;
mod error;
pub mod types;

pub use client::{AuthPolicy, ClientConfig, DEFAULT_TIMEOUT, RequestSpec, VmAnomalyClient};
pub use context::CallContext;
pub use error::{BaseUrlError, NetworkFailure, UpstreamError};
