//! vmanomaly MCP server
//!
//! Exposes the VictoriaMetrics anomaly detection service (vmanomaly) HTTP API
//! as Model Context Protocol tools.
//!
//! # Architecture
//!
//! - **Upstream client**: one typed method per vmanomaly endpoint, with shared
//!   auth, timeout/cancellation and error handling
//! - **Tools**: deny-list filtered registry turning client calls into MCP tools
//! - **Server**: stdio, streamable HTTP or SSE transport with health probes,
//!   metrics and a graceful drain on shutdown
//!
//! # Modules
//!
//! - [`config`]: CLI, environment and file configuration
//! - [`upstream`]: vmanomaly HTTP client
//! - [`tools`]: MCP tool implementations and registry
//! - [`docs`]: embedded documentation search
//! - [`mcp`]: MCP handler and transports
//! - [`server`]: lifecycle orchestration
//! - [`telemetry`]: logging and metrics setup

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod docs;
pub mod mcp;
pub mod server;
pub mod telemetry;
pub mod tools;
pub mod upstream;
