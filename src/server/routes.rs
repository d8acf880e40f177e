//! Health, readiness and metrics endpoints.

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;

use super::StateCell;

pub const LIVENESS_PATH: &str = "/health/liveness";
pub const READINESS_PATH: &str = "/health/readiness";
pub const METRICS_PATH: &str = "/metrics";

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Clone)]
struct HealthState {
    state: StateCell,
    metrics: PrometheusHandle,
}

/// Probe and metrics routes, independent of the MCP transport in use.
pub fn health_router(state: StateCell, metrics: PrometheusHandle) -> Router {
    Router::new()
        .route(LIVENESS_PATH, get(liveness))
        .route(READINESS_PATH, get(readiness))
        .route(METRICS_PATH, get(render_metrics))
        .with_state(HealthState { state, metrics })
}

fn plain(status: StatusCode, body: &'static str) -> Response {
    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

async fn liveness() -> Response {
    plain(StatusCode::OK, "OK\n")
}

async fn readiness(State(health): State<HealthState>) -> Response {
    if health.state.is_ready() {
        plain(StatusCode::OK, "Ready\n")
    } else {
        plain(StatusCode::SERVICE_UNAVAILABLE, "Not ready\n")
    }
}

async fn render_metrics(State(health): State<HealthState>) -> Response {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        health.metrics.render(),
    )
        .into_response()
}
