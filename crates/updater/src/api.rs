//! Health and metrics endpoints
//!
//! The probes a deployment points at the updater. Liveness follows component
//! health; readiness additionally requires a recently completed tick, so a
//! wedged loop drops out of rotation before it crashes. `/metrics` exposes
//! the eviction pipeline counters from the global registry.

use anyhow::Context;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use tracing::info;
use updater_lib::{ComponentStatus, HealthRegistry};

pub fn router(health: HealthRegistry) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(health)
}

/// Liveness: degraded components still count as alive, only a failed one
/// flips the probe.
async fn healthz(State(health): State<HealthRegistry>) -> impl IntoResponse {
    let report = health.health().await;
    let code = if report.status == ComponentStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(report))
}

/// Readiness: unready until startup wiring completes, and again whenever the
/// last completed tick is older than the activity timeout.
async fn readyz(State(health): State<HealthRegistry>) -> impl IntoResponse {
    let readiness = health.readiness().await;
    let code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(readiness))
}

/// Prometheus exposition of the updater metric families.
async fn metrics() -> Response {
    let mut buffer = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&prometheus::gather(), &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("encoding metrics: {err}"),
        )
            .into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Bind and serve the probe endpoints until the process exits.
pub async fn serve(port: u16, health: HealthRegistry) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding probe listener on port {port}"))?;
    info!(port, "Serving health and metrics endpoints");

    axum::serve(listener, router(health))
        .await
        .context("probe server exited")
}
