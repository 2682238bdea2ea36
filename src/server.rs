//! # HTTP Server
//!
//! Shared HTTP scaffolding for metrics and Kubernetes probes, reused by
//! every binary in this crate (controller, agent, webhook) with its own
//! Prometheus registry supplied via `ServerState::gather`.
//!
//! Provides endpoints:
//! - `/metrics` - Prometheus metrics in text format
//! - `/healthz` - Liveness probe (always returns 200)
//! - `/readyz` - Readiness probe (returns 200 once `is_ready` is set)

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{proto::MetricFamily, Encoder, TextEncoder};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

pub struct ServerState {
    pub is_ready: Arc<AtomicBool>,
    /// Liveness flag. The controller and webhook binaries leave this `true`
    /// for their whole lifetime; the agent clears it when its poll loop has
    /// not observed the metadata document within `2 * syncPeriod` (§4.3
    /// "Observability").
    pub is_alive: Arc<AtomicBool>,
    pub gather: fn() -> Vec<MetricFamily>,
}

pub async fn start_server(port: u16, state: Arc<ServerState>) -> Result<(), anyhow::Error> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = (state.gather)();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}

async fn healthz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_alive.load(std::sync::atomic::Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_ready.load(std::sync::atomic::Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

