//! # Stoker Controller
//!
//! Watches `GatewaySync` custom resources and drives their reconcile loop
//! (§4.4): resolves the Git ref, validates the spec, publishes the
//! metadata document, discovers gateway pods, and aggregates their
//! reported sync status into `status.conditions[]`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use stoker::config::ControllerConfig;
use stoker::controller::reconciler::run_controller;
use stoker::observability::{init_tracing, metrics};
use stoker::server::{start_server, ServerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");
    metrics::register_metrics().context("failed to register controller metrics")?;

    let config = ControllerConfig::from_env();
    info!(
        pod_namespace = %config.pod_namespace,
        metrics_port = config.metrics_port,
        "starting stoker-controller"
    );

    let client = kube::Client::try_default()
        .await
        .context("failed to build Kubernetes client")?;

    let state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(true)),
        is_alive: Arc::new(AtomicBool::new(true)),
        gather: metrics::gather,
    });

    let server_port = config.metrics_port;
    let server_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state).await {
            error!(error = %e, "HTTP server exited");
        }
    });

    run_controller(client, config).await
}
