//! # Stoker Webhook
//!
//! Serves the mutating admission webhook and the push receiver behind one
//! axum `Router` (§4.5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};

use stoker::config::WebhookConfig;
use stoker::observability::{init_tracing, metrics};
use stoker::server::{start_server, ServerState};
use stoker::webhook;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");
    metrics::register_metrics().context("failed to register controller metrics")?;

    let config = WebhookConfig::from_env();
    info!(listen_port = config.listen_port, "starting stoker-webhook");

    let client = kube::Client::try_default()
        .await
        .context("failed to build Kubernetes client")?;

    let state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(true)),
        is_alive: Arc::new(AtomicBool::new(true)),
        gather: metrics::gather,
    });
    let probe_port = config.metrics_port;
    let probe_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = start_server(probe_port, probe_state).await {
            error!(error = %e, "probe HTTP server exited");
        }
    });

    let app = webhook::router(client, config.clone());
    let addr = format!("0.0.0.0:{}", config.listen_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("webhook server listening on {}", addr);
    state.is_ready.store(true, Ordering::Relaxed);
    axum::serve(listener, app).await.context("webhook server exited")
}
