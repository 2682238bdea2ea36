//! # Stoker Agent
//!
//! The adjunct process injected into gateway pods (§4.3). Polls the
//! metadata document on a fixed interval, syncs the live data directory
//! against the resolved commit, and publishes its own status entry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};

use stoker::agent::PollLoop;
use stoker::agent::metrics as agent_metrics;
use stoker::config::AgentConfig;
use stoker::observability::init_tracing;
use stoker::server::{start_server, ServerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");
    agent_metrics::register_metrics().context("failed to register agent metrics")?;

    let config = AgentConfig::from_env();
    info!(
        pod_name = %config.pod_name,
        cr_name = %config.cr_name,
        profile = %config.profile_name,
        "starting stoker-agent"
    );

    let client = kube::Client::try_default()
        .await
        .context("failed to build Kubernetes client")?;

    let is_ready = Arc::new(AtomicBool::new(false));
    let is_alive = Arc::new(AtomicBool::new(true));

    let server_port = config.metrics_port;
    let server_state = Arc::new(ServerState {
        is_ready: is_ready.clone(),
        is_alive: is_alive.clone(),
        gather: agent_metrics::gather,
    });
    tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state).await {
            error!(error = %e, "HTTP server exited");
        }
    });

    let shutdown_deadline = config.shutdown_deadline;
    let mut poll_loop = PollLoop::new(config, client, is_ready.clone(), is_alive)?;
    poll_loop.recover().await;
    is_ready.store(true, Ordering::Relaxed);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_task = tokio::spawn(poll_loop.run(shutdown_rx));

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }

    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(shutdown_deadline, run_task).await {
        Ok(Ok(())) => info!("poll loop exited cleanly"),
        Ok(Err(e)) => error!(error = %e, "poll loop task panicked"),
        Err(_) => warn!("poll loop did not exit within shutdown deadline, forcing exit"),
    }

    Ok(())
}
