//! # Kind Cluster Setup Utilities
//!
//! Utilities for managing Kind clusters for integration tests. Provides
//! functions to ensure a cluster exists, apply the `GatewaySync` CRD, and
//! wait for the reconciler deployment to come up.

use anyhow::{Context, Result};
use kube::api::Api;
use kube::Client;
use std::process::Command;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

/// Ensure a Kind cluster exists and return a client connected to it.
///
/// Checks if a Kind cluster with the given name exists; does not create one
/// automatically (CI provisions the cluster, local runs are expected to
/// `kind create cluster --name <name>` first).
pub async fn ensure_kind_cluster(name: &str) -> Result<Client> {
    info!("checking if Kind cluster '{}' exists...", name);

    let output = Command::new("kubectl")
        .args(["cluster-info", "--context", &format!("kind-{name}")])
        .output();

    match output {
        Ok(output) if output.status.success() => {
            info!("Kind cluster '{}' already exists", name);
        }
        _ => {
            warn!(
                "cluster '{}' not found; in CI the workflow provisions it, locally run: \
                 kind create cluster --name {}",
                name, name
            );
        }
    }

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client, ensure the cluster is accessible")?;

    Ok(client)
}

/// Waits for the `stoker-controller` deployment's `Available` condition.
pub async fn wait_for_controller_ready(client: &Client, namespace: &str, timeout: Duration) -> Result<()> {
    use k8s_openapi::api::apps::v1::Deployment;

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);

    let start = Instant::now();
    while start.elapsed() < timeout {
        if let Ok(deployment) = deployments.get("stoker-controller").await {
            if let Some(status) = &deployment.status {
                if let Some(conditions) = &status.conditions {
                    if conditions
                        .iter()
                        .any(|c| c.type_ == "Available" && c.status == "True")
                    {
                        info!("stoker-controller deployment is ready");
                        return Ok(());
                    }
                }
            }
        }

        sleep(Duration::from_millis(500)).await;
    }

    Err(anyhow::anyhow!(
        "stoker-controller deployment did not become ready within {:?}",
        timeout
    ))
}

/// Applies the `GatewaySync` CRD from the `crdgen` binary's output, so
/// integration tests don't depend on a pre-applied manifest being present.
pub async fn ensure_gatewaysync_crd(client: &Client) -> Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};
    use kube::CustomResourceExt;

    let crd = stoker::GatewaySync::crd();
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    api.patch(
        "gatewaysyncs.stoker.io",
        &PatchParams::apply("stoker-integration-tests").force(),
        &Patch::Apply(&crd),
    )
    .await
    .context("failed to apply GatewaySync CRD")?;

    wait_for_crd_established(client, "gatewaysyncs.stoker.io", Duration::from_secs(30)).await
}

async fn wait_for_crd_established(client: &Client, name: &str, timeout: Duration) -> Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;

    let api: Api<CustomResourceDefinition> = Api::all(client.clone());
    let start = Instant::now();
    while start.elapsed() < timeout {
        if let Ok(crd) = api.get(name).await {
            if let Some(status) = &crd.status {
                if status
                    .conditions
                    .as_ref()
                    .is_some_and(|cs| cs.iter().any(|c| c.type_ == "Established" && c.status == "True"))
                {
                    return Ok(());
                }
            }
        }
        sleep(Duration::from_millis(300)).await;
    }
    Err(anyhow::anyhow!("CRD '{}' did not become established within {:?}", name, timeout))
}
