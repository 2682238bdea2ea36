//! # Reconciler
//!
//! Wires the per-step logic in `reconcile::*` into a `kube_runtime::Controller`
//! reconcile function: the finalizer protocol (§3 "Lifecycle"), condition
//! computation (§4.4 step 7), and the annotation-driven fast path (§4.4).
//!
//! The finalizer is hand-rolled as a JSON merge-patch on `metadata.finalizers`
//! rather than built on `kube_runtime::finalizer::finalizer()` — seeking
//! deeper version-specific behavior from a helper we cannot compile-check
//! here is a worse trade than the handful of lines this takes directly (see
//! DESIGN.md).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use kube_runtime::{controller::Action, watcher, Controller};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::annotations;
use crate::config::ControllerConfig;
use crate::crd::{Condition, DiscoveredGateway, GatewaySync, GatewaySyncStatus, RefResolutionStatus};
use crate::git::{self, GitError};
use crate::observability::metrics;

use super::backoff::FibonacciBackoff;
use super::reconcile::{gateway_discovery, metadata_publish, status_aggregation, validation};

const FINALIZER_NAME: &str = "stoker.io/finalizer";

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("kube API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Shared reconciler state: the Kubernetes client, process configuration,
/// and a per-record Fibonacci backoff so repeatedly-failing records slow
/// down independently of healthy ones.
pub struct Context {
    pub client: Client,
    pub config: ControllerConfig,
    backoffs: Mutex<HashMap<String, FibonacciBackoff>>,
}

impl Context {
    #[must_use]
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        Self {
            client,
            config,
            backoffs: Mutex::new(HashMap::new()),
        }
    }

    fn backoff_for(&self, key: &str) -> Duration {
        let mut backoffs = self.backoffs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        backoffs
            .entry(key.to_string())
            .or_insert_with(|| FibonacciBackoff::new(5, 300))
            .next_backoff()
    }

    fn reset_backoff(&self, key: &str) {
        let mut backoffs = self.backoffs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(entry) = backoffs.get_mut(key) {
            entry.reset();
        }
    }
}

fn reconcile_key(gw: &GatewaySync) -> String {
    format!(
        "{}/{}",
        gw.namespace().unwrap_or_else(|| "default".to_string()),
        gw.name_any()
    )
}

/// Runs the `GatewaySync` control loop until shutdown. Watches the CRD
/// cluster-wide, matching the teacher's `Api::all` scope.
pub async fn run_controller(client: Client, config: ControllerConfig) -> anyhow::Result<()> {
    let api: Api<GatewaySync> = Api::all(client.clone());
    let ctx = Arc::new(Context::new(client, config));

    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            if let Err(e) = res {
                error!(error = %e, "controller stream yielded an error");
            }
        })
        .await;

    Ok(())
}

pub async fn reconcile(gw: Arc<GatewaySync>, ctx: Arc<Context>) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    metrics::increment_reconciliations();

    let namespace = gw.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<GatewaySync> = Api::namespaced(ctx.client.clone(), &namespace);

    let outcome = tokio::time::timeout(ctx.config.reconcile_deadline, async {
        if gw.meta().deletion_timestamp.is_some() {
            cleanup(&gw, &ctx, &api).await
        } else {
            apply(&gw, &api, &ctx).await
        }
    })
    .await
    .unwrap_or_else(|_| {
        Err(ReconcilerError::Other(anyhow::anyhow!(
            "reconcile exceeded its {:?} deadline",
            ctx.config.reconcile_deadline
        )))
    });

    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

    if outcome.is_ok() {
        ctx.reset_backoff(&reconcile_key(&gw));
    }
    outcome
}

pub fn error_policy(gw: Arc<GatewaySync>, error: &ReconcilerError, ctx: Arc<Context>) -> Action {
    metrics::increment_reconciliation_errors();
    let key = reconcile_key(&gw);
    let delay = ctx.backoff_for(&key);
    warn!(record = %key, error = %error, delay = ?delay, "reconcile failed, backing off");
    metrics::increment_requeues("error");
    Action::requeue(delay)
}

async fn apply(
    gw: &GatewaySync,
    api: &Api<GatewaySync>,
    ctx: &Context,
) -> Result<Action, ReconcilerError> {
    let name = gw.name_any();
    let namespace = gw.namespace().unwrap_or_else(|| "default".to_string());

    if !has_finalizer(gw) {
        add_finalizer(api, gw).await?;
    }

    let mut conditions: Vec<Condition> = Vec::new();

    if let Err(e) = validation::validate_spec(&gw.spec) {
        conditions.push(Condition::new("ProfilesValid", false, e.reason(), e.to_string()));
        patch_status(api, gw, &conditions, RefResolutionStatus::NotResolved, None, Vec::new()).await?;
        return Ok(Action::await_change());
    }
    conditions.push(Condition::new("ProfilesValid", true, "Valid", "spec passed validation"));

    // §4.4 "Annotation-driven fast path": a requested ref from the push
    // receiver temporarily overrides which ref this reconcile resolves.
    let requested_ref = gw.annotations().get(annotations::RECORD_REQUESTED_REF).cloned();
    let effective_ref = requested_ref
        .clone()
        .unwrap_or_else(|| gw.spec.git_source.r#ref.clone());

    let resolved = match git::resolve(&gw.spec.git_source.repo_url, &effective_ref).await {
        Ok(resolved) => resolved,
        Err(e) if e.is_transient() => {
            metrics::increment_ref_resolution_errors("transient");
            conditions.push(Condition::unknown("RefResolved", "Transient", e.to_string()));
            patch_status(api, gw, &conditions, RefResolutionStatus::Error, None, Vec::new()).await?;
            return Err(ReconcilerError::Other(anyhow::anyhow!(e)));
        }
        Err(e) => {
            let reason = permanent_ref_error_reason(&e);
            metrics::increment_ref_resolution_errors(reason);
            conditions.push(Condition::new("RefResolved", false, reason, e.to_string()));
            patch_status(api, gw, &conditions, RefResolutionStatus::Error, None, Vec::new()).await?;
            return Ok(Action::await_change());
        }
    };
    conditions.push(Condition::new(
        "RefResolved",
        true,
        "Resolved",
        format!("resolved {} to {}", resolved.resolved_ref, resolved.commit_id),
    ));

    let metadata_name = metadata_publish::metadata_configmap_name(&name);
    let document = metadata_publish::build_metadata_document(gw, &resolved.commit_id);
    metadata_publish::publish(
        ctx.client.clone(),
        gw,
        &metadata_name,
        &document,
        &ctx.config.field_manager,
    )
    .await
    .map_err(ReconcilerError::Other)?;

    if requested_ref.is_some() {
        clear_requested_ref_annotation(api, gw).await?;
    }

    let discovered = gateway_discovery::discover(ctx.client.clone(), &namespace, &name)
        .await
        .map_err(ReconcilerError::Other)?;

    let sidecar_injected = !discovered.is_empty() && discovered.iter().all(|pod| pod.has_adjunct);
    let with_adjunct = discovered.iter().filter(|pod| pod.has_adjunct).count();
    conditions.push(Condition::new(
        "SidecarInjected",
        sidecar_injected,
        if sidecar_injected { "Injected" } else { "MissingSidecar" },
        format!("{with_adjunct}/{} discovered pods carry the agent adjunct", discovered.len()),
    ));

    let status_name = status_aggregation::status_configmap_name(&name);
    let status_doc = status_aggregation::read_status_document(ctx.client.clone(), &namespace, &status_name)
        .await
        .map_err(ReconcilerError::Other)?;

    // §9 "ref-override": advisory only, deliberately excluded from the
    // Ready AND below.
    let ref_skew = discovered.iter().any(|pod| {
        status_doc
            .get(&pod.gateway_name)
            .and_then(|entry| entry.synced_ref.as_deref())
            .is_some_and(|synced_ref| synced_ref != resolved.resolved_ref)
    });
    if ref_skew {
        conditions.push(Condition::new(
            "RefSkew",
            true,
            "RefOverrideActive",
            "one or more gateways are syncing a ref override that differs from the resolved ref",
        ));
    }

    let aggregation = status_aggregation::aggregate(discovered, &status_doc, &resolved.commit_id);
    conditions.push(Condition::new(
        "AllGatewaysSynced",
        aggregation.all_synced,
        if aggregation.all_synced { "Synced" } else { "SyncPending" },
        format!("{} gateways discovered", aggregation.discovered.len()),
    ));

    let ready = !gw.spec.paused
        && !aggregation.discovered.is_empty()
        && conditions
            .iter()
            .filter(|c| c.r#type != "RefSkew")
            .all(Condition::is_true);
    conditions.push(Condition::new(
        "Ready",
        ready,
        if ready { "Ready" } else { "NotReady" },
        if gw.spec.paused {
            "record is paused".to_string()
        } else {
            format!("{} gateways discovered", aggregation.discovered.len())
        },
    ));

    patch_status(
        api,
        gw,
        &conditions,
        RefResolutionStatus::Resolved,
        Some((&resolved.resolved_ref, &resolved.commit_id)),
        aggregation.discovered,
    )
    .await?;

    let requeue_after = Duration::from_secs(u64::from(gw.spec.polling.interval_seconds.max(30)));
    metrics::increment_requeues("steady_state");
    Ok(Action::requeue(requeue_after))
}

/// Deletion path (§3 "Lifecycle"): the metadata `ConfigMap` carries an
/// owner reference and is garbage-collected automatically, but the status
/// `ConfigMap` does not (each entry is owned by the agent that wrote it,
/// not the record, so an agent's own write can never race a GC delete of
/// its target) — the reconciler deletes it explicitly before releasing the
/// finalizer.
async fn cleanup(gw: &GatewaySync, ctx: &Context, api: &Api<GatewaySync>) -> Result<Action, ReconcilerError> {
    if !has_finalizer(gw) {
        return Ok(Action::await_change());
    }

    let namespace = gw.namespace().unwrap_or_else(|| "default".to_string());
    let name = gw.name_any();
    let status_name = status_aggregation::status_configmap_name(&name);
    let cm_api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &namespace);

    match cm_api.delete(&status_name, &DeleteParams::default()).await {
        Ok(_) => {}
        Err(kube::Error::Api(err)) if err.code == 404 => {}
        Err(e) => return Err(e.into()),
    }

    info!(record = %name, "record deleted, status document released");
    remove_finalizer(api, gw).await?;
    Ok(Action::await_change())
}

fn has_finalizer(gw: &GatewaySync) -> bool {
    gw.finalizers().iter().any(|f| f == FINALIZER_NAME)
}

async fn add_finalizer(api: &Api<GatewaySync>, gw: &GatewaySync) -> Result<(), ReconcilerError> {
    let mut finalizers = gw.finalizers().to_vec();
    finalizers.push(FINALIZER_NAME.to_string());
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(&gw.name_any(), &PatchParams::default(), &Patch::Merge(patch))
        .await?;
    Ok(())
}

async fn remove_finalizer(api: &Api<GatewaySync>, gw: &GatewaySync) -> Result<(), ReconcilerError> {
    let finalizers: Vec<String> = gw
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != FINALIZER_NAME)
        .cloned()
        .collect();
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(&gw.name_any(), &PatchParams::default(), &Patch::Merge(patch))
        .await?;
    Ok(())
}

async fn clear_requested_ref_annotation(api: &Api<GatewaySync>, gw: &GatewaySync) -> Result<(), ReconcilerError> {
    let patch = json!({
        "metadata": {
            "annotations": {
                annotations::RECORD_REQUESTED_REF: serde_json::Value::Null,
                annotations::RECORD_REQUESTED_REF_INSTANT: serde_json::Value::Null,
                annotations::RECORD_REQUESTED_REF_SOURCE: serde_json::Value::Null,
            }
        }
    });
    api.patch(&gw.name_any(), &PatchParams::default(), &Patch::Merge(patch))
        .await?;
    Ok(())
}

fn permanent_ref_error_reason(e: &GitError) -> &'static str {
    match e {
        GitError::AuthFailure { .. } => "AuthFailure",
        GitError::NotFound { .. } => "NotFound",
        GitError::InvalidUrl { .. } => "InvalidUrl",
        GitError::Transient { .. } => "Transient",
    }
}

async fn patch_status(
    api: &Api<GatewaySync>,
    gw: &GatewaySync,
    conditions: &[Condition],
    ref_status: RefResolutionStatus,
    resolved: Option<(&str, &str)>,
    discovered: Vec<DiscoveredGateway>,
) -> Result<(), ReconcilerError> {
    let status = GatewaySyncStatus {
        conditions: conditions.to_vec(),
        observed_generation: gw.metadata.generation,
        last_sync_ref: resolved.map(|(r#ref, _)| r#ref.to_string()),
        last_sync_commit: resolved.map(|(_, commit)| commit.to_string()),
        ref_resolution_status: ref_status,
        discovered_gateways: discovered,
        last_reconcile_time: Some(Utc::now().to_rfc3339()),
    };

    api.patch_status(
        &gw.name_any(),
        &PatchParams::default(),
        &Patch::Merge(json!({ "status": status })),
    )
    .await?;
    Ok(())
}
