//! # Status Aggregation
//!
//! Reads the status document (written by agents, §3 "Status document") and
//! rolls it up against the gateways discovered this reconcile (§4.4 step 6),
//! producing the per-gateway `status.discoveredGateways[]` entries and the
//! `AllGatewaysSynced` / `SidecarInjected` predicates for step 7.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};

use crate::crd::{parse_status_document, DiscoveredGateway, StatusDocument, SyncState};

use super::gateway_discovery::DiscoveredPod;

/// Name of the `ConfigMap` that carries a record's aggregated status
/// document. Paired with [`super::metadata_publish::metadata_configmap_name`].
#[must_use]
pub fn status_configmap_name(record_name: &str) -> String {
    format!("{record_name}-status")
}

/// Reads every gateway's entry out of the status `ConfigMap` (one
/// `crd::status_entry_key`-named `data` key per gateway, §3 "Status
/// document"), tolerating both "not created yet" (no agent has published a
/// first entry) and an entirely empty `data` map.
pub async fn read_status_document(
    client: Client,
    namespace: &str,
    configmap_name: &str,
) -> anyhow::Result<StatusDocument> {
    let api: Api<ConfigMap> = Api::namespaced(client, namespace);
    match api.get(configmap_name).await {
        Ok(cm) => Ok(parse_status_document(cm.data.as_ref().unwrap_or(&BTreeMap::new()))),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(StatusDocument::new()),
        Err(e) => Err(e.into()),
    }
}

/// Per-gateway and record-level rollup of the status document against this
/// reconcile's discovered pods.
#[derive(Debug)]
pub struct Aggregation {
    pub discovered: Vec<DiscoveredGateway>,
    /// True iff every discovered gateway reports `Synced` at `current_commit`.
    pub all_synced: bool,
}

/// Joins `discovered` pods with their status-document entry, keyed by
/// gateway identity, and computes the `AllGatewaysSynced` predicate
/// (§4.4 step 7). An empty discovery set is never "all synced".
#[must_use]
pub fn aggregate(
    discovered: Vec<DiscoveredPod>,
    status: &StatusDocument,
    current_commit: &str,
) -> Aggregation {
    let mut all_synced = !discovered.is_empty();

    let rolled = discovered
        .into_iter()
        .map(|pod| {
            let entry = status.get(&pod.gateway_name);
            let synced_at_commit = entry.is_some_and(|e| {
                e.sync_state == SyncState::Synced
                    && e.synced_commit.as_deref() == Some(current_commit)
            });
            if !synced_at_commit {
                all_synced = false;
            }

            let mut discovered_gateway = pod.into_status_entry();
            discovered_gateway.synced_commit = entry.and_then(|e| e.synced_commit.clone());
            discovered_gateway.sync_state = entry.map(|e| sync_state_tag(e.sync_state).to_string());
            discovered_gateway
        })
        .collect();

    Aggregation {
        discovered: rolled,
        all_synced,
    }
}

fn sync_state_tag(state: SyncState) -> &'static str {
    match state {
        SyncState::Pending => "Pending",
        SyncState::Synced => "Synced",
        SyncState::Error => "Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{FileChangeCounts, GatewayStatusEntry};

    fn entry(state: SyncState, commit: &str) -> GatewayStatusEntry {
        GatewayStatusEntry {
            sync_state: state,
            synced_commit: Some(commit.to_string()),
            synced_ref: Some("main".to_string()),
            last_sync_instant: None,
            last_sync_duration_ms: None,
            agent_version: "test".to_string(),
            last_scan_result: None,
            files_changed: FileChangeCounts::default(),
            projects_synced: Vec::new(),
            error_message: None,
            profile_name: "default".to_string(),
            dry_run_diff: None,
            designer_sessions_blocked: false,
        }
    }

    fn pod(gateway_name: &str) -> DiscoveredPod {
        DiscoveredPod {
            pod_name: gateway_name.to_string(),
            gateway_name: gateway_name.to_string(),
            profile: "default".to_string(),
            has_adjunct: true,
        }
    }

    #[test]
    fn all_synced_requires_every_gateway_at_current_commit() {
        let mut status = StatusDocument::new();
        status.insert("gw-a".to_string(), entry(SyncState::Synced, "abc"));
        status.insert("gw-b".to_string(), entry(SyncState::Synced, "old"));

        let aggregation = aggregate(vec![pod("gw-a"), pod("gw-b")], &status, "abc");
        assert!(!aggregation.all_synced);
        assert_eq!(aggregation.discovered.len(), 2);
    }

    #[test]
    fn empty_discovery_is_never_all_synced() {
        let status = StatusDocument::new();
        let aggregation = aggregate(Vec::new(), &status, "abc");
        assert!(!aggregation.all_synced);
    }

    #[test]
    fn missing_status_entry_is_not_synced() {
        let status = StatusDocument::new();
        let aggregation = aggregate(vec![pod("gw-a")], &status, "abc");
        assert!(!aggregation.all_synced);
        assert_eq!(aggregation.discovered[0].sync_state, None);
    }
}
