//! # Status Publisher
//!
//! Upserts this agent's entry into the status document `ConfigMap` (§3
//! "Status document", §4.3 step 6). Access discipline: one writer per
//! gateway-keyed entry, many readers (§5 "Shared resources"). Each gateway
//! gets its own `ConfigMap.data` key (`crd::status_entry_key`) and each
//! agent server-side-applies under a field manager scoped to its own
//! gateway identity, so two agents publishing concurrently touch disjoint
//! fields of the `ConfigMap` and neither can drop the other's write — a
//! single shared blob, patched read-modify-write by every agent under one
//! field manager, cannot make that guarantee.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use tracing::warn;

use crate::crd::{status_entry_key, GatewayStatusEntry};

pub struct StatusPublisher {
    api: Api<ConfigMap>,
    configmap_name: String,
    gateway_key: String,
    data_key: String,
    field_manager: String,
}

impl StatusPublisher {
    #[must_use]
    pub fn new(client: Client, namespace: &str, configmap_name: &str, gateway_key: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            configmap_name: configmap_name.to_string(),
            data_key: status_entry_key(gateway_key),
            field_manager: format!("stoker-agent-{gateway_key}"),
            gateway_key: gateway_key.to_string(),
        }
    }

    /// Reads only this gateway's own `ConfigMap.data` key, never the whole
    /// map, so a read never observes another agent's in-flight write.
    async fn read_own(&self) -> anyhow::Result<Option<GatewayStatusEntry>> {
        match self.api.get(&self.configmap_name).await {
            Ok(cm) => {
                let Some(raw) = cm.data.as_ref().and_then(|d| d.get(&self.data_key)) else {
                    return Ok(None);
                };
                match serde_json::from_str(raw) {
                    Ok(entry) => Ok(Some(entry)),
                    Err(e) => {
                        warn!(gateway = %self.gateway_key, error = %e, "status entry malformed, starting fresh");
                        Ok(None)
                    }
                }
            }
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Recovers this gateway's last-published entry, used to seed
    /// in-memory state (last synced commit, designer-wait budget) across
    /// agent restarts.
    pub async fn read_own_entry(&self) -> anyhow::Result<Option<GatewayStatusEntry>> {
        self.read_own().await
    }

    /// Enforces the §8 item 3 `syncedCommit` monotonic-transition invariant
    /// against this gateway's own previous entry, then server-side-applies
    /// just this gateway's key under a field manager scoped to it.
    pub async fn publish(&self, entry: GatewayStatusEntry) -> anyhow::Result<()> {
        if let Some(existing) = self.read_own().await? {
            let new_commit = entry.synced_commit.as_deref().unwrap_or("");
            if !existing.allows_transition_to(new_commit) {
                warn!(
                    gateway = %self.gateway_key,
                    previous = ?existing.synced_commit,
                    attempted = %new_commit,
                    "refusing to publish syncedCommit transition that violates monotonicity invariant"
                );
                return Ok(());
            }
        }

        let body = serde_json::to_string(&entry)?;
        let mut data = BTreeMap::new();
        data.insert(self.data_key.clone(), body);

        let patch = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": self.configmap_name },
            "data": data,
        });

        self.api
            .patch(
                &self.configmap_name,
                &PatchParams::apply(self.field_manager.as_str()),
                &Patch::Apply(patch),
            )
            .await?;
        Ok(())
    }
}
