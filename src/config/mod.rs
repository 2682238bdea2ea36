//! # Process Configuration
//!
//! Consolidates the environment-variable knobs every binary reads at startup
//! into one read-only-after-init record, instead of scattering
//! `std::env::var(...).unwrap_or_else(...)` calls through the call sites.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Default container image used for the injected agent adjunct when neither
/// the pod annotation nor the `GatewaySync` record overrides it.
fn default_agent_image() -> String {
    std::env::var("STOKER_DEFAULT_AGENT_IMAGE")
        .unwrap_or_else(|_| "ghcr.io/microscaler/stoker-agent:latest".to_string())
}

fn default_poll_interval_secs() -> u64 {
    std::env::var("STOKER_DEFAULT_POLL_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(60)
}

fn env_u16(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Default mount path of the downward-API volume the admission webhook
/// projects the pod's labels into (`webhook::admission::push_volumes`).
/// There is no Downward API env-var form for "every label" (only individual
/// `metadata.labels['key']` selectors, and the key set isn't known at
/// injection time), so the labels arrive as a `key="value"`-per-line file
/// instead, the same convention `kubelet` itself uses for downward volumes.
const DEFAULT_LABELS_FILE: &str = "/etc/stoker-podinfo/labels";

/// Parses a downward-API labels volume file (`key="value"` per line) into a
/// map, used to populate `{{.Labels.<key>}}` template substitution (§4.2).
/// Missing or unreadable file yields an empty map rather than an error: a
/// gateway pod with no labels, or one injected before this volume existed,
/// simply can't use label-templated mappings.
fn read_downward_labels(path: &Path) -> BTreeMap<String, String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return BTreeMap::new();
    };
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, raw_value)| {
            (
                key.trim().to_string(),
                raw_value.trim().trim_matches('"').to_string(),
            )
        })
        .collect()
}

/// Process-wide configuration for the controller binary.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub metrics_port: u16,
    pub pod_namespace: String,
    pub default_agent_image: String,
    pub default_poll_interval: Duration,
    pub reconcile_deadline: Duration,
    pub field_manager: String,
}

impl ControllerConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            metrics_port: env_u16("METRICS_PORT", 8080),
            pod_namespace: env_string("POD_NAMESPACE", "default"),
            default_agent_image: default_agent_image(),
            default_poll_interval: Duration::from_secs(default_poll_interval_secs()),
            reconcile_deadline: Duration::from_secs(
                std::env::var("STOKER_RECONCILE_DEADLINE_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(120),
            ),
            field_manager: env_string("STOKER_FIELD_MANAGER", "stoker-controller"),
        }
    }
}

/// Process-wide configuration for the sync agent binary.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub metrics_port: u16,
    pub pod_namespace: String,
    pub pod_name: String,
    pub metadata_configmap: String,
    pub status_configmap: String,
    pub profile_name: String,
    pub gateway_name: Option<String>,
    pub cr_name: String,
    /// This pod's labels, projected by the admission webhook's downward-API
    /// podinfo volume (`webhook::admission::push_podinfo_volume`). Backs
    /// `{{.Labels.<key>}}` mapping-template substitution (§4.2, §8 boundary
    /// scenario 2); empty if the pod carries no labels or predates injection
    /// of the volume.
    pub labels: BTreeMap<String, String>,
    pub live_root: std::path::PathBuf,
    pub clone_root: std::path::PathBuf,
    pub gateway_base_url: String,
    pub gateway_api_token: Option<String>,
    pub shutdown_deadline: Duration,
    pub agent_version: String,
    /// Mirrors the `stoker.io/ref-override` pod annotation, projected into
    /// the container environment by the Downward API. When set the agent
    /// resolves and syncs this ref itself instead of the metadata
    /// document's commit; the controller observes the resulting skew and
    /// raises the advisory `RefSkew` condition (§9).
    pub ref_override: Option<String>,
}

impl AgentConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            metrics_port: env_u16("METRICS_PORT", 8083),
            pod_namespace: env_string("POD_NAMESPACE", "default"),
            pod_name: env_string("POD_NAME", "unknown"),
            metadata_configmap: env_string("STOKER_METADATA_NAME", ""),
            status_configmap: env_string("STOKER_STATUS_NAME", ""),
            profile_name: env_string("STOKER_PROFILE", ""),
            gateway_name: std::env::var("STOKER_GATEWAY_NAME").ok(),
            labels: read_downward_labels(
                std::env::var("STOKER_LABELS_FILE")
                    .map(std::path::PathBuf::from)
                    .unwrap_or_else(|_| std::path::PathBuf::from(DEFAULT_LABELS_FILE))
                    .as_path(),
            ),
            cr_name: env_string("STOKER_CR_NAME", ""),
            live_root: std::env::var("STOKER_LIVE_ROOT")
                .unwrap_or_else(|_| "/usr/local/bin/ignition/data".to_string())
                .into(),
            clone_root: std::env::var("STOKER_CLONE_ROOT")
                .unwrap_or_else(|_| "/tmp/stoker-clone".to_string())
                .into(),
            gateway_base_url: env_string("STOKER_GATEWAY_URL", "http://localhost:8088"),
            gateway_api_token: std::env::var("STOKER_GATEWAY_API_TOKEN").ok(),
            shutdown_deadline: Duration::from_secs(30),
            agent_version: crate::build_info::version_string(),
            ref_override: std::env::var("STOKER_REF_OVERRIDE").ok(),
        }
    }
}

/// Process-wide configuration shared by the admission webhook and push
/// receiver, which run together behind one axum `Router` (`stoker-webhook`).
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub listen_port: u16,
    pub metrics_port: u16,
    pub default_agent_image: String,
    pub webhook_shared_secret: Option<String>,
    pub adjunct_container_name: String,
}

impl WebhookConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            listen_port: env_u16("STOKER_WEBHOOK_PORT", 8443),
            metrics_port: env_u16("METRICS_PORT", 8080),
            default_agent_image: default_agent_image(),
            webhook_shared_secret: std::env::var("STOKER_WEBHOOK_SHARED_SECRET").ok(),
            adjunct_container_name: env_string("STOKER_ADJUNCT_NAME", "stoker-agent"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_quoted_key_value_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels");
        std::fs::write(&path, "site=\"blue\"\ntier=\"edge\"\n").unwrap();

        let labels = read_downward_labels(&path);
        assert_eq!(labels.get("site").map(String::as_str), Some("blue"));
        assert_eq!(labels.get("tier").map(String::as_str), Some("edge"));
    }

    #[test]
    fn missing_file_yields_empty_map() {
        let labels = read_downward_labels(Path::new("/no/such/file"));
        assert!(labels.is_empty());
    }
}
