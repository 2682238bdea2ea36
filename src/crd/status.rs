//! # `GatewaySync` Status
//!
//! Status subresource aggregated by the reconciler from per-gateway entries
//! in the status document (§3 "Status document", §4.4 step 6-7).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySyncStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub last_sync_ref: Option<String>,
    #[serde(default)]
    pub last_sync_commit: Option<String>,
    #[serde(default)]
    pub ref_resolution_status: RefResolutionStatus,
    #[serde(default)]
    pub discovered_gateways: Vec<DiscoveredGateway>,
    #[serde(default)]
    pub last_reconcile_time: Option<String>,
}

/// Outcome of the ref resolver for this record (§4.1, §4.4 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum RefResolutionStatus {
    #[default]
    NotResolved,
    Resolving,
    Resolved,
    Error,
}

/// One gateway pod discovered by the reconciler via the unit-link
/// annotation (§4.4 step 4), aggregated with its status-document entry.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredGateway {
    pub gateway_name: String,
    pub pod_name: String,
    pub profile: String,
    #[serde(default)]
    pub has_adjunct: bool,
    #[serde(default)]
    pub synced_commit: Option<String>,
    #[serde(default)]
    pub sync_state: Option<String>,
}

/// A status condition, matching the shape the Kubernetes tooling ecosystem
/// expects (`type`, `status`, `reason`, `message`, `lastTransitionTime`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub r#type: String,
    pub status: String,
    #[serde(default)]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    #[must_use]
    pub fn new(type_: &str, true_: bool, reason: &str, message: impl Into<String>) -> Self {
        Self {
            r#type: type_.to_string(),
            status: if true_ { "True" } else { "False" }.to_string(),
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
            reason: Some(reason.to_string()),
            message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn unknown(type_: &str, reason: &str, message: impl Into<String>) -> Self {
        Self {
            r#type: type_.to_string(),
            status: "Unknown".to_string(),
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
            reason: Some(reason.to_string()),
            message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}
