//! # `GatewaySync` Spec
//!
//! Desired-state record: a Git source, a set of named sync profiles, a
//! gateway endpoint template, and an agent image override.

use kube::CustomResource;
use schemars::{JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

use super::status::GatewaySyncStatus;

/// `GatewaySync` declares a Git source and a set of sync profiles that
/// should be replicated into the live data directory of every matching
/// Ignition gateway pod.
///
/// # Example
///
/// ```yaml
/// apiVersion: stoker.io/v1alpha1
/// kind: GatewaySync
/// metadata:
///   name: plant-floor-a
///   namespace: scada
/// spec:
///   gitSource:
///     repoUrl: https://github.com/example/ignition-configs
///     ref: main
///   profiles:
///     default:
///       mappings:
///         - source: "services/{{.Labels.site}}/projects/"
///           destination: "projects/"
///           type: dir
///           required: true
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "GatewaySync",
    group = "stoker.io",
    version = "v1alpha1",
    namespaced,
    status = "GatewaySyncStatus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Commit", "type":"string", "jsonPath":".status.lastSyncCommit"}"#,
    printcolumn = r#"{"name":"Paused", "type":"boolean", "jsonPath":".spec.paused"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySyncSpec {
    /// Git repository, reference, and optional authentication.
    pub git_source: GitSource,
    /// Polling configuration; the reconciler requeues at least this often
    /// even when nothing has changed (§4.4 step 8).
    #[serde(default)]
    pub polling: Polling,
    /// Template applied to every discovered gateway's HTTP endpoint.
    #[serde(default)]
    pub gateway: GatewayEndpointTemplate,
    /// Glob exclude patterns applied to every profile. The pattern that
    /// masks version-control metadata (`**/.git/**`) is always enforced in
    /// addition to this list.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Default agent adjunct image; may be overridden per-pod by the
    /// `stoker.io/agent-image` annotation.
    #[serde(default)]
    pub agent: AgentImageConfig,
    /// Named sync profiles. A gateway pod selects one profile by name via
    /// the `stoker.io/profile` annotation.
    pub profiles: BTreeMap<String, ProfileSpec>,
    /// Suspends reconciliation and sync entirely for this record.
    #[serde(default)]
    pub paused: bool,
}

/// Git repository coordinates.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    /// HTTPS or SSH clone URL.
    pub repo_url: String,
    /// Branch, tag, or 40-hex commit ID.
    pub r#ref: String,
    /// Authentication reference. Omitted means anonymous access.
    #[serde(default)]
    pub auth: Option<GitAuthConfig>,
}

/// Authentication reference for the Git source. Exactly one variant may be
/// set; see `controller::reconciler::validation::validate_git_auth`.
///
/// Kubernetes sends data in the form `{"type": "bearer", "bearer": {...}}`;
/// like the provider configuration this schema is modeled on, the `type`
/// field is accepted for readability but ignored during deserialization —
/// the variant is inferred from which of `bearer`/`sshKey`/`appInstallation`
/// is present.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GitAuthConfig {
    /// Bearer token stored in a Kubernetes `Secret`.
    #[serde(rename = "bearer")]
    Bearer(SecretKeyRef),
    /// SSH private key stored in a Kubernetes `Secret`.
    #[serde(rename = "sshKey")]
    SshKey(SecretKeyRef),
    /// GitHub App installation credentials (app ID, installation ID,
    /// private key), all read from one `Secret`.
    #[serde(rename = "appInstallation")]
    AppInstallation(SecretKeyRef),
}

impl JsonSchema for GitAuthConfig {
    fn schema_name() -> Cow<'static, str> {
        Cow::Borrowed("GitAuthConfig")
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        let secret_ref_schema = SecretKeyRef::json_schema(gen);
        let secret_ref_json =
            serde_json::to_value(&secret_ref_schema).unwrap_or_else(|_| serde_json::json!({}));

        let schema_value = serde_json::json!({
            "type": "object",
            "description": "Git authentication reference - exactly one of bearer, sshKey, or appInstallation",
            "properties": {
                "type": {
                    "type": "string",
                    "enum": ["bearer", "sshKey", "appInstallation"],
                    "description": "Authentication type (optional, ignored during deserialization)"
                },
                "bearer": secret_ref_json.clone(),
                "sshKey": secret_ref_json.clone(),
                "appInstallation": secret_ref_json
            },
            "oneOf": [
                {"required": ["bearer"]},
                {"required": ["sshKey"]},
                {"required": ["appInstallation"]}
            ]
        });
        Schema::try_from(schema_value).expect("GitAuthConfig schema is valid JSON")
    }
}

impl<'de> Deserialize<'de> for GitAuthConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::{self, MapAccess, Visitor};
        use std::fmt;

        struct GitAuthVisitor;

        impl<'de> Visitor<'de> for GitAuthVisitor {
            type Value = GitAuthConfig;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a git auth object with bearer, sshKey, or appInstallation")
            }

            fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut bearer: Option<SecretKeyRef> = None;
                let mut ssh_key: Option<SecretKeyRef> = None;
                let mut app_installation: Option<SecretKeyRef> = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "bearer" => {
                            if bearer.is_some() {
                                return Err(de::Error::duplicate_field("bearer"));
                            }
                            bearer = Some(map.next_value()?);
                        }
                        "sshKey" => {
                            if ssh_key.is_some() {
                                return Err(de::Error::duplicate_field("sshKey"));
                            }
                            ssh_key = Some(map.next_value()?);
                        }
                        "appInstallation" => {
                            if app_installation.is_some() {
                                return Err(de::Error::duplicate_field("appInstallation"));
                            }
                            app_installation = Some(map.next_value()?);
                        }
                        _ => {
                            let _: de::IgnoredAny = map.next_value()?;
                        }
                    }
                }

                match (bearer, ssh_key, app_installation) {
                    (Some(v), None, None) => Ok(GitAuthConfig::Bearer(v)),
                    (None, Some(v), None) => Ok(GitAuthConfig::SshKey(v)),
                    (None, None, Some(v)) => Ok(GitAuthConfig::AppInstallation(v)),
                    (None, None, None) => {
                        Err(de::Error::missing_field("bearer, sshKey, or appInstallation"))
                    }
                    _ => Err(de::Error::custom("multiple git auth variants specified")),
                }
            }
        }

        deserializer.deserialize_map(GitAuthVisitor)
    }
}

impl GitAuthConfig {
    /// Short tag recorded in the published metadata document's `authType`
    /// field (§3, "Published metadata document").
    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        match self {
            GitAuthConfig::Bearer(_) => "bearer",
            GitAuthConfig::SshKey(_) => "sshKey",
            GitAuthConfig::AppInstallation(_) => "appInstallation",
        }
    }
}

/// Reference to a key within a Kubernetes `Secret` in the same namespace.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

/// Polling cadence for the reconciler's steady-state requeue (§4.4 step 8).
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Polling {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_seconds")]
    pub interval_seconds: u32,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: default_poll_interval_seconds(),
        }
    }
}

/// Template for the gateway's reload/health HTTP endpoint, shared by every
/// gateway discovered for this record.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEndpointTemplate {
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub api_key_ref: Option<SecretKeyRef>,
}

impl Default for GatewayEndpointTemplate {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            tls: false,
            api_key_ref: None,
        }
    }
}

/// Agent adjunct image configuration, tiered `pod-annotation >
/// record.agent.image > process default` at injection time (§4.5).
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentImageConfig {
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub pull_policy: Option<String>,
    #[serde(default)]
    pub resources: Option<ResourceEnvelope>,
}

impl AgentImageConfig {
    /// Full `repository:tag` image reference, if a repository is set.
    #[must_use]
    pub fn image_ref(&self) -> Option<String> {
        self.repository.as_ref().map(|repo| {
            let tag = self.tag.as_deref().unwrap_or("latest");
            format!("{repo}:{tag}")
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEnvelope {
    #[serde(default)]
    pub requests: Option<ResourceQuantities>,
    #[serde(default)]
    pub limits: Option<ResourceQuantities>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuantities {
    #[serde(default)]
    pub cpu: Option<String>,
    #[serde(default)]
    pub memory: Option<String>,
}

/// A named sync profile (§3 "Profile record").
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSpec {
    /// Ordered source -> destination rules. Later entries overlay earlier
    /// ones at the same destination.
    pub mappings: Vec<Mapping>,
    /// Exclude patterns merged additively with the unit-level set.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Opaque key -> string map usable in mapping templates as `Vars.<key>`.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default = "default_sync_period_seconds")]
    pub sync_period_seconds: u32,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_designer_session_policy")]
    pub designer_session_policy: DesignerSessionPolicy,
    #[serde(default)]
    pub paused: bool,
    /// Single-level dependency declarations; transitive chains are
    /// rejected during validation.
    #[serde(default)]
    pub depends_on: Vec<DependsOn>,
}

/// A single source -> destination rule within a profile.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    pub source: String,
    pub destination: String,
    pub r#type: MappingType,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum MappingType {
    Dir,
    File,
}

/// Policy applied when a gateway reports an active designer session during
/// the skip-predicate phase of a tick (§4.3 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum DesignerSessionPolicy {
    Proceed,
    Wait,
    Fail,
}

/// Single-level profile dependency (`dependsOn`). `condition` is an opaque
/// string evaluated against the depended-on profile's last reported sync
/// state (e.g. `"Synced"`); cross-profile transitive chains are rejected by
/// `validate_no_cyclic_depends_on`.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DependsOn {
    pub profile_name: String,
    pub condition: String,
}

pub fn default_true() -> bool {
    true
}

pub fn default_poll_interval_seconds() -> u32 {
    60
}

pub fn default_gateway_port() -> u16 {
    8088
}

pub fn default_sync_period_seconds() -> u32 {
    30
}

pub fn default_designer_session_policy() -> DesignerSessionPolicy {
    DesignerSessionPolicy::Proceed
}
