//! # Metadata Document Publisher
//!
//! Server-side upsert of the resolved desired state into the metadata
//! `ConfigMap` owned by the `GatewaySync` record (§4.4 step 3). Every field
//! here is derivable from the spec plus the resolved commit (§3 invariant);
//! the reconciler never mints state an agent could not re-derive except
//! the commit itself.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};

use crate::crd::{GatewaySync, MetadataDocument, ResolvedMapping, ResolvedProfile};

const METADATA_KEY: &str = "metadata.json";

/// Builds the published metadata document from a validated spec and the
/// commit the ref resolver produced this reconcile.
#[must_use]
pub fn build_metadata_document(gw: &GatewaySync, commit: &str) -> MetadataDocument {
    let spec = &gw.spec;
    let auth_type = spec
        .git_source
        .auth
        .as_ref()
        .map_or("none", |auth| auth.type_tag());

    let mut exclude_patterns = spec.exclude_patterns.clone();
    exclude_patterns.sort();

    let profiles = spec
        .profiles
        .iter()
        .map(|(name, profile)| {
            let mut patterns = exclude_patterns.clone();
            patterns.extend(profile.exclude_patterns.clone());
            let resolved = ResolvedProfile {
                mappings: profile.mappings.iter().map(ResolvedMapping::from).collect(),
                exclude_patterns: patterns,
                variables: profile.variables.clone(),
                sync_period_seconds: profile.sync_period_seconds.clamp(5, 3600),
                dry_run: profile.dry_run,
                designer_session_policy: profile.designer_session_policy,
                paused: profile.paused || spec.paused,
                depends_on: profile.depends_on.clone(),
            };
            (name.clone(), resolved)
        })
        .collect();

    MetadataDocument {
        r#ref: spec.git_source.r#ref.clone(),
        commit: commit.to_string(),
        repo_url: spec.git_source.repo_url.clone(),
        auth_type: auth_type.to_string(),
        exclude_patterns,
        profiles,
        generation: gw.metadata.generation.unwrap_or(0),
    }
}

/// Name of the `ConfigMap` that carries a record's published metadata
/// document. Paired with [`super::status_aggregation::status_configmap_name`].
#[must_use]
pub fn metadata_configmap_name(record_name: &str) -> String {
    format!("{record_name}-metadata")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{GatewaySyncSpec, GitSource, Mapping, MappingType, Polling, ProfileSpec, SecretKeyRef};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn record(profiles: BTreeMap<String, ProfileSpec>) -> GatewaySync {
        GatewaySync {
            metadata: ObjectMeta {
                name: Some("plant-floor-a".to_string()),
                namespace: Some("scada".to_string()),
                uid: Some("11111111-1111-1111-1111-111111111111".to_string()),
                generation: Some(3),
                ..Default::default()
            },
            spec: GatewaySyncSpec {
                git_source: GitSource {
                    repo_url: "https://example.com/repo.git".to_string(),
                    r#ref: "main".to_string(),
                    auth: Some(crate::crd::GitAuthConfig::Bearer(SecretKeyRef {
                        name: "git-creds".to_string(),
                        key: "token".to_string(),
                    })),
                },
                polling: Polling {
                    enabled: true,
                    interval_seconds: 60,
                },
                gateway: Default::default(),
                exclude_patterns: vec!["*.bak".to_string()],
                agent: Default::default(),
                profiles,
                paused: false,
            },
            status: None,
        }
    }

    fn profile() -> ProfileSpec {
        ProfileSpec {
            mappings: vec![Mapping {
                source: "services/{{.Labels.site}}/projects/".to_string(),
                destination: "projects/".to_string(),
                r#type: MappingType::Dir,
                required: true,
            }],
            exclude_patterns: vec!["*.tmp".to_string()],
            variables: BTreeMap::new(),
            sync_period_seconds: 45,
            dry_run: false,
            designer_session_policy: crate::crd::DesignerSessionPolicy::Wait,
            paused: false,
            depends_on: Vec::new(),
        }
    }

    /// §3 invariant: every field is derivable from the spec plus the
    /// resolved commit; the auth type tag reflects which variant was set.
    #[test]
    fn derives_auth_type_tag_and_commit() {
        let mut profiles = BTreeMap::new();
        profiles.insert("default".to_string(), profile());
        let gw = record(profiles);

        let doc = build_metadata_document(&gw, &"a".repeat(40));

        assert_eq!(doc.auth_type, "bearer");
        assert_eq!(doc.commit, "a".repeat(40));
        assert_eq!(doc.r#ref, "main");
        assert_eq!(doc.generation, 3);
    }

    /// Unit-level and profile-level exclude patterns merge additively per
    /// profile (§3 "Profile record").
    #[test]
    fn merges_unit_and_profile_exclude_patterns_per_profile() {
        let mut profiles = BTreeMap::new();
        profiles.insert("default".to_string(), profile());
        let gw = record(profiles);

        let doc = build_metadata_document(&gw, &"a".repeat(40));

        let resolved = &doc.profiles["default"];
        assert!(resolved.exclude_patterns.contains(&"*.bak".to_string()));
        assert!(resolved.exclude_patterns.contains(&"*.tmp".to_string()));
    }

    /// A profile is forced paused when the unit-level record is paused,
    /// even if the profile itself is not (§3 "Paused flag").
    #[test]
    fn unit_level_pause_propagates_to_every_profile() {
        let mut profiles = BTreeMap::new();
        profiles.insert("default".to_string(), profile());
        let mut gw = record(profiles);
        gw.spec.paused = true;

        let doc = build_metadata_document(&gw, &"a".repeat(40));

        assert!(doc.profiles["default"].paused);
    }

    #[test]
    fn metadata_and_status_configmap_names_are_paired_but_distinct() {
        assert_eq!(metadata_configmap_name("plant-floor-a"), "plant-floor-a-metadata");
        assert_ne!(
            metadata_configmap_name("plant-floor-a"),
            super::super::status_aggregation::status_configmap_name("plant-floor-a")
        );
    }
}

/// Server-side-applies `document` into the `ConfigMap` named
/// `configmap_name`, owned by `gw` via a controller owner reference so it
/// is garbage-collected when the record is deleted.
pub async fn publish(
    client: Client,
    gw: &GatewaySync,
    configmap_name: &str,
    document: &MetadataDocument,
    field_manager: &str,
) -> anyhow::Result<()> {
    let namespace = gw.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<ConfigMap> = Api::namespaced(client, &namespace);

    let body = serde_json::to_string(document)?;
    let owner_ref = gw.controller_owner_ref(&()).ok_or_else(|| {
        anyhow::anyhow!("GatewaySync record is missing uid/name, cannot build owner reference")
    })?;

    let patch = serde_json::json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": configmap_name,
            "ownerReferences": [owner_ref],
        },
        "data": { METADATA_KEY: body },
    });

    api.patch(
        configmap_name,
        &PatchParams::apply(field_manager),
        &Patch::Apply(patch),
    )
    .await?;
    Ok(())
}
