//! # Gateway Discovery
//!
//! Lists pods in the record's namespace carrying the unit-link annotation
//! (§4.4 step 4), extracts gateway identity, and flags pods missing the
//! injected adjunct (§4.4 step 5).

use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};

use crate::annotations;
use crate::crd::DiscoveredGateway;

/// One pod discovered for a `GatewaySync` record, before the status
/// document has been consulted.
pub struct DiscoveredPod {
    pub pod_name: String,
    pub gateway_name: String,
    pub profile: String,
    pub has_adjunct: bool,
}

/// Lists every pod in `namespace` whose `stoker.io/cr-name` annotation
/// equals `record_name`.
pub async fn discover(
    client: Client,
    namespace: &str,
    record_name: &str,
) -> anyhow::Result<Vec<DiscoveredPod>> {
    let api: Api<Pod> = Api::namespaced(client, namespace);
    let pods = api.list(&ListParams::default()).await?;

    let discovered = pods
        .into_iter()
        .filter_map(|pod| extract_discovered_pod(&pod, record_name))
        .collect();
    Ok(discovered)
}

/// Pure projection of one `Pod` into a `DiscoveredPod`, or `None` if its
/// `stoker.io/cr-name` annotation doesn't match `record_name`. Split out
/// from `discover` so the annotation/defaulting logic is unit-testable
/// without a cluster.
fn extract_discovered_pod(pod: &Pod, record_name: &str) -> Option<DiscoveredPod> {
    let annotations = pod.metadata.annotations.as_ref()?;
    if annotations.get(annotations::POD_CR_NAME).map(String::as_str) != Some(record_name) {
        return None;
    }

    let pod_name = pod.name_any();
    let gateway_name = annotations
        .get(annotations::POD_GATEWAY_NAME)
        .cloned()
        .unwrap_or_else(|| pod_name.clone());
    let profile = annotations
        .get(annotations::POD_PROFILE)
        .cloned()
        .unwrap_or_else(|| "default".to_string());

    let has_adjunct = pod
        .spec
        .as_ref()
        .map(|spec| {
            spec.containers
                .iter()
                .any(|c| c.name == annotations::ADJUNCT_CONTAINER_NAME)
                || spec
                    .init_containers
                    .as_ref()
                    .is_some_and(|init| init.iter().any(|c| c.name == annotations::ADJUNCT_CONTAINER_NAME))
        })
        .unwrap_or(false);

    Some(DiscoveredPod {
        pod_name,
        gateway_name,
        profile,
        has_adjunct,
    })
}

impl DiscoveredPod {
    #[must_use]
    pub fn into_status_entry(self) -> DiscoveredGateway {
        DiscoveredGateway {
            gateway_name: self.gateway_name,
            pod_name: self.pod_name,
            profile: self.profile,
            has_adjunct: self.has_adjunct,
            synced_commit: None,
            sync_state: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn pod(annotations: BTreeMap<String, String>, spec: Option<PodSpec>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("gw-a-7c9f".to_string()),
                annotations: Some(annotations),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    fn container(name: &str) -> Container {
        Container {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn pod_without_cr_name_annotation_is_ignored() {
        let p = pod(BTreeMap::new(), None);
        assert!(extract_discovered_pod(&p, "plant-floor-a").is_none());
    }

    #[test]
    fn pod_with_mismatched_cr_name_is_ignored() {
        let mut annotations = BTreeMap::new();
        annotations.insert(annotations::POD_CR_NAME.to_string(), "other-record".to_string());
        let p = pod(annotations, None);
        assert!(extract_discovered_pod(&p, "plant-floor-a").is_none());
    }

    /// §4.4 step 4: gateway name and profile fall back to the pod name and
    /// "default" when their annotations are absent.
    #[test]
    fn missing_gateway_name_and_profile_annotations_fall_back_to_defaults() {
        let mut annotations = BTreeMap::new();
        annotations.insert(annotations::POD_CR_NAME.to_string(), "plant-floor-a".to_string());
        let p = pod(annotations, None);

        let discovered = extract_discovered_pod(&p, "plant-floor-a").unwrap();

        assert_eq!(discovered.pod_name, "gw-a-7c9f");
        assert_eq!(discovered.gateway_name, "gw-a-7c9f");
        assert_eq!(discovered.profile, "default");
        assert!(!discovered.has_adjunct);
    }

    #[test]
    fn adjunct_detected_among_init_containers_not_just_containers() {
        let mut annotations = BTreeMap::new();
        annotations.insert(annotations::POD_CR_NAME.to_string(), "plant-floor-a".to_string());
        annotations.insert(annotations::POD_GATEWAY_NAME.to_string(), "gw-a".to_string());
        annotations.insert(annotations::POD_PROFILE.to_string(), "edge".to_string());
        let spec = PodSpec {
            containers: vec![container("gateway")],
            init_containers: Some(vec![container(annotations::ADJUNCT_CONTAINER_NAME)]),
            ..Default::default()
        };
        let p = pod(annotations, Some(spec));

        let discovered = extract_discovered_pod(&p, "plant-floor-a").unwrap();

        assert_eq!(discovered.gateway_name, "gw-a");
        assert_eq!(discovered.profile, "edge");
        assert!(discovered.has_adjunct);
    }

    /// §4.4 step 5: a pod with neither container nor init-container named
    /// after the adjunct is flagged as missing it.
    #[test]
    fn pod_without_adjunct_container_anywhere_is_flagged() {
        let mut annotations = BTreeMap::new();
        annotations.insert(annotations::POD_CR_NAME.to_string(), "plant-floor-a".to_string());
        let spec = PodSpec {
            containers: vec![container("gateway")],
            ..Default::default()
        };
        let p = pod(annotations, Some(spec));

        let discovered = extract_discovered_pod(&p, "plant-floor-a").unwrap();
        assert!(!discovered.has_adjunct);
    }

    #[test]
    fn into_status_entry_carries_fields_and_starts_unsynced() {
        let discovered = DiscoveredPod {
            pod_name: "gw-a-7c9f".to_string(),
            gateway_name: "gw-a".to_string(),
            profile: "edge".to_string(),
            has_adjunct: true,
        };

        let entry = discovered.into_status_entry();

        assert_eq!(entry.pod_name, "gw-a-7c9f");
        assert_eq!(entry.gateway_name, "gw-a");
        assert_eq!(entry.profile, "edge");
        assert!(entry.has_adjunct);
        assert!(entry.synced_commit.is_none());
        assert!(entry.sync_state.is_none());
    }
}
