//! # Mutating Admission Webhook
//!
//! Intercepts pod-create admissions in labeled namespaces and injects the
//! agent as an adjunct init container with always-restart lifecycle
//! (§4.5). A pod failing any of the three qualifying conditions is
//! admitted unchanged; a qualifying pod missing its pre-declared live data
//! volume is also admitted unchanged, since there is nothing to mount the
//! adjunct's sync target into (§9 decision, see DESIGN.md).

use axum::{extract::State, response::IntoResponse, Json};
use json_patch::{AddOperation, Patch, PatchOperation};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::{Api, ResourceExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::annotations;
use crate::crd::GatewaySync;

use super::WebhookState;

/// Name of the pod volume assumed to already hold the gateway's live data
/// directory; the adjunct's corresponding mount path is read from whatever
/// container already mounts it (§9 decision).
const LIVE_DATA_VOLUME_NAME: &str = "ignition-data";
/// Name of the ephemeral volume backing the adjunct's local Git clone.
const CLONE_VOLUME_NAME: &str = "stoker-clone";
/// Name of the downward-API volume projecting this pod's labels, consumed
/// by `{{.Labels.<key>}}` mapping-template substitution (§4.2). There is no
/// single Downward API env var for "every label" (only per-key `fieldRef`
/// selectors, and the key set isn't known at injection time), so the whole
/// label set is projected as a `key="value"`-per-line file instead.
const PODINFO_VOLUME_NAME: &str = "stoker-podinfo";
const PODINFO_MOUNT_PATH: &str = "/etc/stoker-podinfo";
const PODINFO_LABELS_FILE: &str = "/etc/stoker-podinfo/labels";

pub async fn handle(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<Pod>>,
) -> impl IntoResponse {
    let request: AdmissionRequest<Pod> = match body.try_into() {
        Ok(req) => req,
        Err(err) => {
            warn!(error = %err, "admission webhook: failed to parse AdmissionReview");
            return Json(AdmissionResponse::invalid(err).into_review());
        }
    };

    let mut response = AdmissionResponse::from(&request);
    let Some(pod) = request.object.as_ref() else {
        return Json(response.into_review());
    };

    match mutate(&state, &request, pod).await {
        Ok(Some(patch)) => match response.clone().with_patch(patch) {
            Ok(patched) => response = patched,
            Err(err) => {
                warn!(error = %err, "admission webhook: failed to encode patch");
                response = response.deny(err.to_string());
            }
        },
        Ok(None) => {}
        Err(err) => {
            warn!(error = %err, "admission webhook: mutation failed, admitting pod unchanged");
        }
    }

    Json(response.into_review())
}

/// Returns `Some(patch)` iff the pod qualifies for injection and a live
/// data volume was found to mount the adjunct against.
async fn mutate(
    state: &WebhookState,
    request: &AdmissionRequest<Pod>,
    pod: &Pod,
) -> anyhow::Result<Option<Patch>> {
    let namespace = request
        .namespace
        .clone()
        .or_else(|| pod.namespace())
        .unwrap_or_else(|| "default".to_string());

    if !namespace_has_injection_label(state, &namespace).await? {
        return Ok(None);
    }

    let annotations = pod.metadata.annotations.clone().unwrap_or_default();
    let wants_injection = annotations
        .get(annotations::POD_INJECT)
        .is_some_and(|v| v == "true");
    let already_injected = annotations.contains_key(annotations::POD_INJECTED_MARKER);
    if !wants_injection || already_injected {
        return Ok(None);
    }

    let Some(mount_path) = find_live_data_mount(pod) else {
        warn!(
            namespace = %namespace,
            pod = pod.name_any(),
            "admission webhook: pod requested injection but declares no {} volume, skipping",
            LIVE_DATA_VOLUME_NAME
        );
        return Ok(None);
    };

    let cr_name = annotations
        .get(annotations::POD_CR_NAME)
        .cloned()
        .unwrap_or_default();
    let profile = annotations
        .get(annotations::POD_PROFILE)
        .cloned()
        .unwrap_or_else(|| "default".to_string());
    let gateway_name = annotations.get(annotations::POD_GATEWAY_NAME).cloned();
    let ref_override = annotations.get(annotations::POD_REF_OVERRIDE).cloned();

    let image = resolve_agent_image(state, &namespace, &cr_name, &annotations).await;

    let container = build_adjunct_container(
        state,
        &image,
        &cr_name,
        &profile,
        gateway_name.as_deref(),
        ref_override.as_deref(),
        &mount_path,
    );

    let mut ops = Vec::new();
    push_init_container(pod, &mut ops, container);
    push_volumes(pod, &mut ops);
    push_marker_annotation(&mut ops);
    push_observability_label(&mut ops);

    Ok(Some(Patch(ops)))
}

async fn namespace_has_injection_label(state: &WebhookState, namespace: &str) -> anyhow::Result<bool> {
    let api: Api<Namespace> = Api::all(state.client.clone());
    let ns = api.get(namespace).await?;
    Ok(ns
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(annotations::NAMESPACE_INJECTION_LABEL))
        .is_some_and(|v| v == "true"))
}

/// Agent image, tiered pod-annotation > record's `spec.agent` > process
/// default (§4.5).
async fn resolve_agent_image(
    state: &WebhookState,
    namespace: &str,
    cr_name: &str,
    annotations: &std::collections::BTreeMap<String, String>,
) -> String {
    if let Some(image) = annotations.get(crate::annotations::POD_AGENT_IMAGE) {
        return image.clone();
    }

    if !cr_name.is_empty() {
        let api: Api<GatewaySync> = Api::namespaced(state.client.clone(), namespace);
        if let Ok(record) = api.get(cr_name).await {
            if let Some(image_ref) = record.spec.agent.image_ref() {
                return image_ref;
            }
        }
    }

    state.config.default_agent_image.clone()
}

fn find_live_data_mount(pod: &Pod) -> Option<String> {
    let spec = pod.spec.as_ref()?;
    spec.containers.iter().find_map(|container| {
        container
            .volume_mounts
            .as_ref()?
            .iter()
            .find(|m| m.name == LIVE_DATA_VOLUME_NAME)
            .map(|m| m.mount_path.clone())
    })
}

fn build_adjunct_container(
    state: &WebhookState,
    image: &str,
    cr_name: &str,
    profile: &str,
    gateway_name: Option<&str>,
    ref_override: Option<&str>,
    live_root: &str,
) -> Value {
    let mut env = vec![
        json!({"name": "POD_NAMESPACE", "valueFrom": {"fieldRef": {"fieldPath": "metadata.namespace"}}}),
        json!({"name": "POD_NAME", "valueFrom": {"fieldRef": {"fieldPath": "metadata.name"}}}),
        json!({"name": "STOKER_CR_NAME", "value": cr_name}),
        json!({"name": "STOKER_PROFILE", "value": profile}),
        json!({"name": "STOKER_METADATA_NAME", "value": format!("{cr_name}-metadata")}),
        json!({"name": "STOKER_STATUS_NAME", "value": format!("{cr_name}-status")}),
        json!({"name": "STOKER_LIVE_ROOT", "value": live_root}),
        json!({"name": "STOKER_CLONE_ROOT", "value": "/tmp/stoker-clone"}),
        json!({"name": "STOKER_LABELS_FILE", "value": PODINFO_LABELS_FILE}),
    ];
    if let Some(gateway_name) = gateway_name {
        env.push(json!({"name": "STOKER_GATEWAY_NAME", "value": gateway_name}));
    }
    if let Some(ref_override) = ref_override {
        env.push(json!({"name": "STOKER_REF_OVERRIDE", "value": ref_override}));
    }

    json!({
        "name": state.config.adjunct_container_name,
        "image": image,
        "restartPolicy": "Always",
        "env": env,
        "volumeMounts": [
            {"name": CLONE_VOLUME_NAME, "mountPath": "/tmp/stoker-clone"},
            {"name": LIVE_DATA_VOLUME_NAME, "mountPath": live_root},
            {"name": PODINFO_VOLUME_NAME, "mountPath": PODINFO_MOUNT_PATH, "readOnly": true},
        ],
    })
}

fn push_init_container(pod: &Pod, ops: &mut Vec<PatchOperation>, container: Value) {
    let has_init_containers = pod
        .spec
        .as_ref()
        .is_some_and(|s| s.init_containers.as_ref().is_some_and(|c| !c.is_empty()));
    let path = if has_init_containers {
        "/spec/initContainers/-"
    } else {
        "/spec/initContainers"
    };
    let value = if has_init_containers { container } else { json!([container]) };
    ops.push(add_op(path, value));
}

/// Adds both adjunct volumes (the ephemeral clone directory and the
/// downward-API podinfo volume carrying pod labels). Built as one function
/// rather than two `push_*_volume` helpers: a JSON Patch `add` on an
/// already-populated `/spec/volumes` path replaces the whole array, so two
/// separate whole-array adds against a pod with no pre-existing volumes
/// would have the second overwrite the first.
fn push_volumes(pod: &Pod, ops: &mut Vec<PatchOperation>) {
    let clone_volume = json!({"name": CLONE_VOLUME_NAME, "emptyDir": {}});
    let podinfo_volume = json!({
        "name": PODINFO_VOLUME_NAME,
        "downwardAPI": {
            "items": [
                {"path": "labels", "fieldRef": {"fieldPath": "metadata.labels"}},
            ],
        },
    });

    let has_volumes = pod
        .spec
        .as_ref()
        .is_some_and(|s| s.volumes.as_ref().is_some_and(|v| !v.is_empty()));
    if has_volumes {
        ops.push(add_op("/spec/volumes/-", clone_volume));
        ops.push(add_op("/spec/volumes/-", podinfo_volume));
    } else {
        ops.push(add_op("/spec/volumes", json!([clone_volume, podinfo_volume])));
    }
}

fn push_marker_annotation(ops: &mut Vec<PatchOperation>) {
    ops.push(add_op(
        "/metadata/annotations/stoker.io~1injected",
        json!("true"),
    ));
}

fn push_observability_label(ops: &mut Vec<PatchOperation>) {
    ops.push(add_op("/metadata/labels/stoker.io~1has-agent", json!("true")));
}

fn add_op(path: &str, value: Value) -> PatchOperation {
    PatchOperation::Add(AddOperation {
        path: jsonptr::PointerBuf::parse(path).expect("static JSON pointer is well-formed"),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec, VolumeMount};

    fn pod_with_live_data_mount() -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "gateway".to_string(),
                    volume_mounts: Some(vec![VolumeMount {
                        name: LIVE_DATA_VOLUME_NAME.to_string(),
                        mount_path: "/usr/local/bin/ignition/data".to_string(),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn finds_live_data_mount_path_from_existing_container() {
        let pod = pod_with_live_data_mount();
        assert_eq!(
            find_live_data_mount(&pod),
            Some("/usr/local/bin/ignition/data".to_string())
        );
    }

    #[test]
    fn missing_live_data_volume_yields_none() {
        let pod = Pod::default();
        assert_eq!(find_live_data_mount(&pod), None);
    }

    #[test]
    fn init_container_path_targets_whole_array_when_absent() {
        let pod = Pod::default();
        let mut ops = Vec::new();
        push_init_container(&pod, &mut ops, json!({"name": "stoker-agent"}));
        let PatchOperation::Add(op) = &ops[0] else {
            panic!("expected an add operation");
        };
        assert_eq!(op.path.as_str(), "/spec/initContainers");
        assert!(op.value.is_array());
    }

    #[test]
    fn push_volumes_combines_both_into_one_op_when_pod_has_no_volumes() {
        let pod = Pod::default();
        let mut ops = Vec::new();
        push_volumes(&pod, &mut ops);

        assert_eq!(ops.len(), 1, "a single whole-array add avoids the second overwriting the first");
        let PatchOperation::Add(op) = &ops[0] else {
            panic!("expected an add operation");
        };
        assert_eq!(op.path.as_str(), "/spec/volumes");
        let volumes = op.value.as_array().expect("value should be an array");
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0]["name"], CLONE_VOLUME_NAME);
        assert_eq!(volumes[1]["name"], PODINFO_VOLUME_NAME);
    }

    #[test]
    fn push_volumes_appends_each_when_pod_already_has_volumes() {
        let mut pod = pod_with_live_data_mount();
        pod.spec.as_mut().unwrap().volumes = Some(vec![k8s_openapi::api::core::v1::Volume {
            name: "existing".to_string(),
            ..Default::default()
        }]);
        let mut ops = Vec::new();
        push_volumes(&pod, &mut ops);

        assert_eq!(ops.len(), 2);
        for op in &ops {
            let PatchOperation::Add(add) = op else {
                panic!("expected an add operation");
            };
            assert_eq!(add.path.as_str(), "/spec/volumes/-");
        }
    }
}
