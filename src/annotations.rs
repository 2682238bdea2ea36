//! # Annotation & Label Contract
//!
//! Stable string constants for the pod annotations and namespace label that
//! make up the user-facing contract between operators, the admission
//! webhook, the reconciler, and the agent (§6 "Pod annotations").

/// Namespace label that opts a namespace into admission-time injection.
pub const NAMESPACE_INJECTION_LABEL: &str = "stoker.io/injection-enabled";

/// Pod annotation requesting injection of the agent adjunct.
pub const POD_INJECT: &str = "stoker.io/inject";
/// Pod annotation naming the `GatewaySync` record this pod belongs to
/// (the "unit-link" annotation consulted by gateway discovery, §4.4 step 4).
pub const POD_CR_NAME: &str = "stoker.io/cr-name";
/// Pod annotation naming the sync profile this pod's agent should drive.
pub const POD_PROFILE: &str = "stoker.io/profile";
/// Optional pod annotation overriding the gateway identity used as the
/// status-document key; falls back to the pod name.
pub const POD_GATEWAY_NAME: &str = "stoker.io/gateway-name";
/// Advisory pod annotation letting the agent resolve its own ref instead of
/// the one published in the metadata document (§9).
pub const POD_REF_OVERRIDE: &str = "stoker.io/ref-override";
/// Debug pod annotation overriding the agent adjunct image.
pub const POD_AGENT_IMAGE: &str = "stoker.io/agent-image";
/// Marker the webhook stamps on a pod once injected, preventing re-injection.
pub const POD_INJECTED_MARKER: &str = "stoker.io/injected";
/// Observability label stamped alongside the injected marker.
pub const POD_OBSERVABILITY_LABEL: &str = "stoker.io/has-agent";

/// `GatewaySync` record annotation written by the push receiver to trigger
/// an immediate reconcile (§4.4 "Annotation-driven fast path").
pub const RECORD_REQUESTED_REF: &str = "stoker.io/requested-ref";
/// Instant (RFC 3339) the push event was accepted, alongside the requested ref.
pub const RECORD_REQUESTED_REF_INSTANT: &str = "stoker.io/requested-ref-instant";
/// Source tag identifying which push-receiver parser matched (github, argocd, kargo, generic).
pub const RECORD_REQUESTED_REF_SOURCE: &str = "stoker.io/requested-ref-source";

/// Name of the adjunct container injected by the admission webhook.
pub const ADJUNCT_CONTAINER_NAME: &str = "stoker-agent";
