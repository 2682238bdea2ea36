//! # Push Receiver
//!
//! `POST /webhook/{namespace}/{name}` accepts push-style events from
//! GitHub, ArgoCD, Kargo, or a generic `{"ref": "<value>"}` body and
//! annotates the matching `GatewaySync` record with a requested ref,
//! triggering the reconciler's annotation-driven fast path (§4.4, §4.5).
//!
//! Shape detection is an ordered list of parsers, each returning
//! `Option<PushRequest>`; the first non-empty match wins (§9 redesign
//! flag, replacing ad hoc field sniffing).

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use kube::api::{Api, Patch, PatchParams};
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, warn};

use crate::annotations::{
    RECORD_REQUESTED_REF, RECORD_REQUESTED_REF_INSTANT, RECORD_REQUESTED_REF_SOURCE,
};
use crate::crd::GatewaySync;

use super::WebhookState;

type HmacSha256 = Hmac<Sha256>;

/// A requested ref extracted from a push payload, tagged with the parser
/// that recognized it.
struct PushRequest {
    r#ref: String,
    source: &'static str,
}

/// Ordered parser list; the first one to recognize the payload's shape wins.
const PARSERS: &[fn(&Value) -> Option<PushRequest>] = &[parse_github, parse_argocd, parse_kargo, parse_generic];

pub async fn handle(
    State(state): State<Arc<WebhookState>>,
    Path((namespace, name)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(secret) = &state.config.webhook_shared_secret {
        match verify_signature(secret, &headers, &body) {
            Ok(()) => {}
            Err(response) => return response,
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")).into_response()
        }
    };

    let Some(request) = PARSERS.iter().find_map(|parser| parser(&payload)) else {
        return (
            StatusCode::BAD_REQUEST,
            "unrecognized push payload shape (expected GitHub, ArgoCD, Kargo, or {\"ref\": ...})",
        )
            .into_response();
    };

    let api: Api<GatewaySync> = Api::namespaced(state.client.clone(), &namespace);
    if let Err(e) = api.get(&name).await {
        warn!(namespace = %namespace, name = %name, error = %e, "push receiver: record not found");
        return (
            StatusCode::NOT_FOUND,
            format!("GatewaySync {namespace}/{name} not found"),
        )
            .into_response();
    }

    let patch = json!({
        "metadata": {
            "annotations": {
                RECORD_REQUESTED_REF: request.r#ref,
                RECORD_REQUESTED_REF_INSTANT: Utc::now().to_rfc3339(),
                RECORD_REQUESTED_REF_SOURCE: request.source,
            }
        }
    });

    if let Err(e) = api
        .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        warn!(namespace = %namespace, name = %name, error = %e, "push receiver: failed to annotate record");
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to annotate record: {e}"))
            .into_response();
    }

    info!(
        namespace = %namespace,
        name = %name,
        r#ref = %request.r#ref,
        source = request.source,
        "push receiver: annotated record with requested ref"
    );
    StatusCode::OK.into_response()
}

fn verify_signature(secret: &str, headers: &HeaderMap, body: &[u8]) -> Result<(), axum::response::Response> {
    let Some(header) = headers.get("X-Hub-Signature-256").and_then(|v| v.to_str().ok()) else {
        return Err((StatusCode::UNAUTHORIZED, "missing X-Hub-Signature-256 header").into_response());
    };
    let Some(hex_sig) = header.strip_prefix("sha256=") else {
        return Err((StatusCode::UNAUTHORIZED, "malformed X-Hub-Signature-256 header").into_response());
    };

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts a key of any length");
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    if expected.eq_ignore_ascii_case(hex_sig) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "signature mismatch").into_response())
    }
}

/// GitHub push event: `{"ref": "refs/heads/main", "after": "<sha>", "repository": {...}}`.
fn parse_github(payload: &Value) -> Option<PushRequest> {
    let raw_ref = payload.get("ref")?.as_str()?;
    payload.get("repository")?;
    payload.get("after")?;
    let r#ref = raw_ref
        .strip_prefix("refs/heads/")
        .or_else(|| raw_ref.strip_prefix("refs/tags/"))
        .unwrap_or(raw_ref)
        .to_string();
    Some(PushRequest {
        r#ref,
        source: "github",
    })
}

/// ArgoCD Application event: `{"application": {"status": {"sync": {"revision": "..."}}}}`.
fn parse_argocd(payload: &Value) -> Option<PushRequest> {
    let app = payload.get("application")?;
    let revision = app
        .pointer("/status/sync/revision")
        .or_else(|| app.pointer("/spec/source/targetRevision"))?
        .as_str()?;
    Some(PushRequest {
        r#ref: revision.to_string(),
        source: "argocd",
    })
}

/// Kargo promotion/freight event: `{"freight": {"commits": [{"id": "..."}]}}`.
fn parse_kargo(payload: &Value) -> Option<PushRequest> {
    let freight = payload.get("freight")?;
    let commit_id = freight
        .pointer("/commits/0/id")
        .or_else(|| freight.get("ref"))?
        .as_str()?;
    Some(PushRequest {
        r#ref: commit_id.to_string(),
        source: "kargo",
    })
}

/// Generic fallback shape: `{"ref": "<value>"}` with none of the richer
/// fields the provider-specific parsers look for.
fn parse_generic(payload: &Value) -> Option<PushRequest> {
    let r#ref = payload.get("ref")?.as_str()?.to_string();
    Some(PushRequest {
        r#ref,
        source: "generic",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_push_strips_refs_heads_prefix() {
        let payload = json!({
            "ref": "refs/heads/release/2.0",
            "after": "abc123",
            "repository": {"full_name": "example/repo"}
        });
        let request = parse_github(&payload).expect("should match github shape");
        assert_eq!(request.r#ref, "release/2.0");
        assert_eq!(request.source, "github");
    }

    #[test]
    fn argocd_event_reads_sync_revision() {
        let payload = json!({
            "application": {"status": {"sync": {"revision": "deadbeef"}}}
        });
        let request = parse_argocd(&payload).expect("should match argocd shape");
        assert_eq!(request.r#ref, "deadbeef");
    }

    #[test]
    fn kargo_event_reads_first_commit_id() {
        let payload = json!({
            "freight": {"commits": [{"id": "cafef00d"}]}
        });
        let request = parse_kargo(&payload).expect("should match kargo shape");
        assert_eq!(request.r#ref, "cafef00d");
    }

    #[test]
    fn generic_shape_is_the_fallback() {
        let payload = json!({"ref": "main"});
        assert!(parse_github(&payload).is_none());
        assert!(parse_argocd(&payload).is_none());
        assert!(parse_kargo(&payload).is_none());
        let request = parse_generic(&payload).expect("should match generic shape");
        assert_eq!(request.r#ref, "main");
        assert_eq!(request.source, "generic");
    }

    #[test]
    fn ordered_parsers_prefer_github_over_generic_when_both_match() {
        let payload = json!({
            "ref": "refs/heads/main",
            "after": "abc123",
            "repository": {"full_name": "example/repo"}
        });
        let request = PARSERS.iter().find_map(|p| p(&payload)).expect("some parser matches");
        assert_eq!(request.source, "github");
    }

    #[test]
    fn unrecognized_shape_matches_no_parser() {
        let payload = json!({"unrelated": "field"});
        assert!(PARSERS.iter().find_map(|p| p(&payload)).is_none());
    }

    #[test]
    fn signature_verification_accepts_matching_hmac_and_rejects_mismatch() {
        let secret = "shared-secret";
        let body = b"{\"ref\":\"main\"}";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        let mut good_headers = HeaderMap::new();
        good_headers.insert(
            "X-Hub-Signature-256",
            format!("sha256={sig}").parse().unwrap(),
        );
        assert!(verify_signature(secret, &good_headers, body).is_ok());

        let mut bad_headers = HeaderMap::new();
        bad_headers.insert("X-Hub-Signature-256", "sha256=deadbeef".parse().unwrap());
        assert!(verify_signature(secret, &bad_headers, body).is_err());
    }
}
