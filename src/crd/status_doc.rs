//! # Status Document
//!
//! Written by agents, aggregated by the reconciler (§3 "Status document").
//! Conceptually a single map keyed by gateway identity, but stored as one
//! `ConfigMap.data` entry *per gateway* (`gateway-<identity>.json`) rather
//! than one blob for the whole record: the access discipline is one writer
//! per document key, many readers (§5 "Shared resources"), and a shared
//! blob can't honor that — two agents racing a read-modify-write of the
//! same key would drop whichever entry lost the race. Giving each gateway
//! its own `ConfigMap` key lets server-side apply, scoped to a distinct
//! per-agent field manager, merge at key granularity instead.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type StatusDocument = BTreeMap<String, GatewayStatusEntry>;

const STATUS_KEY_PREFIX: &str = "gateway-";
const STATUS_KEY_SUFFIX: &str = ".json";

/// The `ConfigMap.data` key one gateway's status entry is stored under.
/// Gateway identities are always valid Kubernetes object names (RFC 1123
/// labels: lowercase alphanumeric and `-`), which already satisfy the
/// `ConfigMap.data` key charset (alphanumeric, `-`, `_`, `.`), so no further
/// escaping is needed.
#[must_use]
pub fn status_entry_key(gateway_key: &str) -> String {
    format!("{STATUS_KEY_PREFIX}{gateway_key}{STATUS_KEY_SUFFIX}")
}

/// Recovers the gateway identity from a `ConfigMap.data` key produced by
/// [`status_entry_key`]; `None` for keys that don't match the convention
/// (e.g. a stray key left by something else).
#[must_use]
pub fn gateway_key_from_status_entry_key(data_key: &str) -> Option<&str> {
    data_key
        .strip_prefix(STATUS_KEY_PREFIX)?
        .strip_suffix(STATUS_KEY_SUFFIX)
}

/// Assembles a [`StatusDocument`] from a status `ConfigMap`'s raw `data`
/// map, skipping keys that don't match the per-gateway convention and
/// entries that fail to parse (a single malformed entry must not block
/// aggregation of every other gateway's status).
#[must_use]
pub fn parse_status_document(data: &BTreeMap<String, String>) -> StatusDocument {
    let mut doc = StatusDocument::new();
    for (key, value) in data {
        let Some(gateway_key) = gateway_key_from_status_entry_key(key) else {
            continue;
        };
        match serde_json::from_str::<GatewayStatusEntry>(value) {
            Ok(entry) => {
                doc.insert(gateway_key.to_string(), entry);
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "skipping malformed status entry");
            }
        }
    }
    doc
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    Pending,
    Synced,
    Error,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileChangeCounts {
    #[serde(default)]
    pub added: u32,
    #[serde(default)]
    pub modified: u32,
    #[serde(default)]
    pub deleted: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatusEntry {
    pub sync_state: SyncState,
    #[serde(default)]
    pub synced_commit: Option<String>,
    #[serde(default)]
    pub synced_ref: Option<String>,
    #[serde(default)]
    pub last_sync_instant: Option<String>,
    #[serde(default)]
    pub last_sync_duration_ms: Option<u64>,
    pub agent_version: String,
    #[serde(default)]
    pub last_scan_result: Option<String>,
    #[serde(default)]
    pub files_changed: FileChangeCounts,
    #[serde(default)]
    pub projects_synced: Vec<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub profile_name: String,
    #[serde(default)]
    pub dry_run_diff: Option<FileChangeCounts>,
    #[serde(default)]
    pub designer_sessions_blocked: bool,
}

impl GatewayStatusEntry {
    /// Invariant check for §8 item 3: `syncedCommit` transitions only
    /// `empty -> full40hex -> other full40hex`, never back to empty.
    #[must_use]
    pub fn allows_transition_to(&self, new_commit: &str) -> bool {
        match &self.synced_commit {
            None => true,
            Some(_) if new_commit.is_empty() => false,
            Some(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(synced_commit: Option<&str>) -> GatewayStatusEntry {
        GatewayStatusEntry {
            sync_state: SyncState::Synced,
            synced_commit: synced_commit.map(str::to_string),
            synced_ref: None,
            last_sync_instant: None,
            last_sync_duration_ms: None,
            agent_version: "0.1.0".to_string(),
            last_scan_result: None,
            files_changed: FileChangeCounts::default(),
            projects_synced: Vec::new(),
            error_message: None,
            profile_name: "default".to_string(),
            dry_run_diff: None,
            designer_sessions_blocked: false,
        }
    }

    #[test]
    fn empty_to_full_commit_is_allowed() {
        assert!(entry(None).allows_transition_to(&"a".repeat(40)));
    }

    #[test]
    fn full_to_another_full_commit_is_allowed() {
        assert!(entry(Some(&"a".repeat(40))).allows_transition_to(&"b".repeat(40)));
    }

    #[test]
    fn full_back_to_empty_is_rejected() {
        assert!(!entry(Some(&"a".repeat(40))).allows_transition_to(""));
    }

    /// Round-trip law (§8): a status document serialized by an agent and
    /// re-parsed by the controller preserves every field.
    #[test]
    fn status_document_round_trips_through_json() {
        let mut doc: StatusDocument = StatusDocument::new();
        doc.insert("gw-1".to_string(), entry(Some(&"c".repeat(40))));

        let serialized = serde_json::to_string(&doc).unwrap();
        let restored: StatusDocument = serde_json::from_str(&serialized).unwrap();

        assert_eq!(doc.len(), restored.len());
        assert_eq!(doc["gw-1"].synced_commit, restored["gw-1"].synced_commit);
        assert_eq!(doc["gw-1"].sync_state, restored["gw-1"].sync_state);
    }

    #[test]
    fn status_entry_key_round_trips_through_gateway_key_extraction() {
        let key = status_entry_key("gw-blue-1");
        assert_eq!(key, "gateway-gw-blue-1.json");
        assert_eq!(gateway_key_from_status_entry_key(&key), Some("gw-blue-1"));
    }

    #[test]
    fn gateway_key_extraction_rejects_unrelated_keys() {
        assert_eq!(gateway_key_from_status_entry_key("status.json"), None);
        assert_eq!(gateway_key_from_status_entry_key("gateway-x"), None);
    }

    /// Two gateways' entries live under distinct `ConfigMap.data` keys;
    /// parsing must recover both independently of each other (the
    /// per-key-ownership property the field-manager split depends on).
    #[test]
    fn parse_status_document_assembles_entries_from_per_gateway_keys() {
        let mut data = BTreeMap::new();
        data.insert(
            status_entry_key("gw-blue"),
            serde_json::to_string(&entry(Some(&"a".repeat(40)))).unwrap(),
        );
        data.insert(
            status_entry_key("gw-red"),
            serde_json::to_string(&entry(Some(&"b".repeat(40)))).unwrap(),
        );
        data.insert("unrelated-key".to_string(), "not json".to_string());

        let doc = parse_status_document(&data);
        assert_eq!(doc.len(), 2);
        assert_eq!(doc["gw-blue"].synced_commit, Some("a".repeat(40)));
        assert_eq!(doc["gw-red"].synced_commit, Some("b".repeat(40)));
    }

    #[test]
    fn parse_status_document_skips_malformed_entries_without_failing() {
        let mut data = BTreeMap::new();
        data.insert(status_entry_key("gw-a"), "{not valid json".to_string());
        data.insert(
            status_entry_key("gw-b"),
            serde_json::to_string(&entry(Some(&"c".repeat(40)))).unwrap(),
        );

        let doc = parse_status_document(&data);
        assert_eq!(doc.len(), 1);
        assert!(doc.contains_key("gw-b"));
    }
}
