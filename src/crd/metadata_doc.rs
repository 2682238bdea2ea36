//! # Published Metadata Document
//!
//! The reconciler's server-side-apply output (§3 "Published metadata
//! document", §4.4 step 3). Stored as a single JSON blob under the
//! `metadata.json` key of a `ConfigMap` owned by the `GatewaySync` record —
//! see `controller::reconciler::metadata_publish`.
//!
//! Every field here is derivable from the desired-state record plus the
//! resolved commit; the reconciler never mints state an agent could not
//! re-derive except the commit itself (§3 invariants).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::spec::{DependsOn, DesignerSessionPolicy, Mapping, MappingType};

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetadataDocument {
    pub r#ref: String,
    pub commit: String,
    pub repo_url: String,
    /// `"none"` when the source carries no auth reference.
    pub auth_type: String,
    pub exclude_patterns: Vec<String>,
    pub profiles: BTreeMap<String, ResolvedProfile>,
    /// The record's `metadata.generation` at publish time. Lets an agent
    /// distinguish "the user changed the spec" from "the commit moved
    /// under an unchanged spec" when deciding whether to follow a commit
    /// that looks like it goes backward (§9 open question on rollback).
    #[serde(default)]
    pub generation: i64,
}

/// A profile's mapping set with every optional field defaulted, so the
/// agent never has to re-derive a default the reconciler already applied.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedProfile {
    pub mappings: Vec<ResolvedMapping>,
    pub exclude_patterns: Vec<String>,
    pub variables: BTreeMap<String, String>,
    pub sync_period_seconds: u32,
    pub dry_run: bool,
    pub designer_session_policy: DesignerSessionPolicy,
    pub paused: bool,
    pub depends_on: Vec<DependsOn>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMapping {
    pub source: String,
    pub destination: String,
    pub r#type: MappingType,
    pub required: bool,
}

impl From<&Mapping> for ResolvedMapping {
    fn from(m: &Mapping) -> Self {
        Self {
            source: m.source.clone(),
            destination: m.destination.clone(),
            r#type: m.r#type,
            required: m.required,
        }
    }
}
