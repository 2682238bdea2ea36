//! # Custom Resource Definitions
//!
//! CRD types for the `GatewaySync` desired-state record, plus the two
//! document types (metadata, status) the reconciler and agents exchange
//! through Kubernetes `ConfigMap`s.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `GatewaySync` spec and default values
//! - `status.rs` - Status subresource and shared `Condition` type
//! - `metadata_doc.rs` - Published metadata document (reconciler -> agents)
//! - `status_doc.rs` - Status document (agents -> reconciler)

mod metadata_doc;
mod spec;
mod status;
mod status_doc;

pub use metadata_doc::{MetadataDocument, ResolvedMapping, ResolvedProfile};
pub use spec::{
    default_designer_session_policy, default_gateway_port, default_poll_interval_seconds,
    default_sync_period_seconds, default_true, AgentImageConfig, DependsOn,
    DesignerSessionPolicy, GatewayEndpointTemplate, GatewaySync, GatewaySyncSpec, GitAuthConfig,
    GitSource, Mapping, MappingType, Polling, ProfileSpec, ResourceEnvelope, ResourceQuantities,
    SecretKeyRef,
};
pub use status::{Condition, DiscoveredGateway, GatewaySyncStatus, RefResolutionStatus};
pub use status_doc::{
    gateway_key_from_status_entry_key, parse_status_document, status_entry_key, FileChangeCounts,
    GatewayStatusEntry, StatusDocument, SyncState,
};
