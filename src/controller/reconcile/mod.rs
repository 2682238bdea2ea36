//! # Reconcile Steps
//!
//! Per-step reconcile logic invoked by `controller::reconciler` (§4.4):
//! spec validation, ref resolution glue, metadata publication, gateway
//! discovery, and status aggregation. Kept as free functions over the
//! shared CRD types rather than methods on a god object, so each step can
//! be unit-tested against a bare `GatewaySyncSpec`/`StatusDocument`.

pub mod gateway_discovery;
pub mod metadata_publish;
pub mod status_aggregation;
pub mod validation;

pub use gateway_discovery::{discover, DiscoveredPod};
pub use metadata_publish::{build_metadata_document, metadata_configmap_name, publish};
pub use status_aggregation::{aggregate, read_status_document, status_configmap_name, Aggregation};
pub use validation::{validate_spec, ValidationError};
