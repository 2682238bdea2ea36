//! # Stoker
//!
//! A Kubernetes controller and sync agent that replicate Ignition gateway
//! configuration trees from a Git repository into the live data directory
//! of running gateway pods.
//!
//! ## Module Structure
//!
//! - `annotations` - stable pod/record annotation and label constants (§6)
//! - `config` - process-wide configuration for each binary, read from env
//! - `crd` - the `GatewaySync` custom resource and its document types
//! - `git` - ref resolution (§4.1) and the agent's local checkout (§4.3)
//! - `sync` - the file-level sync engine (§4.2)
//! - `controller` - the reconciler and its per-step reconcile logic (§4.4)
//! - `agent` - the per-gateway poll loop (§4.3)
//! - `webhook` - the mutating admission webhook and push receiver (§4.5)
//! - `observability` - Prometheus metrics and `tracing` initialization
//! - `server` - shared HTTP scaffolding for metrics and health probes
//! - `build_info` - build-time version metadata

pub mod agent;
pub mod annotations;
pub mod build_info;
pub mod config;
pub mod controller;
pub mod crd;
pub mod git;
pub mod observability;
pub mod server;
pub mod sync;
pub mod webhook;

pub use crd::GatewaySync;
