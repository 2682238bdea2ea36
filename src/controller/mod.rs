//! # Controller
//!
//! Reconciler-side modules for the `GatewaySync` control loop.
//!
//! - `backoff`: Fibonacci backoff mechanism for retries
//! - `reconcile`: per-step reconcile logic (validation, gateway discovery,
//!   metadata publication)
//! - `reconciler`: wires the steps above into the `kube_runtime::Controller`
//!   reconcile function and condition computation (§4.4)

pub mod backoff;
pub mod reconcile;
pub mod reconciler;
