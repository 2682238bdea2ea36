//! # Observability
//!
//! Prometheus metrics and `tracing` initialization shared by every binary.

pub mod metrics;

use tracing_subscriber::EnvFilter;

/// Initialize the global `tracing` subscriber, falling back to `default`
/// when `RUST_LOG` is unset (grounded in the controller's original
/// `main.rs` initialization, minus the OpenTelemetry branch this crate
/// does not carry — see DESIGN.md).
pub fn init_tracing(default: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()),
        )
        .init();
}
