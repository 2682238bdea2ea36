//! # Controller Metrics
//!
//! Prometheus metrics for the `stoker-controller` reconcile loop.

use anyhow::Result;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stoker_reconciliations_total",
        "Total number of GatewaySync reconciliations",
    )
    .expect("RECONCILIATIONS_TOTAL metric options are valid")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "stoker_reconciliation_errors_total",
        "Total number of reconciliations that returned an error",
    )
    .expect("RECONCILIATION_ERRORS_TOTAL metric options are valid")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "stoker_reconciliation_duration_seconds",
            "Duration of one reconcile() call",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("RECONCILIATION_DURATION metric options are valid")
});

static REF_RESOLUTION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stoker_ref_resolution_errors_total",
            "Total number of git ref resolution failures, by kind",
        ),
        &["kind"],
    )
    .expect("REF_RESOLUTION_ERRORS_TOTAL metric options are valid")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stoker_requeues_total",
            "Total number of reconcile requeues, by reason",
        ),
        &["reason"],
    )
    .expect("REQUEUES_TOTAL metric options are valid")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REF_RESOLUTION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    Ok(())
}

pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(seconds: f64) {
    RECONCILIATION_DURATION.observe(seconds);
}

pub fn increment_ref_resolution_errors(kind: &str) {
    REF_RESOLUTION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_requeues(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}
