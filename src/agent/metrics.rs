//! # Agent Metrics
//!
//! Prometheus metrics for the `stoker-agent` poll loop (§4.3 "Observability").

use anyhow::Result;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static SYNC_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "stoker_agent_sync_duration_seconds",
            "Duration of one full sync tick (fetch + plan + apply + scan)",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("SYNC_DURATION metric options are valid")
});

static GIT_FETCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "stoker_agent_git_fetch_duration_seconds",
            "Duration of the clone/fetch+checkout step",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .expect("GIT_FETCH_DURATION metric options are valid")
});

static SCAN_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "stoker_agent_scan_duration_seconds",
            "Duration of the gateway projects+config reload calls",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .expect("SCAN_DURATION metric options are valid")
});

static FILES_CHANGED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stoker_agent_files_changed_total",
            "Total files changed by the sync engine, by operation kind",
        ),
        &["op"],
    )
    .expect("FILES_CHANGED_TOTAL metric options are valid")
});

static SKIPPED_TICKS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stoker_agent_skipped_ticks_total",
            "Total ticks skipped, by reason",
        ),
        &["reason"],
    )
    .expect("SKIPPED_TICKS_TOTAL metric options are valid")
});

static SYNC_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "stoker_agent_sync_errors_total",
            "Total failed sync ticks, by error kind",
        ),
        &["kind"],
    )
    .expect("SYNC_ERRORS_TOTAL metric options are valid")
});

static LAST_SUCCESS_TIMESTAMP: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "stoker_agent_last_success_timestamp_seconds",
        "Unix timestamp of the last successful sync",
    )
    .expect("LAST_SUCCESS_TIMESTAMP metric options are valid")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(SYNC_DURATION.clone()))?;
    REGISTRY.register(Box::new(GIT_FETCH_DURATION.clone()))?;
    REGISTRY.register(Box::new(SCAN_DURATION.clone()))?;
    REGISTRY.register(Box::new(FILES_CHANGED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SKIPPED_TICKS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SYNC_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LAST_SUCCESS_TIMESTAMP.clone()))?;
    Ok(())
}

pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

pub fn observe_sync_duration(seconds: f64) {
    SYNC_DURATION.observe(seconds);
}

pub fn observe_git_fetch_duration(seconds: f64) {
    GIT_FETCH_DURATION.observe(seconds);
}

pub fn observe_scan_duration(seconds: f64) {
    SCAN_DURATION.observe(seconds);
}

pub fn increment_files_changed(op: &str, count: u32) {
    FILES_CHANGED_TOTAL.with_label_values(&[op]).inc_by(u64::from(count));
}

pub fn increment_skipped(reason: &str) {
    SKIPPED_TICKS_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_sync_errors(kind: &str) {
    SYNC_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn set_last_success_now() {
    LAST_SUCCESS_TIMESTAMP.set(chrono::Utc::now().timestamp());
}
