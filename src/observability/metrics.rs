//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `pvc_reclaimer_reconciliations_total` - Total number of reconciliation passes
//! - `pvc_reclaimer_reconciliation_errors_total` - Total number of failed passes
//! - `pvc_reclaimer_reconciliation_duration_seconds` - Duration of reconciliation passes
//! - `pvc_reclaimer_claim_refs_released_total` - Volumes whose stale claimRef was cleared
//! - `pvc_reclaimer_admission_events_total` - Claim events seen, by kind and decision
//! - `pvc_reclaimer_requeues_total` - Requeues scheduled, by reason
//! - `pvc_reclaimer_is_leader` - 1 while this replica holds the leader lease

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

// Metrics
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pvc_reclaimer_reconciliations_total",
        "Total number of reconciliation passes",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pvc_reclaimer_reconciliation_errors_total",
        "Total number of reconciliation passes that returned an error",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "pvc_reclaimer_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static CLAIM_REFS_RELEASED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "pvc_reclaimer_claim_refs_released_total",
        "Total number of PersistentVolumes whose stale claimRef was cleared",
    )
    .expect("Failed to create CLAIM_REFS_RELEASED_TOTAL metric - this should never happen")
});

static ADMISSION_EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "pvc_reclaimer_admission_events_total",
            "Claim change events seen by the admission filter",
        ),
        &["event", "admitted"],
    )
    .expect("Failed to create ADMISSION_EVENTS_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "pvc_reclaimer_requeues_total",
            "Total number of requeues scheduled by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static IS_LEADER: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "pvc_reclaimer_is_leader",
        "1 while this replica holds the leader election lease",
    )
    .expect("Failed to create IS_LEADER metric - this should never happen")
});

/// Register all metrics with the process registry
///
/// # Errors
///
/// Returns an error if a metric is registered twice.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(CLAIM_REFS_RELEASED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ADMISSION_EVENTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(IS_LEADER.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_claim_refs_released() {
    CLAIM_REFS_RELEASED_TOTAL.inc();
}

pub fn increment_admission_events(event: &str, admitted: bool) {
    let admitted = if admitted { "true" } else { "false" };
    ADMISSION_EVENTS_TOTAL
        .with_label_values(&[event, admitted])
        .inc();
}

/// Reasons: "stale-binding-released", "error-backoff", "conflict"
pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn set_leader(is_leader: bool) {
    IS_LEADER.set(i64::from(is_leader));
}
