//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.
//! This module handles reconciliation errors and watch stream errors.

use crate::controller::reconciler::{BackoffState, ClaimKey, Reconciler, ReconcilerError};
use crate::observability;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Handle reconciliation errors with Fibonacci backoff
///
/// Backoff state is tracked per claim so one claim failing repeatedly does not slow
/// down retries for others. A version conflict on the patch is retried at the
/// backoff floor: the volume changed under us, and the next pass reads it fresh.
pub fn handle_reconciliation_error(
    obj: Arc<PersistentVolumeClaim>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let key = ClaimKey::from_claim(&obj);

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        claim.name = key.name.as_str(),
        claim.namespace = key.namespace.as_str(),
        error = %error
    );
    let _error_guard = error_span.enter();

    if !error.is_retryable() {
        info!("Reconciliation of {} stopped: {}", key, error);
        return Action::await_change();
    }

    error!("Reconciliation error for {}: {:?}", key, error);

    let min_secs = ctx.config.backoff_min_secs;
    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states
                .entry(key.clone())
                .or_insert_with(|| BackoffState::new(min_secs, ctx.config.backoff_max_secs));
            state.increment_error();
            let backoff = state.backoff.next_backoff_seconds();
            (backoff, state.error_count)
        }
        Err(e) => {
            warn!(
                "Failed to lock backoff_states: {}, using default backoff",
                e
            );
            (ctx.config.backoff_max_secs, 0)
        }
    };

    if error.is_conflict() {
        info!(
            "🔄 Volume changed since it was listed, retrying {} in {}s (error count: {})",
            key, min_secs, error_count
        );
        observability::metrics::increment_requeues_total("conflict");
        return Action::requeue(Duration::from_secs(min_secs));
    }

    let next_trigger_time = i64::try_from(backoff_seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|delay| chrono::Utc::now().checked_add_signed(delay))
        .map_or_else(|| "unknown".to_string(), |at| at.to_rfc3339());
    info!(
        "🔄 Retrying {} with Fibonacci backoff: {}s (error count: {}, next attempt {})",
        key,
        backoff_seconds,
        error_count,
        next_trigger_time
    );

    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// Coarse classification of claim watch stream errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// RBAC revoked or token expired
    Unauthorized,
    /// Resource version too old; the watcher relists on its own
    Expired,
    /// API server storage reinitialising or rate limiting
    Throttled,
    Other,
}

/// Classify a watch error from its rendered message
///
/// The watcher wraps API errors several layers deep, so this works on the debug
/// string rather than matching variants.
#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    if error_string.contains("401") || error_string.contains("Unauthorized") {
        WatchErrorKind::Unauthorized
    } else if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        WatchErrorKind::Expired
    } else if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        WatchErrorKind::Throttled
    } else {
        WatchErrorKind::Other
    }
}

/// Log a watch stream error according to its kind
///
/// The watcher applies its own backoff and keeps going, so nothing here sleeps or
/// restarts; it only makes the failure actionable in the logs.
pub fn handle_watch_stream_error(error_string: &str) -> WatchErrorKind {
    let kind = classify_watch_error(error_string);
    match kind {
        WatchErrorKind::Unauthorized => {
            error!(
                "❌ Claim watch authentication failed (401 Unauthorized) - RBAC may have been revoked or token expired"
            );
            error!("🔍 SRE Diagnostics:");
            error!("   1. Verify the ClusterRole grants list/watch on persistentvolumeclaims:");
            error!("      kubectl auth can-i watch persistentvolumeclaims --as=system:serviceaccount:<ns>:pvc-reclaimer --all-namespaces");
            error!("   2. Verify the ClusterRole grants list/patch on persistentvolumes:");
            error!("      kubectl auth can-i patch persistentvolumes --as=system:serviceaccount:<ns>:pvc-reclaimer");
        }
        WatchErrorKind::Expired => {
            warn!(error_type = "410", "watch.error.resource_version_expired");
        }
        WatchErrorKind::Throttled => {
            warn!("API server throttling claim watch (429), watcher will back off");
        }
        WatchErrorKind::Other => {
            error!("Claim watch stream error: {}", error_string);
        }
    }
    kind
}
