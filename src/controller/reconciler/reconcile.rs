//! # Stale-Binding Resolution
//!
//! One pass over a single claim:
//!
//! 1. Fetch the claim (gone → nothing to do)
//! 2. Gate on phase `Pending` and a binding-conflict condition
//! 3. List all volumes and pick the first one whose claimRef names another claim
//! 4. Clear that claimRef's `uid` and `resourceVersion`, leaving name/namespace
//!    intact, with a merge patch pinned to the volume's observed `resourceVersion`
//! 5. Ask to be re-run shortly so the PV binder can act first
//!
//! At most one volume is patched per pass. Store errors are returned untouched so
//! the work queue retries the whole pass with fresh state.

use crate::config::CandidateGuard;
use crate::constants::{RECLAIM_POLICY_RETAIN, VOLUME_PHASE_RELEASED};
use crate::controller::reconciler::conflict::{
    claim_phase, is_blocked_by_stale_binding, is_pending,
};
use crate::controller::reconciler::types::{
    ClaimKey, ReconcileOutcome, Reconciler, ReconcilerError,
};
use crate::observability;
use k8s_openapi::api::core::v1::PersistentVolume;
use kube::ResourceExt;
use serde_json::json;
use std::time::Instant;
use tracing::{debug, info, Instrument};

/// Whether a volume passes the candidate guard, before the claimRef comparison
#[must_use]
pub fn passes_guard(volume: &PersistentVolume, guard: CandidateGuard) -> bool {
    match guard {
        CandidateGuard::RetainedReleased => {
            let policy = volume
                .spec
                .as_ref()
                .and_then(|s| s.persistent_volume_reclaim_policy.as_deref());
            let phase = volume.status.as_ref().and_then(|s| s.phase.as_deref());
            policy == Some(RECLAIM_POLICY_RETAIN) && phase == Some(VOLUME_PHASE_RELEASED)
        }
        CandidateGuard::AnyClaimRef => true,
    }
}

/// First volume, in list order, whose claimRef is stale relative to `claim`
///
/// Which of several qualifying volumes wins depends on list order, which the API
/// server does not define.
#[must_use]
pub fn select_stale_volume<'a>(
    claim: &ClaimKey,
    volumes: &'a [PersistentVolume],
    guard: CandidateGuard,
) -> Option<&'a PersistentVolume> {
    volumes.iter().find(|volume| {
        let Some(claim_ref) = volume.spec.as_ref().and_then(|s| s.claim_ref.as_ref()) else {
            return false;
        };
        if !passes_guard(volume, guard) {
            return false;
        }
        let points_at_claim = claim_ref.name.as_deref() == Some(claim.name.as_str())
            && claim_ref.namespace.as_deref() == Some(claim.namespace.as_str());
        !points_at_claim
    })
}

/// Merge patch that drops the claimRef's identity fields.
///
/// `metadata.resourceVersion` makes the API server reject the patch with 409 if
/// the volume changed after it was listed.
#[must_use]
pub fn release_claim_ref_patch(volume: &PersistentVolume) -> serde_json::Value {
    let mut patch = json!({
        "spec": {
            "claimRef": {
                "uid": null,
                "resourceVersion": null,
            }
        }
    });
    if let Some(resource_version) = volume.metadata.resource_version.as_deref() {
        patch["metadata"] = json!({ "resourceVersion": resource_version });
    }
    patch
}

/// Reconcile a single claim
///
/// # Errors
///
/// Returns [`ReconcilerError`] when fetching the claim (other than not-found),
/// listing volumes, or patching the selected volume fails, or when shutdown
/// interrupts one of those calls.
pub async fn reconcile(
    key: &ClaimKey,
    ctx: &Reconciler,
) -> Result<ReconcileOutcome, ReconcilerError> {
    let span = tracing::info_span!(
        "reconciler.reconcile",
        claim.name = key.name.as_str(),
        claim.namespace = key.namespace.as_str()
    );
    let start = Instant::now();
    observability::metrics::increment_reconciliations();

    let result = reconcile_inner(key, ctx).instrument(span).await;

    observability::metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
    if result.is_err() {
        observability::metrics::increment_reconciliation_errors();
    }
    result
}

async fn reconcile_inner(
    key: &ClaimKey,
    ctx: &Reconciler,
) -> Result<ReconcileOutcome, ReconcilerError> {
    let claim = match ctx.cancellable(key, ctx.store.get_claim(key)).await? {
        Ok(claim) => claim,
        Err(e) if e.is_not_found() => {
            debug!("Claim no longer exists, nothing to do");
            return Ok(ReconcileOutcome::NoAction);
        }
        Err(source) => {
            return Err(ReconcilerError::FetchClaim {
                key: key.clone(),
                source,
            })
        }
    };

    if !is_blocked_by_stale_binding(&claim) {
        if is_pending(&claim) {
            debug!("Pending claim reports no binding conflict");
        } else {
            debug!(phase = claim_phase(&claim).unwrap_or("unknown"), "Claim is not Pending");
        }
        return Ok(ReconcileOutcome::NoAction);
    }

    let volumes = ctx
        .cancellable(key, ctx.store.list_volumes())
        .await?
        .map_err(ReconcilerError::ListVolumes)?;

    let Some(volume) = select_stale_volume(key, &volumes, ctx.config.candidate_guard) else {
        debug!(
            volumes = volumes.len(),
            "No volume holds a stale claimRef for this claim"
        );
        return Ok(ReconcileOutcome::NoAction);
    };

    let volume_name = volume.name_any();
    let previous_claim = volume
        .spec
        .as_ref()
        .and_then(|s| s.claim_ref.as_ref())
        .map(|r| {
            format!(
                "{}/{}",
                r.namespace.as_deref().unwrap_or_default(),
                r.name.as_deref().unwrap_or_default()
            )
        })
        .unwrap_or_default();

    info!(
        volume = volume_name.as_str(),
        previous_claim = previous_claim.as_str(),
        "Releasing PV claimRef"
    );

    let patch = release_claim_ref_patch(volume);
    ctx.cancellable(key, ctx.store.patch_volume(&volume_name, &patch))
        .await?
        .map_err(|source| ReconcilerError::ReleaseClaimRef {
            volume: volume_name.clone(),
            source,
        })?;

    observability::metrics::increment_claim_refs_released();
    Ok(ReconcileOutcome::RequeueSoon)
}
