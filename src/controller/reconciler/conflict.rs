//! # Conflict Detection
//!
//! Decides whether a Pending claim is blocked by a volume that still records an
//! older binding.
//!
//! The PV binder has no structured condition for this, so the check is a substring
//! match on condition messages. A wording change upstream silently disables the
//! controller (it will never find a conflict); that is an accepted limitation.

use crate::constants::{BINDING_CONFLICT_MARKER, CLAIM_PHASE_PENDING, CONDITION_TYPE_RESIZING};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimCondition};

/// True iff a non-`Resizing` condition reports that a volume is "already bound"
#[must_use]
pub fn has_binding_conflict(conditions: &[PersistentVolumeClaimCondition]) -> bool {
    conditions
        .iter()
        .filter(|condition| condition.type_ != CONDITION_TYPE_RESIZING)
        .any(|condition| {
            condition
                .message
                .as_deref()
                .is_some_and(|message| message.contains(BINDING_CONFLICT_MARKER))
        })
}

/// Observed phase of a claim, if the status carries one
#[must_use]
pub fn claim_phase(claim: &PersistentVolumeClaim) -> Option<&str> {
    claim.status.as_ref().and_then(|s| s.phase.as_deref())
}

#[must_use]
pub fn is_pending(claim: &PersistentVolumeClaim) -> bool {
    claim_phase(claim) == Some(CLAIM_PHASE_PENDING)
}

/// A claim is blocked when it is Pending and reports a binding conflict
#[must_use]
pub fn is_blocked_by_stale_binding(claim: &PersistentVolumeClaim) -> bool {
    is_pending(claim)
        && claim
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_deref())
            .is_some_and(has_binding_conflict)
}
