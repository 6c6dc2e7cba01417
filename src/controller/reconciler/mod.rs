//! # Reconciler
//!
//! Core reconciliation logic for `PersistentVolumeClaim` resources.
//!
//! The reconciler:
//! - Watches `PersistentVolumeClaim` resources (one namespace or all)
//! - Admits creations and transitions into `Pending`
//! - Detects claims blocked by a volume that still records an older binding
//! - Clears that volume's stale claimRef identity so the PV binder re-evaluates it
//!
//! ## Reconciliation Flow
//!
//! 1. Fetch the claim
//! 2. Gate on `Pending` + "already bound" condition
//! 3. List volumes, select the first stale-bound candidate
//! 4. Patch out `claimRef.uid` / `claimRef.resourceVersion`
//! 5. Requeue soon

pub mod admission;
pub mod conflict;
pub mod reconcile;
pub mod store;
pub mod types;

// Re-export public API
pub use admission::{admit, admitted_keys, Admission, ClaimEvent, EventTracker};
pub use conflict::{has_binding_conflict, is_blocked_by_stale_binding};
pub use reconcile::{reconcile, release_claim_ref_patch, select_stale_volume};
pub use store::{ClusterStore, KubeStore, StoreError};
pub use types::{BackoffState, ClaimKey, ReconcileOutcome, Reconciler, ReconcilerError};
