//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use pvc_reclaimer::prelude::*;
//! ```

// Store seam - needed for alternative cluster backends
pub use crate::controller::reconciler::{ClusterStore, KubeStore, StoreError};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    admit, reconcile, BackoffState, ClaimEvent, ClaimKey, EventTracker, ReconcileOutcome,
    Reconciler, ReconcilerError,
};

// Config types
pub use crate::config::{CandidateGuard, ControllerConfig, LeaderElectionConfig};
