//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! command-line flags or environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Delay before re-running a claim whose stale claimRef was just released.
/// Gives the PV binder a chance to act on the cleared reference first.
pub const DEFAULT_REQUEUE_SOON_SECS: u64 = 5;

/// Fibonacci error backoff floor (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 1;

/// Fibonacci error backoff ceiling (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Default delay before restarting the watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Upper bound on claims reconciled at the same time
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 4;

/// Leader election lease validity (seconds)
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 15;

/// Leader election renew period (seconds), must stay below the lease duration
pub const DEFAULT_LEASE_RENEW_SECS: u64 = 5;

/// Default name of the leader election Lease
pub const DEFAULT_LEADER_ELECTION_ID: &str = "pvc-reclaimer-leader";

/// Namespace used for the Lease when `POD_NAMESPACE` is not set
pub const DEFAULT_LEADER_ELECTION_NAMESPACE: &str = "kube-system";

/// Field manager recorded on every patch this controller sends
pub const FIELD_MANAGER: &str = "pvc-reclaimer";

/// `PersistentVolumeClaim` phase the resolver acts on
pub const CLAIM_PHASE_PENDING: &str = "Pending";

/// `PersistentVolume` phase of a volume whose claim was deleted but which was kept
pub const VOLUME_PHASE_RELEASED: &str = "Released";

/// Reclaim policy that keeps a volume after its claim is gone
pub const RECLAIM_POLICY_RETAIN: &str = "Retain";

/// Claim condition type ignored by the conflict detector
pub const CONDITION_TYPE_RESIZING: &str = "Resizing";

/// Message fragment the PV binder emits when a volume is claimed by someone else
pub const BINDING_CONFLICT_MARKER: &str = "already bound";
