//! # Controller Configuration
//!
//! Controller-level settings parsed from command-line flags, each of which can also be
//! supplied through an environment variable (populated from a ConfigMap using
//! `envFrom` in the deployment).

use crate::constants::{
    DEFAULT_BACKOFF_MAX_SECS, DEFAULT_BACKOFF_MIN_SECS, DEFAULT_LEADER_ELECTION_ID,
    DEFAULT_LEADER_ELECTION_NAMESPACE, DEFAULT_LEASE_DURATION_SECS, DEFAULT_LEASE_RENEW_SECS,
    DEFAULT_MAX_CONCURRENT_RECONCILIATIONS, DEFAULT_METRICS_PORT, DEFAULT_REQUEUE_SOON_SECS,
    DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
    DEFAULT_WATCH_RESTART_DELAY_SECS,
};
use clap::{Parser, ValueEnum};
use std::time::Duration;
use thiserror::Error;

/// Which volumes may be picked as the stale-bound candidate.
///
/// Two variants of this guard have been run in production. The strict one is the
/// default; the loose one can touch volumes that are correctly bound elsewhere and
/// is only kept selectable so operators can opt into it knowingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CandidateGuard {
    /// Reclaim policy `Retain` and phase `Released` are both required
    #[default]
    RetainedReleased,
    /// Any volume with a claimRef naming another claim qualifies
    AnyClaimRef,
}

impl CandidateGuard {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateGuard::RetainedReleased => "retained-released",
            CandidateGuard::AnyClaimRef => "any-claim-ref",
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Command-line arguments for the `pvc-reclaimer` binary
#[derive(Debug, Clone, Parser)]
#[command(
    name = "pvc-reclaimer",
    version,
    about = "Clears stale PersistentVolume claimRefs so Pending claims can rebind"
)]
pub struct Args {
    /// Only watch claims in this namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Port for /metrics, /healthz and /readyz
    #[arg(long, env = "METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Run leader election so only one replica reconciles at a time
    #[arg(long, env = "LEADER_ELECT", default_value_t = false)]
    pub leader_elect: bool,

    /// Namespace holding the leader election Lease
    #[arg(long, env = "POD_NAMESPACE", default_value = DEFAULT_LEADER_ELECTION_NAMESPACE)]
    pub leader_election_namespace: String,

    /// Name of the leader election Lease
    #[arg(long, env = "LEADER_ELECTION_ID", default_value = DEFAULT_LEADER_ELECTION_ID)]
    pub leader_election_id: String,

    /// Identity recorded as lease holder (defaults to the pod hostname)
    #[arg(long, env = "HOSTNAME")]
    pub leader_identity: Option<String>,

    #[arg(long, env = "LEASE_DURATION_SECS", default_value_t = DEFAULT_LEASE_DURATION_SECS)]
    pub lease_duration_secs: u64,

    #[arg(long, env = "LEASE_RENEW_SECS", default_value_t = DEFAULT_LEASE_RENEW_SECS)]
    pub lease_renew_secs: u64,

    /// Delay before re-checking a claim whose volume was just released
    #[arg(long, env = "REQUEUE_SOON_SECS", default_value_t = DEFAULT_REQUEUE_SOON_SECS)]
    pub requeue_soon_secs: u64,

    #[arg(long, env = "BACKOFF_MIN_SECS", default_value_t = DEFAULT_BACKOFF_MIN_SECS)]
    pub backoff_min_secs: u64,

    #[arg(long, env = "BACKOFF_MAX_SECS", default_value_t = DEFAULT_BACKOFF_MAX_SECS)]
    pub backoff_max_secs: u64,

    #[arg(
        long,
        env = "MAX_CONCURRENT_RECONCILIATIONS",
        default_value_t = DEFAULT_MAX_CONCURRENT_RECONCILIATIONS
    )]
    pub max_concurrent_reconciliations: u16,

    #[arg(
        long,
        env = "WATCH_RESTART_DELAY_SECS",
        default_value_t = DEFAULT_WATCH_RESTART_DELAY_SECS
    )]
    pub watch_restart_delay_secs: u64,

    /// Which volumes qualify as stale-bound candidates
    #[arg(long, env = "CANDIDATE_GUARD", value_enum, default_value_t = CandidateGuard::RetainedReleased)]
    pub candidate_guard: CandidateGuard,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("backoff minimum ({min}s) exceeds maximum ({max}s)")]
    BackoffRange { min: u64, max: u64 },
    #[error("lease renew period ({renew}s) must be shorter than lease duration ({duration}s)")]
    LeaseTiming { renew: u64, duration: u64 },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Leader election settings, present only when `--leader-elect` is set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderElectionConfig {
    pub namespace: String,
    pub lease_name: String,
    pub identity: String,
    pub lease_duration_secs: u64,
    pub renew_secs: u64,
}

impl LeaderElectionConfig {
    #[must_use]
    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    #[must_use]
    pub fn renew_period(&self) -> Duration {
        Duration::from_secs(self.renew_secs)
    }
}

/// Validated controller configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace scope for the claim watch; `None` watches every namespace
    pub watch_namespace: Option<String>,
    pub metrics_port: u16,
    pub server_startup_timeout_secs: u64,
    pub server_poll_interval_ms: u64,
    pub leader_election: Option<LeaderElectionConfig>,
    pub requeue_soon_secs: u64,
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
    pub max_concurrent_reconciliations: u16,
    pub watch_restart_delay_secs: u64,
    pub candidate_guard: CandidateGuard,
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            metrics_port: DEFAULT_METRICS_PORT,
            server_startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            server_poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
            leader_election: None,
            requeue_soon_secs: DEFAULT_REQUEUE_SOON_SECS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            candidate_guard: CandidateGuard::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl ControllerConfig {
    /// Build a validated configuration from parsed arguments
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when backoff bounds are inverted, the lease renew period
    /// is not shorter than the lease, or a period that must be positive is zero.
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        if args.backoff_min_secs > args.backoff_max_secs {
            return Err(ConfigError::BackoffRange {
                min: args.backoff_min_secs,
                max: args.backoff_max_secs,
            });
        }
        if args.max_concurrent_reconciliations == 0 {
            return Err(ConfigError::Zero("max_concurrent_reconciliations"));
        }
        if args.requeue_soon_secs == 0 {
            return Err(ConfigError::Zero("requeue_soon_secs"));
        }

        let leader_election = if args.leader_elect {
            if args.lease_renew_secs == 0 {
                return Err(ConfigError::Zero("lease_renew_secs"));
            }
            if args.lease_renew_secs >= args.lease_duration_secs {
                return Err(ConfigError::LeaseTiming {
                    renew: args.lease_renew_secs,
                    duration: args.lease_duration_secs,
                });
            }
            let identity = args
                .leader_identity
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("pvc-reclaimer-{}", uuid::Uuid::new_v4()));
            Some(LeaderElectionConfig {
                namespace: args.leader_election_namespace,
                lease_name: args.leader_election_id,
                identity,
                lease_duration_secs: args.lease_duration_secs,
                renew_secs: args.lease_renew_secs,
            })
        } else {
            None
        };

        Ok(Self {
            watch_namespace: args.watch_namespace.filter(|ns| !ns.is_empty()),
            metrics_port: args.metrics_port,
            leader_election,
            requeue_soon_secs: args.requeue_soon_secs,
            backoff_min_secs: args.backoff_min_secs,
            backoff_max_secs: args.backoff_max_secs,
            max_concurrent_reconciliations: args.max_concurrent_reconciliations,
            watch_restart_delay_secs: args.watch_restart_delay_secs,
            candidate_guard: args.candidate_guard,
            log_format: args.log_format,
            ..Self::default()
        })
    }

    /// Get requeue-soon duration
    #[must_use]
    pub fn requeue_soon_duration(&self) -> Duration {
        Duration::from_secs(self.requeue_soon_secs)
    }

    /// Get watch restart delay duration
    #[must_use]
    pub fn watch_restart_delay_duration(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["pvc-reclaimer"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_resolve() {
        let config = ControllerConfig::from_args(parse(&["--metrics-port", "9090"])).unwrap();
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.candidate_guard, CandidateGuard::RetainedReleased);
        assert_eq!(config.requeue_soon_duration(), Duration::from_secs(5));
        assert!(config.leader_election.is_none());
    }

    #[test]
    fn test_empty_namespace_means_cluster_wide() {
        let config =
            ControllerConfig::from_args(parse(&["--watch-namespace", ""])).unwrap();
        assert_eq!(config.watch_namespace, None);

        let config =
            ControllerConfig::from_args(parse(&["--watch-namespace", "storage"])).unwrap();
        assert_eq!(config.watch_namespace.as_deref(), Some("storage"));
    }

    #[test]
    fn test_loose_guard_is_selectable() {
        let config =
            ControllerConfig::from_args(parse(&["--candidate-guard", "any-claim-ref"])).unwrap();
        assert_eq!(config.candidate_guard, CandidateGuard::AnyClaimRef);
        assert_eq!(config.candidate_guard.as_str(), "any-claim-ref");
    }

    #[test]
    fn test_inverted_backoff_rejected() {
        let err = ControllerConfig::from_args(parse(&[
            "--backoff-min-secs",
            "60",
            "--backoff-max-secs",
            "10",
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::BackoffRange { min: 60, max: 10 });
    }

    #[test]
    fn test_leader_election_settings() {
        let config = ControllerConfig::from_args(parse(&[
            "--leader-elect",
            "--leader-election-namespace",
            "storage-system",
            "--leader-identity",
            "replica-a",
        ]))
        .unwrap();
        let le = config.leader_election.unwrap();
        assert_eq!(le.namespace, "storage-system");
        assert_eq!(le.identity, "replica-a");
        assert_eq!(le.lease_name, DEFAULT_LEADER_ELECTION_ID);
        assert_eq!(le.renew_period(), Duration::from_secs(5));
    }

    #[test]
    fn test_leader_identity_generated_when_empty() {
        let config =
            ControllerConfig::from_args(parse(&["--leader-elect", "--leader-identity", ""]))
                .unwrap();
        let le = config.leader_election.unwrap();
        assert!(le.identity.starts_with("pvc-reclaimer-"));
    }

    #[test]
    fn test_renew_must_be_shorter_than_lease() {
        let err = ControllerConfig::from_args(parse(&[
            "--leader-elect",
            "--lease-duration-secs",
            "5",
            "--lease-renew-secs",
            "5",
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::LeaseTiming {
                renew: 5,
                duration: 5
            }
        );
    }

    #[test]
    fn test_zero_requeue_soon_rejected() {
        let err = ControllerConfig::from_args(parse(&["--requeue-soon-secs", "0"])).unwrap_err();
        assert_eq!(err, ConfigError::Zero("requeue_soon_secs"));
    }
}
