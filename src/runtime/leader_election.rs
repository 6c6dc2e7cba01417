//! # Leader Election
//!
//! Lease-based leader election so only one replica reconciles at a time.
//!
//! Expiry is judged the way client-go does it: by how long ago *this* replica last
//! saw the lease record change, not by the `renewTime` written by another node, so
//! clock skew between nodes does not matter. Writes go through `replace` with the
//! lease's `resourceVersion`, so two candidates racing for the lease cannot both win.

use crate::config::LeaderElectionConfig;
use crate::observability;
use anyhow::{Context, Result};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use kube::api::{Api, ObjectMeta, PostParams};
use kube::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What to do with the lease as observed right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseDecision {
    /// Lease is free or expired: take it
    Acquire,
    /// We already hold it: extend it
    Renew,
    /// Someone else holds a live lease
    Wait,
}

/// Decide how to treat a lease given when its current record was first observed
#[must_use]
pub fn decide(
    spec: Option<&LeaseSpec>,
    identity: &str,
    observed_for: Duration,
    default_lease_duration: Duration,
) -> LeaseDecision {
    let Some(spec) = spec else {
        return LeaseDecision::Acquire;
    };
    match spec.holder_identity.as_deref() {
        None | Some("") => LeaseDecision::Acquire,
        Some(holder) if holder == identity => LeaseDecision::Renew,
        Some(_) => {
            let lease_duration = spec
                .lease_duration_seconds
                .and_then(|secs| u64::try_from(secs).ok())
                .map_or(default_lease_duration, Duration::from_secs);
            if observed_for >= lease_duration {
                LeaseDecision::Acquire
            } else {
                LeaseDecision::Wait
            }
        }
    }
}

/// Lease spec for `identity`, carrying over fields from `current`
///
/// # Errors
///
/// Returns an error if the resulting spec does not deserialize.
pub fn next_lease_spec(
    current: Option<&LeaseSpec>,
    identity: &str,
    lease_duration_secs: u64,
    decision: LeaseDecision,
) -> Result<LeaseSpec> {
    let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    let mut spec = match current {
        Some(current) => serde_json::to_value(current).context("failed to encode LeaseSpec")?,
        None => json!({}),
    };
    spec["holderIdentity"] = json!(identity);
    spec["leaseDurationSeconds"] = json!(lease_duration_secs);
    spec["renewTime"] = json!(now);
    if decision == LeaseDecision::Acquire {
        let transitions = current
            .filter(|c| c.holder_identity.as_deref().is_some_and(|h| !h.is_empty()))
            .and_then(|c| c.lease_transitions)
            .map_or(0, |t| t.saturating_add(1));
        spec["acquireTime"] = json!(now);
        spec["leaseTransitions"] = json!(transitions);
    }
    serde_json::from_value(spec).context("failed to build LeaseSpec")
}

/// Competes for, holds and releases a single Lease
pub struct LeaderElector {
    api: Api<Lease>,
    config: LeaderElectionConfig,
    /// Last lease record seen and when it was first seen
    observed: Option<(LeaseSpec, Instant)>,
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn is_conflict(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(api_err) if api_err.code == 409)
}

impl LeaderElector {
    #[must_use]
    pub fn new(client: Client, config: LeaderElectionConfig) -> Self {
        Self {
            api: Api::namespaced(client, &config.namespace),
            config,
            observed: None,
        }
    }

    /// How long the given record has been unchanged, from this replica's view
    fn observe(&mut self, spec: &LeaseSpec, now: Instant) -> Duration {
        match &self.observed {
            Some((seen, since)) if seen == spec => now.duration_since(*since),
            _ => {
                self.observed = Some((spec.clone(), now));
                Duration::ZERO
            }
        }
    }

    /// One acquire-or-renew attempt. Returns whether we hold the lease afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error on API failures other than a lost write race.
    pub async fn try_acquire_or_renew(&mut self) -> Result<bool> {
        let name = self.config.lease_name.clone();
        let identity = self.config.identity.clone();

        let Some(mut lease) = self.api.get_opt(&name).await? else {
            let spec = next_lease_spec(
                None,
                &identity,
                self.config.lease_duration_secs,
                LeaseDecision::Acquire,
            )?;
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some(self.config.namespace.clone()),
                    ..Default::default()
                },
                spec: Some(spec),
            };
            return match self.api.create(&PostParams::default(), &lease).await {
                Ok(_) => Ok(true),
                Err(e) if is_conflict(&e) => Ok(false),
                Err(e) => Err(e.into()),
            };
        };

        let current = lease.spec.clone().unwrap_or_default();
        let observed_for = self.observe(&current, Instant::now());
        let decision = decide(
            Some(&current),
            &identity,
            observed_for,
            self.config.lease_duration(),
        );
        if decision == LeaseDecision::Wait {
            debug!(
                holder = current.holder_identity.as_deref().unwrap_or_default(),
                "Lease held by another replica"
            );
            return Ok(false);
        }

        lease.spec = Some(next_lease_spec(
            Some(&current),
            &identity,
            self.config.lease_duration_secs,
            decision,
        )?);
        match self.api.replace(&name, &PostParams::default(), &lease).await {
            Ok(_) => {
                if decision == LeaseDecision::Acquire {
                    info!(lease = name.as_str(), identity = identity.as_str(), "Acquired leader lease");
                }
                Ok(true)
            }
            Err(e) if is_conflict(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Block until this replica leads, or shutdown is requested (returns `false`)
    ///
    /// # Errors
    ///
    /// Never returns API errors; they are logged and retried.
    pub async fn acquire(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<bool> {
        info!(
            lease = self.config.lease_name.as_str(),
            namespace = self.config.namespace.as_str(),
            identity = self.config.identity.as_str(),
            "Waiting to acquire leader lease"
        );
        loop {
            if *shutdown.borrow_and_update() {
                return Ok(false);
            }
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    observability::metrics::set_leader(true);
                    return Ok(true);
                }
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Leader lease acquisition attempt failed"),
            }
            tokio::select! {
                _ = shutdown.changed() => {}
                () = tokio::time::sleep(self.config.renew_period()) => {}
            }
        }
    }

    /// Keep renewing in the background; on losing the lease, request shutdown
    ///
    /// Leadership is considered lost when no renewal has succeeded for
    /// `lease_duration - renew_period`, before any other replica can take over.
    pub fn spawn_renewal(
        mut self,
        shutdown_tx: Arc<watch::Sender<bool>>,
    ) -> JoinHandle<LeaderElector> {
        tokio::spawn(async move {
            let mut shutdown = shutdown_tx.subscribe();
            let renew_deadline = self
                .config
                .lease_duration()
                .saturating_sub(self.config.renew_period());
            let mut last_renewed = Instant::now();
            loop {
                tokio::select! {
                    _ = shutdown.wait_for(|stopping| *stopping) => break,
                    () = tokio::time::sleep(self.config.renew_period()) => {}
                }
                match self.try_acquire_or_renew().await {
                    Ok(true) => last_renewed = Instant::now(),
                    Ok(false) => {
                        error!("Leader lease taken by another replica, shutting down");
                        observability::metrics::set_leader(false);
                        shutdown_tx.send_replace(true);
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Leader lease renewal failed");
                        if last_renewed.elapsed() >= renew_deadline {
                            error!("Could not renew leader lease before deadline, shutting down");
                            observability::metrics::set_leader(false);
                            shutdown_tx.send_replace(true);
                            break;
                        }
                    }
                }
            }
            self
        })
    }

    /// Give up the lease on graceful shutdown so a standby can take over at once
    ///
    /// # Errors
    ///
    /// Returns an error if the lease cannot be read or written.
    pub async fn release(&mut self) -> Result<()> {
        observability::metrics::set_leader(false);
        let Some(mut lease) = self.api.get_opt(&self.config.lease_name).await? else {
            return Ok(());
        };
        let Some(spec) = lease.spec.as_mut() else {
            return Ok(());
        };
        if spec.holder_identity.as_deref() != Some(self.config.identity.as_str()) {
            return Ok(());
        }
        spec.holder_identity = None;
        match self
            .api
            .replace(&self.config.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => {
                info!("Released leader lease");
                Ok(())
            }
            Err(e) if is_conflict(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEASE: Duration = Duration::from_secs(15);

    fn held_by(holder: &str) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(holder.to_string()),
            lease_duration_seconds: Some(15),
            lease_transitions: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_or_empty_lease_is_acquired() {
        assert_eq!(decide(None, "me", Duration::ZERO, LEASE), LeaseDecision::Acquire);
        assert_eq!(
            decide(Some(&LeaseSpec::default()), "me", Duration::ZERO, LEASE),
            LeaseDecision::Acquire
        );
        assert_eq!(
            decide(Some(&held_by("")), "me", Duration::ZERO, LEASE),
            LeaseDecision::Acquire
        );
    }

    #[test]
    fn test_own_lease_is_renewed() {
        assert_eq!(
            decide(Some(&held_by("me")), "me", Duration::from_secs(60), LEASE),
            LeaseDecision::Renew
        );
    }

    #[test]
    fn test_live_foreign_lease_waits() {
        assert_eq!(
            decide(Some(&held_by("other")), "me", Duration::from_secs(14), LEASE),
            LeaseDecision::Wait
        );
    }

    #[test]
    fn test_expired_foreign_lease_taken_over() {
        assert_eq!(
            decide(Some(&held_by("other")), "me", Duration::from_secs(15), LEASE),
            LeaseDecision::Acquire
        );
    }

    #[test]
    fn test_lease_duration_from_record_wins() {
        let mut spec = held_by("other");
        spec.lease_duration_seconds = Some(60);
        assert_eq!(
            decide(Some(&spec), "me", Duration::from_secs(30), LEASE),
            LeaseDecision::Wait
        );
    }

    #[test]
    fn test_acquire_bumps_transitions() {
        let spec = next_lease_spec(Some(&held_by("other")), "me", 15, LeaseDecision::Acquire)
            .unwrap();
        assert_eq!(spec.holder_identity.as_deref(), Some("me"));
        assert_eq!(spec.lease_transitions, Some(4));
        assert_eq!(spec.lease_duration_seconds, Some(15));
        assert!(spec.acquire_time.is_some());
        assert!(spec.renew_time.is_some());
    }

    #[test]
    fn test_renew_keeps_transitions() {
        let spec =
            next_lease_spec(Some(&held_by("me")), "me", 15, LeaseDecision::Renew).unwrap();
        assert_eq!(spec.lease_transitions, Some(3));
        assert!(spec.acquire_time.is_none());
        assert!(spec.renew_time.is_some());
    }

    #[test]
    fn test_fresh_lease_starts_at_zero_transitions() {
        let spec = next_lease_spec(None, "me", 15, LeaseDecision::Acquire).unwrap();
        assert_eq!(spec.lease_transitions, Some(0));
    }
}
