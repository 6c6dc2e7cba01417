//! # Admission
//!
//! Decides which claim change events schedule a reconciliation pass.
//!
//! - Created: always (covers catch-up after start-up)
//! - Updated: only on the transition into `Pending`
//! - Deleted / Generic: never
//!
//! This only reduces load; the resolver is safe to run on any claim.
//!
//! The watcher reports "this object now looks like X" rather than create/update,
//! so [`EventTracker`] remembers the last phase seen per claim to rebuild typed
//! events with the previous snapshot attached.

use crate::controller::reconciler::conflict::is_pending;
use crate::controller::reconciler::types::ClaimKey;
use crate::observability;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube_runtime::watcher;
use std::collections::{HashMap, HashSet};

/// A claim change, with the snapshots that matter for its kind
#[derive(Debug, Clone)]
pub enum ClaimEvent {
    Created(PersistentVolumeClaim),
    Updated {
        old: PersistentVolumeClaim,
        new: PersistentVolumeClaim,
    },
    Deleted(PersistentVolumeClaim),
    /// Externally injected trigger not tied to a watch change
    Generic(PersistentVolumeClaim),
}

impl ClaimEvent {
    /// The most recent snapshot carried by the event
    #[must_use]
    pub fn claim(&self) -> &PersistentVolumeClaim {
        match self {
            ClaimEvent::Created(claim) | ClaimEvent::Deleted(claim) | ClaimEvent::Generic(claim) => {
                claim
            }
            ClaimEvent::Updated { new, .. } => new,
        }
    }

    #[must_use]
    pub fn key(&self) -> ClaimKey {
        ClaimKey::from_claim(self.claim())
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClaimEvent::Created(_) => "created",
            ClaimEvent::Updated { .. } => "updated",
            ClaimEvent::Deleted(_) => "deleted",
            ClaimEvent::Generic(_) => "generic",
        }
    }
}

/// Whether an event should schedule a reconciliation pass
#[must_use]
pub fn admit(event: &ClaimEvent) -> bool {
    match event {
        ClaimEvent::Created(_) => true,
        ClaimEvent::Updated { old, new } => !is_pending(old) && is_pending(new),
        ClaimEvent::Deleted(_) | ClaimEvent::Generic(_) => false,
    }
}

/// Rebuilds typed [`ClaimEvent`]s from raw watcher events
///
/// During a (re)list the reflector only publishes the new objects to its store at
/// `InitDone`, so events built from `InitApply` are held back until then. A key
/// queued earlier would be looked up before its object is in the cache.
#[derive(Debug, Default)]
pub struct EventTracker {
    last_seen: HashMap<ClaimKey, PersistentVolumeClaim>,
    /// Keys seen during an in-progress relist, used to spot deletions missed while
    /// the watch was down
    relisted: Option<HashSet<ClaimKey>>,
    /// Events from the in-progress relist, released at `InitDone`
    held: Vec<ClaimEvent>,
}

impl EventTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate one watcher event into zero or more claim events
    pub fn observe(&mut self, event: watcher::Event<PersistentVolumeClaim>) -> Vec<ClaimEvent> {
        match event {
            watcher::Event::Init => {
                // Held events of an interrupted list stay: their claims are already
                // in `last_seen` and would otherwise come back as plain updates
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(claim) => {
                let key = ClaimKey::from_claim(&claim);
                let claim_event = self.apply(claim);
                match self.relisted.as_mut() {
                    Some(relisted) => {
                        relisted.insert(key);
                        self.held.push(claim_event);
                        Vec::new()
                    }
                    None => vec![claim_event],
                }
            }
            watcher::Event::InitDone => {
                let mut events = std::mem::take(&mut self.held);
                let Some(relisted) = self.relisted.take() else {
                    return events;
                };
                let gone: Vec<ClaimKey> = self
                    .last_seen
                    .keys()
                    .filter(|key| !relisted.contains(*key))
                    .cloned()
                    .collect();
                events.extend(
                    gone.into_iter()
                        .filter_map(|key| self.last_seen.remove(&key))
                        .map(ClaimEvent::Deleted),
                );
                events
            }
            watcher::Event::Apply(claim) => vec![self.apply(claim)],
            watcher::Event::Delete(claim) => {
                self.last_seen.remove(&ClaimKey::from_claim(&claim));
                vec![ClaimEvent::Deleted(claim)]
            }
        }
    }

    fn apply(&mut self, claim: PersistentVolumeClaim) -> ClaimEvent {
        let key = ClaimKey::from_claim(&claim);
        match self.last_seen.insert(key, claim.clone()) {
            Some(old) => ClaimEvent::Updated { old, new: claim },
            None => ClaimEvent::Created(claim),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.last_seen.len()
    }
}

/// What one watcher event means for the work queue
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Admission {
    /// Claims to reconcile
    pub admitted: Vec<ClaimKey>,
    /// Claims that are gone; their retry state can be dropped
    pub deleted: Vec<ClaimKey>,
}

/// Observe a watcher event and sort the resulting claim events
pub fn admitted_keys(
    tracker: &mut EventTracker,
    event: watcher::Event<PersistentVolumeClaim>,
) -> Admission {
    let mut admission = Admission::default();
    for claim_event in tracker.observe(event) {
        let admitted = admit(&claim_event);
        observability::metrics::increment_admission_events(claim_event.kind(), admitted);
        if admitted {
            admission.admitted.push(claim_event.key());
        } else if matches!(claim_event, ClaimEvent::Deleted(_)) {
            admission.deleted.push(claim_event.key());
        }
    }
    admission
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PersistentVolumeClaimStatus;
    use kube::api::ObjectMeta;

    fn claim(name: &str, phase: Option<&str>) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("apps".to_string()),
                ..Default::default()
            },
            spec: None,
            status: phase.map(|p| PersistentVolumeClaimStatus {
                phase: Some(p.to_string()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_created_always_admitted() {
        assert!(admit(&ClaimEvent::Created(claim("a", Some("Bound")))));
        assert!(admit(&ClaimEvent::Created(claim("a", None))));
    }

    #[test]
    fn test_update_into_pending_admitted() {
        let event = ClaimEvent::Updated {
            old: claim("a", Some("Bound")),
            new: claim("a", Some("Pending")),
        };
        assert!(admit(&event));

        let event = ClaimEvent::Updated {
            old: claim("a", None),
            new: claim("a", Some("Pending")),
        };
        assert!(admit(&event));
    }

    #[test]
    fn test_update_within_pending_not_admitted() {
        let event = ClaimEvent::Updated {
            old: claim("a", Some("Pending")),
            new: claim("a", Some("Pending")),
        };
        assert!(!admit(&event));
    }

    #[test]
    fn test_update_out_of_pending_not_admitted() {
        let event = ClaimEvent::Updated {
            old: claim("a", Some("Pending")),
            new: claim("a", Some("Bound")),
        };
        assert!(!admit(&event));
    }

    #[test]
    fn test_delete_and_generic_never_admitted() {
        assert!(!admit(&ClaimEvent::Deleted(claim("a", Some("Pending")))));
        assert!(!admit(&ClaimEvent::Generic(claim("a", Some("Pending")))));
    }

    #[test]
    fn test_tracker_first_sighting_is_created() {
        let mut tracker = EventTracker::new();
        let events = tracker.observe(watcher::Event::Apply(claim("a", Some("Pending"))));
        assert!(matches!(events.as_slice(), [ClaimEvent::Created(_)]));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_tracker_carries_previous_snapshot() {
        let mut tracker = EventTracker::new();
        tracker.observe(watcher::Event::Apply(claim("a", Some("Bound"))));
        let events = tracker.observe(watcher::Event::Apply(claim("a", Some("Pending"))));
        match events.as_slice() {
            [ClaimEvent::Updated { old, new }] => {
                assert!(!is_pending(old));
                assert!(is_pending(new));
            }
            other => panic!("expected one update, got {other:?}"),
        }
    }

    #[test]
    fn test_tracker_delete_forgets_claim() {
        let mut tracker = EventTracker::new();
        tracker.observe(watcher::Event::Apply(claim("a", Some("Pending"))));
        let events = tracker.observe(watcher::Event::Delete(claim("a", Some("Pending"))));
        assert!(matches!(events.as_slice(), [ClaimEvent::Deleted(_)]));
        assert_eq!(tracker.len(), 0);

        // Re-created claim is a creation again
        let events = tracker.observe(watcher::Event::Apply(claim("a", Some("Pending"))));
        assert!(matches!(events.as_slice(), [ClaimEvent::Created(_)]));
    }

    #[test]
    fn test_relist_reports_claims_missing_from_new_list() {
        let mut tracker = EventTracker::new();
        tracker.observe(watcher::Event::Apply(claim("a", Some("Bound"))));
        tracker.observe(watcher::Event::Apply(claim("b", Some("Bound"))));

        assert!(tracker.observe(watcher::Event::Init).is_empty());
        let events = tracker.observe(watcher::Event::InitApply(claim("a", Some("Pending"))));
        assert!(events.is_empty());

        let events = tracker.observe(watcher::Event::InitDone);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ClaimEvent::Updated { .. }));
        assert!(matches!(&events[1], ClaimEvent::Deleted(c) if c.metadata.name.as_deref() == Some("b")));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_admitted_keys_startup_list_schedules_everything() {
        let mut tracker = EventTracker::new();
        assert_eq!(admitted_keys(&mut tracker, watcher::Event::Init), Admission::default());
        let admission = admitted_keys(
            &mut tracker,
            watcher::Event::InitApply(claim("a", Some("Bound"))),
        );
        assert!(admission.admitted.is_empty());
        let admission = admitted_keys(&mut tracker, watcher::Event::InitDone);
        assert_eq!(admission.admitted, vec![ClaimKey::new("apps", "a")]);

        // Status churn on an already-pending claim is filtered
        admitted_keys(&mut tracker, watcher::Event::Apply(claim("a", Some("Pending"))));
        let admission =
            admitted_keys(&mut tracker, watcher::Event::Apply(claim("a", Some("Pending"))));
        assert!(admission.admitted.is_empty());
    }

    #[test]
    fn test_relist_creations_released_only_at_init_done() {
        let mut tracker = EventTracker::new();
        admitted_keys(&mut tracker, watcher::Event::Init);
        admitted_keys(&mut tracker, watcher::Event::InitApply(claim("a", Some("Bound"))));
        admitted_keys(&mut tracker, watcher::Event::InitDone);

        // Watch restarts; "b" was created while it was down
        assert_eq!(admitted_keys(&mut tracker, watcher::Event::Init), Admission::default());
        let admission = admitted_keys(
            &mut tracker,
            watcher::Event::InitApply(claim("b", Some("Pending"))),
        );
        assert!(admission.admitted.is_empty());

        let admission = admitted_keys(&mut tracker, watcher::Event::InitDone);
        assert_eq!(admission.admitted, vec![ClaimKey::new("apps", "b")]);
        assert_eq!(admission.deleted, vec![ClaimKey::new("apps", "a")]);
    }

    #[test]
    fn test_interrupted_relist_keeps_held_creations() {
        let mut tracker = EventTracker::new();
        admitted_keys(&mut tracker, watcher::Event::Init);
        admitted_keys(&mut tracker, watcher::Event::InitApply(claim("a", Some("Pending"))));

        // A new Init before InitDone starts the list over
        admitted_keys(&mut tracker, watcher::Event::Init);
        admitted_keys(&mut tracker, watcher::Event::InitApply(claim("a", Some("Pending"))));
        admitted_keys(&mut tracker, watcher::Event::InitApply(claim("b", Some("Pending"))));
        let mut admission = admitted_keys(&mut tracker, watcher::Event::InitDone);

        admission.admitted.sort();
        admission.admitted.dedup();
        assert_eq!(
            admission.admitted,
            vec![ClaimKey::new("apps", "a"), ClaimKey::new("apps", "b")]
        );
        assert!(admission.deleted.is_empty());
    }

    #[test]
    fn test_delete_reported_for_retry_cleanup() {
        let mut tracker = EventTracker::new();
        tracker.observe(watcher::Event::Apply(claim("a", Some("Pending"))));
        let admission =
            admitted_keys(&mut tracker, watcher::Event::Delete(claim("a", Some("Pending"))));
        assert!(admission.admitted.is_empty());
        assert_eq!(admission.deleted, vec![ClaimKey::new("apps", "a")]);
    }
}
