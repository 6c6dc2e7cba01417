//! Common test utilities for reconciliation tests
//!
//! Provides an in-memory [`ClusterStore`] that counts calls, records patches and
//! can be told to fail or hang, plus fixture builders for claims and volumes.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ObjectReference, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimCondition,
    PersistentVolumeClaimStatus, PersistentVolumeSpec, PersistentVolumeStatus,
};
use kube::api::ObjectMeta;
use pvc_reclaimer::config::{CandidateGuard, ControllerConfig};
use pvc_reclaimer::controller::reconciler::{ClaimKey, ClusterStore, Reconciler, StoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

pub const CONFLICT_MESSAGE: &str =
    "volume \"pv-data\" already bound to a different claim.";

/// How a store call should misbehave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    NotFound,
    Conflict,
    Unavailable,
    /// Never complete; only shutdown can end the call
    Hang,
}

impl Failure {
    fn error(self, kind: &'static str, name: &str) -> StoreError {
        match self {
            Failure::NotFound => StoreError::NotFound {
                kind,
                name: name.to_string(),
            },
            Failure::Conflict => StoreError::Conflict {
                kind,
                name: name.to_string(),
                message: "the object has been modified".to_string(),
            },
            Failure::Unavailable | Failure::Hang => StoreError::Unavailable {
                kind,
                code: 503,
                message: "etcdserver: leader changed".to_string(),
            },
        }
    }
}

/// In-memory claims and volumes
#[derive(Debug, Default)]
pub struct FakeStore {
    claims: Mutex<HashMap<ClaimKey, PersistentVolumeClaim>>,
    volumes: Mutex<Vec<PersistentVolume>>,
    pub get_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub patch_calls: AtomicUsize,
    /// Every patch received, with the volume name, including rejected ones
    pub patches: Mutex<Vec<(String, serde_json::Value)>>,
    pub fail_get: Mutex<Option<Failure>>,
    pub fail_list: Mutex<Option<Failure>>,
    pub fail_patch: Mutex<Option<Failure>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_claim(self, claim: PersistentVolumeClaim) -> Self {
        self.claims
            .lock()
            .unwrap()
            .insert(ClaimKey::from_claim(&claim), claim);
        self
    }

    pub fn with_volume(self, volume: PersistentVolume) -> Self {
        self.volumes.lock().unwrap().push(volume);
        self
    }

    pub fn fail(&self, slot: &Mutex<Option<Failure>>, failure: Option<Failure>) {
        *slot.lock().unwrap() = failure;
    }

    pub fn volume(&self, name: &str) -> PersistentVolume {
        self.volumes
            .lock()
            .unwrap()
            .iter()
            .find(|v| v.metadata.name.as_deref() == Some(name))
            .cloned()
            .unwrap()
    }

    pub fn calls(&self) -> (usize, usize, usize) {
        (
            self.get_calls.load(Ordering::SeqCst),
            self.list_calls.load(Ordering::SeqCst),
            self.patch_calls.load(Ordering::SeqCst),
        )
    }

    pub fn recorded_patches(&self) -> Vec<(String, serde_json::Value)> {
        self.patches.lock().unwrap().clone()
    }

    async fn maybe_fail(
        slot: &Mutex<Option<Failure>>,
        kind: &'static str,
        name: &str,
    ) -> Result<(), StoreError> {
        let failure = *slot.lock().unwrap();
        match failure {
            None => Ok(()),
            Some(Failure::Hang) => {
                std::future::pending::<()>().await;
                Err(Failure::Hang.error(kind, name))
            }
            Some(failure) => Err(failure.error(kind, name)),
        }
    }
}

#[async_trait]
impl ClusterStore for FakeStore {
    async fn get_claim(&self, key: &ClaimKey) -> Result<PersistentVolumeClaim, StoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Self::maybe_fail(&self.fail_get, "PersistentVolumeClaim", &key.to_string()).await?;
        self.claims
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| Failure::NotFound.error("PersistentVolumeClaim", &key.to_string()))
    }

    async fn list_volumes(&self) -> Result<Vec<PersistentVolume>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Self::maybe_fail(&self.fail_list, "PersistentVolume", "*").await?;
        Ok(self.volumes.lock().unwrap().clone())
    }

    async fn patch_volume(
        &self,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<PersistentVolume, StoreError> {
        self.patch_calls.fetch_add(1, Ordering::SeqCst);
        self.patches
            .lock()
            .unwrap()
            .push((name.to_string(), patch.clone()));
        Self::maybe_fail(&self.fail_patch, "PersistentVolume", name).await?;

        let mut volumes = self.volumes.lock().unwrap();
        let volume = volumes
            .iter_mut()
            .find(|v| v.metadata.name.as_deref() == Some(name))
            .ok_or_else(|| Failure::NotFound.error("PersistentVolume", name))?;

        if let Some(expected) = patch["metadata"]["resourceVersion"].as_str() {
            if volume.metadata.resource_version.as_deref() != Some(expected) {
                return Err(Failure::Conflict.error("PersistentVolume", name));
            }
        }

        let claim_ref_patch = &patch["spec"]["claimRef"];
        if let Some(claim_ref) = volume.spec.as_mut().and_then(|s| s.claim_ref.as_mut()) {
            if claim_ref_patch.get("uid").is_some_and(serde_json::Value::is_null) {
                claim_ref.uid = None;
            }
            if claim_ref_patch
                .get("resourceVersion")
                .is_some_and(serde_json::Value::is_null)
            {
                claim_ref.resource_version = None;
            }
        }

        let next_version = volume
            .metadata
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(1, |v| v + 1);
        volume.metadata.resource_version = Some(next_version.to_string());
        Ok(volume.clone())
    }
}

/// A claim in `phase`, carrying the given condition messages
pub fn claim(
    namespace: &str,
    name: &str,
    phase: Option<&str>,
    messages: &[&str],
) -> PersistentVolumeClaim {
    let conditions = messages
        .iter()
        .map(|message| PersistentVolumeClaimCondition {
            type_: "Pending".to_string(),
            status: "True".to_string(),
            message: Some((*message).to_string()),
            ..Default::default()
        })
        .collect();
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{name}-new")),
            resource_version: Some("10".to_string()),
            ..Default::default()
        },
        spec: None,
        status: Some(PersistentVolumeClaimStatus {
            phase: phase.map(str::to_string),
            conditions: Some(conditions),
            ..Default::default()
        }),
    }
}

/// A Pending claim blocked by a stale binding
pub fn blocked_claim(namespace: &str, name: &str) -> PersistentVolumeClaim {
    claim(namespace, name, Some("Pending"), &[CONFLICT_MESSAGE])
}

/// A volume whose claimRef names `bound_to` (namespace, name) with a stale uid
pub fn volume(
    name: &str,
    policy: &str,
    phase: &str,
    bound_to: Option<(&str, &str)>,
) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            resource_version: Some("100".to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            persistent_volume_reclaim_policy: Some(policy.to_string()),
            claim_ref: bound_to.map(|(namespace, claim)| ObjectReference {
                kind: Some("PersistentVolumeClaim".to_string()),
                namespace: Some(namespace.to_string()),
                name: Some(claim.to_string()),
                uid: Some(format!("uid-{claim}-old")),
                resource_version: Some("42".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: Some(PersistentVolumeStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
    }
}

/// A Retain + Released volume still bound to `bound_to`
pub fn released_volume(name: &str, bound_to: (&str, &str)) -> PersistentVolume {
    volume(name, "Retain", "Released", Some(bound_to))
}

pub fn config(guard: CandidateGuard) -> ControllerConfig {
    ControllerConfig {
        candidate_guard: guard,
        ..ControllerConfig::default()
    }
}

/// Reconciler over `store`, with the shutdown sender kept by the caller
pub fn reconciler(
    store: Arc<FakeStore>,
    guard: CandidateGuard,
) -> (Reconciler, watch::Sender<bool>) {
    let (tx, rx) = watch::channel(false);
    (Reconciler::new(store, config(guard), rx), tx)
}
