//! # Types
//!
//! Core types for the reconciler.

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::reconciler::store::{ClusterStore, StoreError};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;

/// Identity of the claim a reconciliation pass works on
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClaimKey {
    pub namespace: String,
    pub name: String,
}

impl ClaimKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a claim object; claims without a namespace fall back to `default`
    #[must_use]
    pub fn from_claim(claim: &PersistentVolumeClaim) -> Self {
        Self {
            namespace: claim.namespace().unwrap_or_else(|| "default".to_string()),
            name: claim.name_any(),
        }
    }
}

impl std::fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What a successful pass asks of the work queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing to do until the claim changes again
    NoAction,
    /// A stale claimRef was released; re-check this claim shortly
    RequeueSoon,
}

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("failed to fetch claim {key}: {source}")]
    FetchClaim {
        key: ClaimKey,
        #[source]
        source: StoreError,
    },
    #[error("failed to list persistent volumes: {0}")]
    ListVolumes(#[source] StoreError),
    #[error("failed to release claimRef on volume {volume}: {source}")]
    ReleaseClaimRef {
        volume: String,
        #[source]
        source: StoreError,
    },
    #[error("reconciliation of {0} cancelled by shutdown")]
    Cancelled(ClaimKey),
}

impl ReconcilerError {
    fn store_error(&self) -> Option<&StoreError> {
        match self {
            ReconcilerError::FetchClaim { source, .. }
            | ReconcilerError::ReleaseClaimRef { source, .. }
            | ReconcilerError::ListVolumes(source) => Some(source),
            ReconcilerError::Cancelled(_) => None,
        }
    }

    /// The volume changed between list and patch
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.store_error().is_some_and(StoreError::is_conflict)
    }

    /// Whether re-running the pass later with fresh state can succeed.
    /// Every store failure is; a cancelled pass is not re-run by this process.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ReconcilerError::Cancelled(_))
    }
}

/// Backoff state for a specific claim
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Everything a reconciliation pass needs, built once at start-up and shared
pub struct Reconciler {
    pub store: Arc<dyn ClusterStore>,
    pub config: ControllerConfig,
    /// Flips to `true` on shutdown; in-flight store calls abort when it does
    pub shutdown: watch::Receiver<bool>,
    // Backoff state per claim (identified by namespace/name)
    // Owned by the error policy layer, cleared on a successful pass
    pub backoff_states: Arc<Mutex<HashMap<ClaimKey, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("shutdown", &*self.shutdown.borrow())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        store: Arc<dyn ClusterStore>,
        config: ControllerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            config,
            shutdown,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run a store call unless shutdown is signalled first
    ///
    /// # Errors
    ///
    /// Returns [`ReconcilerError::Cancelled`] if shutdown wins the race; the store
    /// future is dropped and its request abandoned.
    pub async fn cancellable<T, F>(&self, key: &ClaimKey, call: F) -> Result<T, ReconcilerError>
    where
        F: std::future::Future<Output = T>,
    {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow_and_update() {
            return Err(ReconcilerError::Cancelled(key.clone()));
        }
        let stopping = async move {
            if shutdown.wait_for(|stopping| *stopping).await.is_err() {
                // Sender dropped: shutdown can no longer be requested
                std::future::pending::<()>().await;
            }
        };
        tokio::select! {
            biased;
            () = stopping => Err(ReconcilerError::Cancelled(key.clone())),
            result = call => Ok(result),
        }
    }

    /// Forget accumulated errors for a claim after a clean pass or once it is gone
    pub fn reset_backoff(&self, key: &ClaimKey) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(key);
        }
    }
}
