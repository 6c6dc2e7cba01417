//! # Cluster Store
//!
//! The three API calls the resolver makes, behind a trait so the decision logic can
//! run against a real API server or an in-memory fixture.

use crate::constants::FIELD_MANAGER;
use crate::controller::reconciler::types::ClaimKey;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::Client;
use thiserror::Error;

/// Store call failures, classified by how the caller should react
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist (HTTP 404)
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },
    /// The object changed since it was read (HTTP 409)
    #[error("{kind} {name} was modified concurrently: {message}")]
    Conflict {
        kind: &'static str,
        name: String,
        message: String,
    },
    /// Server-side contention or unavailability (HTTP 429 / 5xx)
    #[error("{kind} request unavailable ({code}): {message}")]
    Unavailable {
        kind: &'static str,
        code: u16,
        message: String,
    },
    /// Anything else the client reported (transport, auth, decoding)
    #[error(transparent)]
    Kube(#[from] kube::Error),
}

impl StoreError {
    /// Classify a kube client error for the given object
    #[must_use]
    pub fn from_kube(kind: &'static str, name: &str, error: kube::Error) -> Self {
        match error {
            kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound {
                kind,
                name: name.to_string(),
            },
            kube::Error::Api(api_err) if api_err.code == 409 => StoreError::Conflict {
                kind,
                name: name.to_string(),
                message: api_err.message.clone(),
            },
            kube::Error::Api(api_err) if api_err.code == 429 || api_err.code >= 500 => {
                StoreError::Unavailable {
                    kind,
                    code: api_err.code,
                    message: api_err.message.clone(),
                }
            }
            other => StoreError::Kube(other),
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Read/patch access to claims and volumes
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch a claim by namespace/name
    async fn get_claim(&self, key: &ClaimKey) -> Result<PersistentVolumeClaim, StoreError>;

    /// List every volume in the cluster, in the order the store returns them
    async fn list_volumes(&self) -> Result<Vec<PersistentVolume>, StoreError>;

    /// Apply a JSON merge patch to a volume
    async fn patch_volume(
        &self,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<PersistentVolume, StoreError>;
}

/// [`ClusterStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_claim(&self, key: &ClaimKey) -> Result<PersistentVolumeClaim, StoreError> {
        let claims: Api<PersistentVolumeClaim> =
            Api::namespaced(self.client.clone(), &key.namespace);
        claims
            .get(&key.name)
            .await
            .map_err(|e| StoreError::from_kube("PersistentVolumeClaim", &key.to_string(), e))
    }

    async fn list_volumes(&self) -> Result<Vec<PersistentVolume>, StoreError> {
        let volumes: Api<PersistentVolume> = Api::all(self.client.clone());
        volumes
            .list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| StoreError::from_kube("PersistentVolume", "*", e))
    }

    async fn patch_volume(
        &self,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<PersistentVolume, StoreError> {
        let volumes: Api<PersistentVolume> = Api::all(self.client.clone());
        volumes
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await
            .map_err(|e| StoreError::from_kube("PersistentVolume", name, e))
    }
}
