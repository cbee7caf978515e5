//! Cluster capability interface
//!
//! The workflow talks to the cluster only through [`ClusterResourceClient`].
//! [`KubeResourceClient`] is the production implementation; tests use
//! the generated `MockClusterResourceClient` or an in-memory fake.

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Result;

pub mod job;
pub mod kubernetes;

pub use self::kubernetes::KubeResourceClient;

/// Secret payload: field name to base64-encoded value
pub type SecretData = BTreeMap<String, String>;

/// Result of a create call.
///
/// A resumed run after a partial failure finds objects from the previous
/// attempt; those report `AlreadyExists` instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The object was created by this call
    Created,
    /// An object with the same name was already present
    AlreadyExists,
}

impl std::fmt::Display for CreateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::AlreadyExists => write!(f, "already exists"),
        }
    }
}

/// Parameters for the one-shot CA generation job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Job name
    pub name: String,
    /// Namespace the job runs in
    pub namespace: String,
    /// Generator image
    pub image: String,
    /// ServiceAccount the pod runs as
    pub service_account: String,
    /// Name of the secret the generator writes
    pub secret_name: String,
    /// Common name of the generated CA certificate
    pub common_name: String,
}

/// Operations the provisioning workflow needs from the cluster.
///
/// Deletes treat a missing object as success. `apply_manifest` is
/// idempotent: re-applying an existing object does not error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterResourceClient: Send + Sync {
    /// Whether a namespace exists
    async fn namespace_exists(&self, name: &str) -> Result<bool>;

    /// Whether a CustomResourceDefinition is registered
    async fn crd_exists(&self, name: &str) -> Result<bool>;

    /// Server-side apply a (possibly multi-document) manifest
    async fn apply_manifest(&self, manifest: &str) -> Result<()>;

    /// Fetch a secret's data, `None` if the secret does not exist
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<SecretData>>;

    /// Create a ServiceAccount from a manifest in `namespace`
    async fn create_service_account(&self, manifest: &str, namespace: &str)
        -> Result<CreateOutcome>;

    /// Create a Role from a manifest in `namespace`
    async fn create_role(&self, manifest: &str, namespace: &str) -> Result<CreateOutcome>;

    /// Create a RoleBinding from a manifest in `namespace`
    async fn create_role_binding(&self, manifest: &str, namespace: &str)
        -> Result<CreateOutcome>;

    /// Create the one-shot CA generation job
    async fn create_job(&self, request: &JobRequest) -> Result<CreateOutcome>;

    /// Block until the job finishes; `true` if it succeeded.
    ///
    /// The implementation owns the timeout policy.
    async fn wait_job(&self, name: &str, namespace: &str) -> Result<bool>;

    /// Delete a ServiceAccount
    async fn delete_service_account(&self, name: &str, namespace: &str) -> Result<()>;

    /// Delete a Role
    async fn delete_role(&self, name: &str, namespace: &str) -> Result<()>;

    /// Delete a RoleBinding
    async fn delete_role_binding(&self, name: &str, namespace: &str) -> Result<()>;

    /// Delete a Job and its pods
    async fn delete_job(&self, name: &str, namespace: &str) -> Result<()>;

    /// Whether a cert-manager ClusterIssuer exists
    async fn cluster_issuer_exists(&self, name: &str) -> Result<bool>;

    /// Submit a cert-manager Certificate manifest
    async fn create_certificate_request(&self, manifest: &str) -> Result<()>;
}
