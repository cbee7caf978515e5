//! Transient resources for the one-shot CA generation job
//!
//! The job needs a ServiceAccount with permission to write a single secret.
//! That account, its Role and RoleBinding, and the Job itself exist only for
//! the duration of the generation run. They are created in a fixed order and
//! always torn down afterward, whatever happened in between.

use tracing::{debug, info, warn};

use crate::client::{ClusterResourceClient, CreateOutcome, JobRequest};
use crate::manifest::{
    Manifests, CA_ROLE_BINDING_MANIFEST, CA_ROLE_MANIFEST, CA_SERVICE_ACCOUNT_MANIFEST,
};
use crate::Result;

/// Name shared by every transient object of the CA generator
pub const CA_GENERATOR_NAME: &str = "ca-generator";

/// Names of the objects created for one CA generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientResourceSet {
    /// Namespace all four objects live in
    pub namespace: String,
    /// ServiceAccount name
    pub service_account: String,
    /// Role name
    pub role: String,
    /// RoleBinding name
    pub role_binding: String,
    /// Job name
    pub job: String,
}

/// Rendered ServiceAccount, Role and RoleBinding manifests
#[derive(Debug, Clone)]
pub struct TransientManifests {
    /// ServiceAccount manifest
    pub service_account: String,
    /// Role manifest
    pub role: String,
    /// RoleBinding manifest
    pub role_binding: String,
}

impl TransientManifests {
    /// Render the three RBAC templates for `set`.
    ///
    /// Templates see `NAME`, `NAMESPACE`, `SERVICE_ACCOUNT`, `ROLE` and
    /// `SECRET_NAME` (the only secret the role may write).
    pub fn load(manifests: &Manifests, set: &TransientResourceSet, secret_name: &str) -> Result<Self> {
        let vars = [
            ("NAME", set.job.as_str()),
            ("NAMESPACE", set.namespace.as_str()),
            ("SERVICE_ACCOUNT", set.service_account.as_str()),
            ("ROLE", set.role.as_str()),
            ("ROLE_BINDING", set.role_binding.as_str()),
            ("SECRET_NAME", secret_name),
        ];
        Ok(Self {
            service_account: manifests.load(CA_SERVICE_ACCOUNT_MANIFEST, &vars)?,
            role: manifests.load(CA_ROLE_MANIFEST, &vars)?,
            role_binding: manifests.load(CA_ROLE_BINDING_MANIFEST, &vars)?,
        })
    }
}

impl TransientResourceSet {
    /// The CA generator set in `namespace`
    pub fn ca_generator(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            service_account: CA_GENERATOR_NAME.to_string(),
            role: CA_GENERATOR_NAME.to_string(),
            role_binding: CA_GENERATOR_NAME.to_string(),
            job: CA_GENERATOR_NAME.to_string(),
        }
    }

    /// Job request that runs `image` as this set's service account
    pub fn job_request(&self, image: &str, secret_name: &str, common_name: &str) -> JobRequest {
        JobRequest {
            name: self.job.clone(),
            namespace: self.namespace.clone(),
            image: image.to_string(),
            service_account: self.service_account.clone(),
            secret_name: secret_name.to_string(),
            common_name: common_name.to_string(),
        }
    }

    /// Run `request` to completion inside this set.
    ///
    /// Creates SA, Role, RoleBinding and Job in that order, then blocks on the
    /// job. Returns whether the job succeeded. Teardown runs on every path,
    /// including when a creation fails part way; the first such error is
    /// returned after teardown.
    pub async fn run_job<C>(
        &self,
        client: &C,
        manifests: &TransientManifests,
        request: &JobRequest,
    ) -> Result<bool>
    where
        C: ClusterResourceClient + ?Sized,
    {
        let result = self.create_and_wait(client, manifests, request).await;
        self.teardown(client).await;
        result
    }

    async fn create_and_wait<C>(
        &self,
        client: &C,
        manifests: &TransientManifests,
        request: &JobRequest,
    ) -> Result<bool>
    where
        C: ClusterResourceClient + ?Sized,
    {
        let ns = &self.namespace;

        let outcome = client
            .create_service_account(&manifests.service_account, ns)
            .await?;
        log_created("ServiceAccount", &self.service_account, ns, outcome);

        let outcome = client.create_role(&manifests.role, ns).await?;
        log_created("Role", &self.role, ns, outcome);

        let outcome = client
            .create_role_binding(&manifests.role_binding, ns)
            .await?;
        log_created("RoleBinding", &self.role_binding, ns, outcome);

        let outcome = client.create_job(request).await?;
        log_created("Job", &self.job, ns, outcome);

        info!(job = %self.job, namespace = %ns, "waiting for CA generation job");
        client.wait_job(&self.job, ns).await
    }

    /// Delete all four objects in creation order.
    ///
    /// Each delete is attempted regardless of the others; failures are logged
    /// and dropped.
    pub async fn teardown<C>(&self, client: &C)
    where
        C: ClusterResourceClient + ?Sized,
    {
        let ns = &self.namespace;

        let results = [
            (
                "ServiceAccount",
                &self.service_account,
                client.delete_service_account(&self.service_account, ns).await,
            ),
            ("Role", &self.role, client.delete_role(&self.role, ns).await),
            (
                "RoleBinding",
                &self.role_binding,
                client.delete_role_binding(&self.role_binding, ns).await,
            ),
            ("Job", &self.job, client.delete_job(&self.job, ns).await),
        ];

        for (kind, name, result) in results {
            match result {
                Ok(()) => debug!(%kind, %name, namespace = %ns, "deleted transient resource"),
                Err(e) => {
                    warn!(%kind, %name, namespace = %ns, error = %e, "failed to delete transient resource")
                }
            }
        }
    }
}

fn log_created(kind: &str, name: &str, namespace: &str, outcome: CreateOutcome) {
    match outcome {
        CreateOutcome::Created => debug!(%kind, %name, %namespace, "created transient resource"),
        CreateOutcome::AlreadyExists => {
            info!(%kind, %name, %namespace, "transient resource left from a previous run, reusing")
        }
    }
}
