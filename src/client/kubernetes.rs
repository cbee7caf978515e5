//! kube-rs implementation of [`ClusterResourceClient`]
//!
//! Uses server-side apply for manifests, typed APIs for the transient RBAC
//! objects, and polls Job conditions for [`ClusterResourceClient::wait_job`].

use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Namespace, Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::job::{build_ca_job, is_job_complete, is_job_failed, job_failure_message};
use super::{ClusterResourceClient, CreateOutcome, JobRequest, SecretData};
use crate::manifest::{kind_priority, parse_manifest, split_documents, ParsedManifest};
use crate::poll::{poll_bounded, PollPolicy, TokioSleeper};
use crate::retry::{retry_with_backoff_if, RetryConfig};
use crate::{Error, Result, FIELD_MANAGER};

/// cert-manager ClusterIssuer apiVersion
const CLUSTER_ISSUER_API_VERSION: &str = "cert-manager.io/v1";

/// Default connection timeout for the kube client
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for the kube client
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Default upper bound on waiting for the CA generation job
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);
/// Interval between job status checks
pub const JOB_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Create a kube client from an optional kubeconfig path.
///
/// Without a path the configuration is inferred (`KUBECONFIG`, `~/.kube/config`,
/// or in-cluster).
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::client(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::client("create_client", format!("failed to load kubeconfig: {}", e))
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::client("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);

    Client::try_from(config)
        .map_err(|e| Error::client("create_client", format!("failed to create client: {}", e)))
}

/// Parse apiVersion into (group, version)
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Lowercase plural resource name for a kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if let Some(stem) = lower.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'o', 'u']) {
            return format!("{}ies", stem);
        }
    }
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with('x') {
        return format!("{}es", lower);
    }
    format!("{}s", lower)
}

/// Build an ApiResource from a known apiVersion and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Whether an apply failure is worth retrying.
///
/// Covers the window after installing cert-manager: CRDs not yet served (404),
/// webhook not reachable (5xx), throttling (429), and connection errors.
/// Auth, config, serialization and request-building errors are permanent.
fn is_transient(err: &Error) -> bool {
    match err {
        Error::Kube {
            source: kube::Error::Api(resp),
        } => resp.code == 404 || resp.code == 429 || resp.code >= 500,
        Error::Kube {
            source: kube::Error::HyperError(_) | kube::Error::Service(_),
        } => true,
        _ => false,
    }
}

/// Production [`ClusterResourceClient`] backed by kube-rs
#[derive(Clone)]
pub struct KubeResourceClient {
    client: Client,
    job_timeout: Duration,
    job_poll_interval: Duration,
}

impl KubeResourceClient {
    /// Wrap an existing client with the default job timeout
    pub fn new(client: Client) -> Self {
        Self {
            client,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            job_poll_interval: JOB_POLL_INTERVAL,
        }
    }

    /// Connect using an optional kubeconfig path
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        Ok(Self::new(create_client(kubeconfig).await?))
    }

    /// Override how long [`ClusterResourceClient::wait_job`] waits
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    async fn apply_document(&self, doc: &ParsedManifest) -> Result<()> {
        let ar = build_api_resource(&doc.api_version, &doc.kind);
        let api: Api<DynamicObject> = match &doc.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        };
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&doc.name, &params, &Patch::Apply(&doc.value))
            .await?;
        debug!(kind = %doc.kind, name = %doc.name, namespace = ?doc.namespace, "applied manifest");
        Ok(())
    }

    async fn cluster_object_exists<K>(&self, name: &str) -> Result<bool>
    where
        K: Resource<Scope = ClusterResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn create_namespaced<K>(
        &self,
        operation: &str,
        manifest: &str,
        namespace: &str,
    ) -> Result<CreateOutcome>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let mut obj: K = serde_yaml::from_str(manifest)
            .map_err(|e| Error::client(operation, format!("invalid manifest: {}", e)))?;
        obj.meta_mut().namespace = Some(namespace.to_string());
        let name = obj.meta().name.clone().unwrap_or_default();

        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let outcome = create_outcome(api.create(&PostParams::default(), &obj).await)
            .map_err(|e| {
                Error::client(
                    operation,
                    format!("failed to create {}/{}: {}", namespace, name, e),
                )
            })?;
        debug!(%namespace, %name, %outcome, "{}", operation);
        Ok(outcome)
    }

    async fn delete_namespaced<K>(&self, operation: &str, name: &str, namespace: &str) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => {
                debug!(%namespace, %name, "{}", operation);
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(Error::client(
                operation,
                format!("failed to delete {}/{}: {}", namespace, name, e),
            )),
        }
    }
}

/// Map a create response, treating a 409 conflict as an existing object
fn create_outcome<T>(
    result: std::result::Result<T, kube::Error>,
) -> std::result::Result<CreateOutcome, kube::Error> {
    match result {
        Ok(_) => Ok(CreateOutcome::Created),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(CreateOutcome::AlreadyExists),
        Err(e) => Err(e),
    }
}

/// One look at the job: `Some(success)` once finished, `None` while running
async fn job_state(api: &Api<Job>, name: &str) -> Result<Option<bool>> {
    let Some(job) = api.get_opt(name).await? else {
        return Err(Error::client(
            "wait_job",
            format!("job {} disappeared while waiting", name),
        ));
    };

    if is_job_complete(&job) {
        return Ok(Some(true));
    }
    if is_job_failed(&job) {
        let message = job_failure_message(&job).unwrap_or_else(|| "unknown".to_string());
        warn!(job = %name, %message, "CA generation job failed");
        return Ok(Some(false));
    }
    Ok(None)
}

#[async_trait]
impl ClusterResourceClient for KubeResourceClient {
    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        self.cluster_object_exists::<Namespace>(name).await
    }

    async fn crd_exists(&self, name: &str) -> Result<bool> {
        self.cluster_object_exists::<CustomResourceDefinition>(name)
            .await
    }

    async fn apply_manifest(&self, manifest: &str) -> Result<()> {
        let mut docs = split_documents(manifest)
            .into_iter()
            .map(parse_manifest)
            .collect::<Result<Vec<_>>>()?;
        docs.sort_by_key(|doc| kind_priority(&doc.kind));

        let retry = RetryConfig::for_apply();
        for doc in &docs {
            let description = format!("apply {}/{}", doc.kind, doc.name);
            retry_with_backoff_if(&retry, &description, || self.apply_document(doc), is_transient)
                .await?;
        }

        info!(documents = docs.len(), "manifest applied");
        Ok(())
    }

    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<SecretData>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = api.get_opt(name).await? else {
            return Ok(None);
        };

        let data = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, STANDARD.encode(value.0)))
            .collect();
        Ok(Some(data))
    }

    async fn create_service_account(
        &self,
        manifest: &str,
        namespace: &str,
    ) -> Result<CreateOutcome> {
        self.create_namespaced::<ServiceAccount>("create_service_account", manifest, namespace)
            .await
    }

    async fn create_role(&self, manifest: &str, namespace: &str) -> Result<CreateOutcome> {
        self.create_namespaced::<Role>("create_role", manifest, namespace)
            .await
    }

    async fn create_role_binding(
        &self,
        manifest: &str,
        namespace: &str,
    ) -> Result<CreateOutcome> {
        self.create_namespaced::<RoleBinding>("create_role_binding", manifest, namespace)
            .await
    }

    async fn create_job(&self, request: &JobRequest) -> Result<CreateOutcome> {
        let job = build_ca_job(request);
        let api: Api<Job> = Api::namespaced(self.client.clone(), &request.namespace);
        let outcome = create_outcome(api.create(&PostParams::default(), &job).await)
            .map_err(|e| {
                Error::client(
                    "create_job",
                    format!(
                        "failed to create job {}/{}: {}",
                        request.namespace, request.name, e
                    ),
                )
            })?;
        info!(job = %request.name, namespace = %request.namespace, %outcome, "CA generation job submitted");
        Ok(outcome)
    }

    async fn wait_job(&self, name: &str, namespace: &str) -> Result<bool> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let policy = PollPolicy::for_timeout(self.job_timeout, self.job_poll_interval);
        let description = format!("job {}/{}", namespace, name);

        let jobs = &api;
        match poll_bounded(&policy, &TokioSleeper, &description, move |_| job_state(jobs, name))
            .await?
        {
            Some(succeeded) => Ok(succeeded),
            None => {
                warn!(job = %name, %namespace, timeout = ?self.job_timeout, "timed out waiting for job");
                Ok(false)
            }
        }
    }

    async fn delete_service_account(&self, name: &str, namespace: &str) -> Result<()> {
        self.delete_namespaced::<ServiceAccount>("delete_service_account", name, namespace)
            .await
    }

    async fn delete_role(&self, name: &str, namespace: &str) -> Result<()> {
        self.delete_namespaced::<Role>("delete_role", name, namespace)
            .await
    }

    async fn delete_role_binding(&self, name: &str, namespace: &str) -> Result<()> {
        self.delete_namespaced::<RoleBinding>("delete_role_binding", name, namespace)
            .await
    }

    async fn delete_job(&self, name: &str, namespace: &str) -> Result<()> {
        self.delete_namespaced::<Job>("delete_job", name, namespace)
            .await
    }

    async fn cluster_issuer_exists(&self, name: &str) -> Result<bool> {
        let ar = build_api_resource(CLUSTER_ISSUER_API_VERSION, "ClusterIssuer");
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn create_certificate_request(&self, manifest: &str) -> Result<()> {
        self.apply_manifest(manifest).await
    }
}
