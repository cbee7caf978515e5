//! Workflow integration tests against an in-memory cluster
//!
//! The fake cluster interprets the shipped manifests under `resources/`, so
//! these tests also catch template regressions.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use trust_bootstrap::client::{ClusterResourceClient, CreateOutcome, JobRequest, SecretData};
use trust_bootstrap::config::WorkflowConfig;
use trust_bootstrap::manifest::{parse_manifest, split_documents, CONTROLLER_MANIFEST};
use trust_bootstrap::poll::{PollPolicy, Sleeper};
use trust_bootstrap::workflow::{
    export_ca_certificate, ProvisioningWorkflow, StepName, StepOutcome, WorkflowContext,
};
use trust_bootstrap::{
    Error, Result, CA_SECRET_NAME, CERTIFICATE_CRD, CLUSTER_ISSUER_NAME, CONTROLLER_NAMESPACE,
};

const DOMAIN: &str = "app.example.com";
const LEAF_SECRET: &str = "app-example-com-tls";
/// base64 of "-----BEGIN CERTIFICATE-----"
const CA_PEM_B64: &str = "LS0tLS1CRUdJTiBDRVJUSUZJQ0FURS0tLS0t";

// =============================================================================
// In-memory cluster
// =============================================================================

#[derive(Default)]
struct State {
    namespaces: BTreeSet<String>,
    crds: BTreeSet<String>,
    issuers: BTreeSet<String>,
    secrets: BTreeMap<(String, String), SecretData>,
    /// (kind, namespace/name) of live namespaced objects
    objects: BTreeSet<(String, String)>,
    /// Pending leaf certificates: secret key -> lookups remaining before issue
    pending: BTreeMap<(String, String), u32>,
    calls: Vec<String>,
}

struct FakeCluster {
    state: Mutex<State>,
    job_succeeds: bool,
    issue_after_lookups: Option<u32>,
    fail_deletes: bool,
}

impl FakeCluster {
    fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            job_succeeds: true,
            issue_after_lookups: Some(1),
            fail_deletes: false,
        }
    }

    fn with(&self, f: impl FnOnce(&mut State)) {
        f(&mut self.state.lock().unwrap());
    }

    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| {
                c.starts_with("apply")
                    || c.starts_with("create")
                    || c.starts_with("delete")
            })
            .collect()
    }

    fn live_objects(&self) -> BTreeSet<(String, String)> {
        self.state.lock().unwrap().objects.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn create_object(&self, kind: &str, manifest: &str, namespace: &str) -> Result<CreateOutcome> {
        let parsed = parse_manifest(manifest)?;
        assert_eq!(parsed.kind, kind, "template kind mismatch");
        self.record(format!("create {}/{}", kind, parsed.name));
        let inserted = self
            .state
            .lock()
            .unwrap()
            .objects
            .insert((kind.to_string(), format!("{}/{}", namespace, parsed.name)));
        Ok(if inserted {
            CreateOutcome::Created
        } else {
            CreateOutcome::AlreadyExists
        })
    }

    fn delete_object(&self, kind: &str, name: &str, namespace: &str) -> Result<()> {
        self.record(format!("delete {}/{}", kind, name));
        if self.fail_deletes {
            return Err(Error::client("delete", "connection reset"));
        }
        self.state
            .lock()
            .unwrap()
            .objects
            .remove(&(kind.to_string(), format!("{}/{}", namespace, name)));
        Ok(())
    }
}

#[async_trait]
impl ClusterResourceClient for FakeCluster {
    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().namespaces.contains(name))
    }

    async fn crd_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().crds.contains(name))
    }

    async fn apply_manifest(&self, manifest: &str) -> Result<()> {
        for doc in split_documents(manifest) {
            let parsed = parse_manifest(doc)?;
            self.record(format!("apply {}/{}", parsed.kind, parsed.name));
            let mut state = self.state.lock().unwrap();
            match parsed.kind.as_str() {
                "Namespace" => {
                    state.namespaces.insert(parsed.name);
                }
                "CustomResourceDefinition" => {
                    state.crds.insert(parsed.name);
                }
                "ClusterIssuer" => {
                    state.issuers.insert(parsed.name);
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<SecretData>> {
        let key = (name.to_string(), namespace.to_string());
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("get secret/{}", name));

        if let Some(remaining) = state.pending.get_mut(&key) {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                state.pending.remove(&key);
                let data = SecretData::from([
                    ("ca.crt".to_string(), CA_PEM_B64.to_string()),
                    ("tls.crt".to_string(), "bGVhZg==".to_string()),
                    ("tls.key".to_string(), "a2V5".to_string()),
                ]);
                state.secrets.insert(key.clone(), data);
            }
        }
        Ok(state.secrets.get(&key).cloned())
    }

    async fn create_service_account(&self, manifest: &str, namespace: &str) -> Result<CreateOutcome> {
        self.create_object("ServiceAccount", manifest, namespace)
    }

    async fn create_role(&self, manifest: &str, namespace: &str) -> Result<CreateOutcome> {
        self.create_object("Role", manifest, namespace)
    }

    async fn create_role_binding(&self, manifest: &str, namespace: &str) -> Result<CreateOutcome> {
        self.create_object("RoleBinding", manifest, namespace)
    }

    async fn create_job(&self, request: &JobRequest) -> Result<CreateOutcome> {
        self.record(format!("create Job/{}", request.name));
        let inserted = self.state.lock().unwrap().objects.insert((
            "Job".to_string(),
            format!("{}/{}", request.namespace, request.name),
        ));
        Ok(if inserted {
            CreateOutcome::Created
        } else {
            CreateOutcome::AlreadyExists
        })
    }

    async fn wait_job(&self, name: &str, namespace: &str) -> Result<bool> {
        self.record(format!("wait Job/{}", name));
        if self.job_succeeds {
            self.state.lock().unwrap().secrets.insert(
                (CA_SECRET_NAME.to_string(), namespace.to_string()),
                SecretData::from([("tls.crt".to_string(), "Y2E=".to_string())]),
            );
        }
        Ok(self.job_succeeds)
    }

    async fn delete_service_account(&self, name: &str, namespace: &str) -> Result<()> {
        self.delete_object("ServiceAccount", name, namespace)
    }

    async fn delete_role(&self, name: &str, namespace: &str) -> Result<()> {
        self.delete_object("Role", name, namespace)
    }

    async fn delete_role_binding(&self, name: &str, namespace: &str) -> Result<()> {
        self.delete_object("RoleBinding", name, namespace)
    }

    async fn delete_job(&self, name: &str, namespace: &str) -> Result<()> {
        self.delete_object("Job", name, namespace)
    }

    async fn cluster_issuer_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().issuers.contains(name))
    }

    async fn create_certificate_request(&self, manifest: &str) -> Result<()> {
        let parsed = parse_manifest(manifest)?;
        assert_eq!(parsed.kind, "Certificate");
        assert_eq!(parsed.value["spec"]["dnsNames"][0], DOMAIN);
        assert_eq!(parsed.value["spec"]["issuerRef"]["name"], CLUSTER_ISSUER_NAME);
        self.record(format!("create Certificate/{}", parsed.name));

        let secret = parsed.value["spec"]["secretName"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let namespace = parsed.namespace.unwrap_or_default();
        if let Some(lookups) = self.issue_after_lookups {
            self.state
                .lock()
                .unwrap()
                .pending
                .insert((secret, namespace), lookups);
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn shipped_resources() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("resources")
}

/// Copy the shipped templates and add a minimal controller manifest
fn resources_root(dir: &Path) -> PathBuf {
    let root = dir.join("resources");
    std::fs::create_dir_all(root.join("ca-generator")).unwrap();
    for file in [
        "ca-generator/service-account.yaml",
        "ca-generator/role.yaml",
        "ca-generator/role-binding.yaml",
        "cluster-issuer.yaml",
        "certificate.yaml",
    ] {
        std::fs::copy(shipped_resources().join(file), root.join(file)).unwrap();
    }
    std::fs::write(
        root.join(CONTROLLER_MANIFEST),
        format!(
            "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: {}\n---\n\
             apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\nmetadata:\n  name: {}\n",
            CONTROLLER_NAMESPACE, CERTIFICATE_CRD
        ),
    )
    .unwrap();
    root
}

fn config(dir: &Path) -> WorkflowConfig {
    WorkflowConfig::new(resources_root(dir), DOMAIN, dir.join("home").join("ca.crt"))
        .with_ca_image("registry.local/ca-generator:1")
}

async fn run(cluster: &FakeCluster, config: &WorkflowConfig, sleeper: &RecordingSleeper) -> (Result<()>, WorkflowContext) {
    let mut ctx = WorkflowContext::new();
    let result = ProvisioningWorkflow::new(cluster, config)
        .with_sleeper(sleeper)
        .run(&mut ctx)
        .await;
    (result, ctx)
}

// =============================================================================
// Story: Provisioning a fresh cluster
// =============================================================================

#[tokio::test]
async fn story_fresh_cluster_is_fully_provisioned() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let cluster = FakeCluster::new();
    let sleeper = RecordingSleeper::default();

    let (result, ctx) = run(&cluster, &config, &sleeper).await;
    result.unwrap();

    assert!(ctx.controller_installed);
    assert!(ctx.ca_secret_present);
    assert!(ctx.certificate_requested);
    assert!(ctx
        .history()
        .iter()
        .all(|(_, outcome)| *outcome == StepOutcome::Executed));

    // transient objects were created in order, then all removed in order
    let lifecycle: Vec<_> = cluster
        .calls()
        .into_iter()
        .filter(|c| c.contains("ca-generator"))
        .collect();
    assert_eq!(
        lifecycle,
        vec![
            "create ServiceAccount/ca-generator",
            "create Role/ca-generator",
            "create RoleBinding/ca-generator",
            "create Job/ca-generator",
            "wait Job/ca-generator",
            "delete ServiceAccount/ca-generator",
            "delete Role/ca-generator",
            "delete RoleBinding/ca-generator",
            "delete Job/ca-generator",
        ]
    );
    assert!(cluster.live_objects().is_empty());

    assert!(cluster
        .calls()
        .contains(&format!("create Certificate/{}", LEAF_SECRET)));
    assert_eq!(
        std::fs::read_to_string(config.export_path()).unwrap(),
        "-----BEGIN CERTIFICATE-----"
    );
    assert!(sleeper.sleeps.lock().unwrap().is_empty());
}

#[tokio::test]
async fn story_second_run_skips_what_exists() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let cluster = FakeCluster::new();
    let sleeper = RecordingSleeper::default();
    run(&cluster, &config, &sleeper).await.0.unwrap();
    let first_run_calls = cluster.calls().len();

    let (result, ctx) = run(&cluster, &config, &sleeper).await;
    result.unwrap();

    for step in &StepName::ALL[..3] {
        assert_eq!(ctx.outcome(*step), Some(StepOutcome::Skipped));
    }
    // only the certificate request mutates on a re-run
    let second_run: Vec<_> = cluster.calls()[first_run_calls..]
        .iter()
        .filter(|c| c.starts_with("apply") || c.starts_with("create") || c.starts_with("delete"))
        .cloned()
        .collect();
    assert_eq!(second_run, vec![format!("create Certificate/{}", LEAF_SECRET)]);
}

// =============================================================================
// Story: Things go wrong
// =============================================================================

#[tokio::test]
async fn story_failed_generation_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let mut cluster = FakeCluster::new();
    cluster.job_succeeds = false;
    let sleeper = RecordingSleeper::default();

    let (result, ctx) = run(&cluster, &config, &sleeper).await;
    let err = result.unwrap_err();

    assert_eq!(err.step(), Some(StepName::EnsureCaSecret.title()));
    assert!(matches!(err.root(), Error::GenerationFailed { .. }));
    assert!(err.to_string().contains("cert-manager/ca-generator"));
    assert!(cluster.live_objects().is_empty());
    assert!(!ctx.ca_secret_present);
    assert!(!cluster
        .mutating_calls()
        .iter()
        .any(|c| c.contains("ClusterIssuer")));
    assert!(!config.export_path().exists());
}

#[tokio::test]
async fn story_delete_failures_do_not_mask_success() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let mut cluster = FakeCluster::new();
    cluster.fail_deletes = true;
    let sleeper = RecordingSleeper::default();

    let (result, _) = run(&cluster, &config, &sleeper).await;
    result.unwrap();

    let deletes = cluster
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("delete"))
        .count();
    assert_eq!(deletes, 4);
}

#[tokio::test]
async fn story_leftovers_from_an_interrupted_run_are_reused() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let cluster = FakeCluster::new();
    cluster.with(|state| {
        let key = format!("{}/ca-generator", CONTROLLER_NAMESPACE);
        state.objects.insert(("ServiceAccount".to_string(), key.clone()));
        state.objects.insert(("Role".to_string(), key));
    });
    let sleeper = RecordingSleeper::default();

    let (result, _) = run(&cluster, &config, &sleeper).await;
    result.unwrap();
    assert!(cluster.live_objects().is_empty());
}

#[tokio::test]
async fn story_certificate_never_issued_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let mut cluster = FakeCluster::new();
    cluster.issue_after_lookups = None;
    let sleeper = RecordingSleeper::default();

    let (result, ctx) = run(&cluster, &config, &sleeper).await;
    let err = result.unwrap_err();

    assert_eq!(err.step(), Some("Wait for issuance"));
    assert!(matches!(
        err.root(),
        Error::IssuanceTimeout { attempts: 5, .. }
    ));
    let lookups = cluster
        .calls()
        .into_iter()
        .filter(|c| *c == format!("get secret/{}", LEAF_SECRET))
        .count();
    assert_eq!(lookups, 5);
    assert_eq!(
        *sleeper.sleeps.lock().unwrap(),
        vec![Duration::from_secs(3); 4]
    );
    assert!(ctx.certificate_requested);
}

#[tokio::test]
async fn story_slow_issuance_is_waited_out() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path()).with_issuance_poll(PollPolicy::new(5, Duration::from_millis(1)));
    let mut cluster = FakeCluster::new();
    cluster.issue_after_lookups = Some(3);
    let sleeper = RecordingSleeper::default();

    let (result, _) = run(&cluster, &config, &sleeper).await;
    result.unwrap();
    assert_eq!(sleeper.sleeps.lock().unwrap().len(), 2);
}

// =============================================================================
// Story: Exporting on its own
// =============================================================================

#[tokio::test]
async fn story_export_alone_reads_the_issued_secret() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let cluster = FakeCluster::new();
    cluster.with(|state| {
        state.secrets.insert(
            (LEAF_SECRET.to_string(), "default".to_string()),
            SecretData::from([("ca.crt".to_string(), "YWJj".to_string())]),
        );
    });

    let path = export_ca_certificate(&cluster, &config).await.unwrap();
    assert_eq!(std::fs::read_to_string(path).unwrap(), "abc");
    assert!(cluster.mutating_calls().is_empty());
}

#[tokio::test]
async fn story_export_before_issuance_is_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let cluster = FakeCluster::new();

    let err = export_ca_certificate(&cluster, &config).await.unwrap_err();
    assert!(matches!(err, Error::SecretUnavailable { .. }));
}
