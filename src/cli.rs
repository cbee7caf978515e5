//! Command-line interface
//!
//! `provision` runs the whole workflow; `export-ca` re-runs only the final
//! export against an already provisioned cluster.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::client::KubeResourceClient;
use crate::config::{
    default_export_path, WorkflowConfig, DEFAULT_NAMESPACE, DEFAULT_RESOURCES_ROOT,
};
use crate::workflow::{export_ca_certificate, ProvisioningWorkflow, WorkflowContext};
use crate::{Error, Result};

/// trust-bootstrap - provision a self-signed TLS trust chain via cert-manager
#[derive(Parser, Debug)]
#[command(name = "trust-bootstrap")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install cert-manager and the CA chain, issue a certificate and export the CA
    Provision(ProvisionArgs),

    /// Export the CA certificate from an already issued certificate secret
    ExportCa(TargetArgs),
}

/// Cluster and certificate target shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Path to kubeconfig (defaults to KUBECONFIG, ~/.kube/config, or in-cluster)
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// Domain the leaf certificate is issued for
    #[arg(long, env = "TRUST_BOOTSTRAP_DOMAIN")]
    pub domain: String,

    /// Namespace of the leaf certificate and its secret
    #[arg(long, env = "TRUST_BOOTSTRAP_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Where to write the CA certificate (defaults to ~/.trust-bootstrap/ca.crt)
    #[arg(long)]
    pub export_path: Option<PathBuf>,
}

/// Arguments for `provision`
#[derive(Args, Debug)]
pub struct ProvisionArgs {
    /// Cluster and certificate target
    #[command(flatten)]
    pub target: TargetArgs,

    /// Directory holding the static manifests
    #[arg(long, env = "TRUST_BOOTSTRAP_RESOURCES", default_value = DEFAULT_RESOURCES_ROOT)]
    pub resources: PathBuf,

    /// Image for the one-shot CA generation job (see resources/README.md for its contract)
    #[arg(long, env = "TRUST_BOOTSTRAP_CA_IMAGE")]
    pub ca_image: String,

    /// How long to wait for the CA generation job, in seconds
    #[arg(long, default_value = "300")]
    pub job_timeout_secs: u64,
}

impl TargetArgs {
    fn workflow_config(&self, resources: PathBuf) -> Result<WorkflowConfig> {
        let export_path = match &self.export_path {
            Some(path) => path.clone(),
            None => default_export_path()?,
        };
        Ok(WorkflowConfig::new(resources, self.domain.clone(), export_path)
            .with_namespace(self.namespace.clone()))
    }
}

impl Cli {
    /// Run the selected subcommand
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Provision(args) => provision(args).await,
            Commands::ExportCa(args) => export_ca(args).await,
        }
    }
}

async fn provision(args: ProvisionArgs) -> Result<()> {
    let config = args
        .target
        .workflow_config(args.resources)?
        .with_ca_image(args.ca_image);
    config.validate()?;

    let client = KubeResourceClient::connect(args.target.kubeconfig.as_deref())
        .await?
        .with_job_timeout(Duration::from_secs(args.job_timeout_secs));

    info!(domain = %config.domain, namespace = %config.namespace, "provisioning trust chain");
    let mut ctx = WorkflowContext::new();
    ProvisioningWorkflow::new(&client, &config)
        .run(&mut ctx)
        .await
}

async fn export_ca(args: TargetArgs) -> Result<()> {
    if args.domain.trim().is_empty() {
        return Err(Error::config("domain must not be empty"));
    }
    let config = args.workflow_config(PathBuf::from(DEFAULT_RESOURCES_ROOT))?;
    let client = KubeResourceClient::connect(args.kubeconfig.as_deref()).await?;
    export_ca_certificate(&client, &config).await?;
    Ok(())
}
