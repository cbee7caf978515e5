//! Provisioning workflow engine
//!
//! Drives a [`WorkflowContext`] through six ordered steps:
//!
//! 1. Detect controller: install cert-manager unless already present
//! 2. Ensure CA secret: generate the root CA once via a transient job
//! 3. Ensure issuer: register the CA-backed ClusterIssuer
//! 4. Request certificate: submit the leaf Certificate for the domain
//! 5. Wait for issuance: bounded linear poll for the leaf secret
//! 6. Export CA certificate: write `ca.crt` to the local export path
//!
//! Each step depends on the previous one having completed, so the chain is
//! strictly linear and the first failure ends the run. Errors leaving
//! [`ProvisioningWorkflow::run`] carry the title of the failing step.

mod context;
mod steps;

use std::fmt;

use tracing::info;

pub use context::WorkflowContext;
pub use steps::export_ca_certificate;

use crate::client::ClusterResourceClient;
use crate::config::WorkflowConfig;
use crate::poll::{Sleeper, TokioSleeper};
use crate::Result;

/// One of the six provisioning steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepName {
    /// Detect or install the certificate controller
    DetectController,
    /// Generate the CA key pair secret if missing
    EnsureCaSecret,
    /// Create the CA-backed cluster issuer if missing
    EnsureIssuer,
    /// Request the leaf certificate
    RequestCertificate,
    /// Wait for the leaf secret to be issued
    WaitForIssuance,
    /// Export the CA certificate to the local filesystem
    ExportCaCertificate,
}

impl StepName {
    /// Every step, in execution order
    pub const ALL: [StepName; 6] = [
        StepName::DetectController,
        StepName::EnsureCaSecret,
        StepName::EnsureIssuer,
        StepName::RequestCertificate,
        StepName::WaitForIssuance,
        StepName::ExportCaCertificate,
    ];

    /// Human-readable title used in logs and errors
    pub fn title(self) -> &'static str {
        match self {
            StepName::DetectController => "Detect controller",
            StepName::EnsureCaSecret => "Ensure CA secret",
            StepName::EnsureIssuer => "Ensure issuer",
            StepName::RequestCertificate => "Request certificate",
            StepName::WaitForIssuance => "Wait for issuance",
            StepName::ExportCaCertificate => "Export CA certificate",
        }
    }

    /// 1-based position in [`StepName::ALL`]
    pub fn number(self) -> usize {
        StepName::ALL
            .iter()
            .position(|s| *s == self)
            .map_or(0, |i| i + 1)
    }

    /// Whether the step checks for an already-satisfied postcondition
    pub fn has_skip_check(self) -> bool {
        matches!(
            self,
            StepName::DetectController | StepName::EnsureCaSecret | StepName::EnsureIssuer
        )
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

/// How a step finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The postcondition already held; nothing was changed
    Skipped,
    /// The step did its work
    Executed,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Skipped => f.write_str("already satisfied"),
            StepOutcome::Executed => f.write_str("done"),
        }
    }
}

/// The ordered step list bound to a cluster client and configuration
pub struct ProvisioningWorkflow<'a, C: ClusterResourceClient + ?Sized> {
    client: &'a C,
    config: &'a WorkflowConfig,
    sleeper: &'a dyn Sleeper,
}

impl<'a, C: ClusterResourceClient + ?Sized> ProvisioningWorkflow<'a, C> {
    /// Create a workflow that sleeps on the tokio timer
    pub fn new(client: &'a C, config: &'a WorkflowConfig) -> Self {
        Self {
            client,
            config,
            sleeper: &TokioSleeper,
        }
    }

    /// Replace the sleeper used between issuance lookups
    pub fn with_sleeper(mut self, sleeper: &'a dyn Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Run every step in order, stopping at the first failure.
    ///
    /// `ctx` should be fresh; it records each step's outcome as it finishes.
    pub async fn run(&self, ctx: &mut WorkflowContext) -> Result<()> {
        let total = StepName::ALL.len();
        for step in StepName::ALL {
            info!(
                step = %step,
                skippable = step.has_skip_check(),
                "[Step {}/{}] {}...",
                step.number(),
                total,
                step
            );
            let outcome = self
                .run_step(step, ctx)
                .await
                .map_err(|e| e.in_step(step.title()))?;
            info!(step = %step, outcome = %outcome, "[Step {}/{}] {}", step.number(), total, outcome);
            ctx.record(step, outcome);
        }
        info!(
            domain = %self.config.domain,
            executed = ctx.executed_count(),
            skipped = total.saturating_sub(ctx.executed_count()),
            "provisioning complete"
        );
        Ok(())
    }

    /// Run a single step against `ctx` without recording it.
    pub async fn run_step(&self, step: StepName, ctx: &mut WorkflowContext) -> Result<StepOutcome> {
        match step {
            StepName::DetectController => {
                steps::detect_controller(self.client, self.config, ctx).await
            }
            StepName::EnsureCaSecret => {
                steps::ensure_ca_secret(self.client, self.config, ctx).await
            }
            StepName::EnsureIssuer => steps::ensure_issuer(self.client, self.config).await,
            StepName::RequestCertificate => {
                steps::request_certificate(self.client, self.config, ctx).await
            }
            StepName::WaitForIssuance => {
                steps::wait_for_issuance(self.client, self.config, self.sleeper).await
            }
            StepName::ExportCaCertificate => {
                steps::export_ca_certificate(self.client, self.config)
                    .await
                    .map(|_| StepOutcome::Executed)
            }
        }
    }
}
