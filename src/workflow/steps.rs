//! The six provisioning steps
//!
//! Each step documents the context fields it reads and writes. Steps 1-3 check
//! whether their postcondition already holds and skip without mutating the
//! cluster if so.

use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::{debug, info};

use super::{StepOutcome, WorkflowContext};
use crate::client::ClusterResourceClient;
use crate::config::WorkflowConfig;
use crate::manifest::{CERTIFICATE_MANIFEST, CLUSTER_ISSUER_MANIFEST, CONTROLLER_MANIFEST};
use crate::poll::{poll_bounded, Sleeper};
use crate::transient::{TransientManifests, TransientResourceSet};
use crate::{
    Error, Result, CA_CERT_FIELD, CA_COMMON_NAME, CA_SECRET_NAME, CERTIFICATE_CRD,
    CLUSTER_ISSUER_NAME, CONTROLLER_NAMESPACE,
};

/// Step 1: detect or install cert-manager.
///
/// Writes `controller_installed`.
pub(crate) async fn detect_controller<C>(
    client: &C,
    config: &WorkflowConfig,
    ctx: &mut WorkflowContext,
) -> Result<StepOutcome>
where
    C: ClusterResourceClient + ?Sized,
{
    let installed = client.namespace_exists(CONTROLLER_NAMESPACE).await?
        && client.crd_exists(CERTIFICATE_CRD).await?;

    if installed {
        ctx.controller_installed = true;
        return Ok(StepOutcome::Skipped);
    }

    info!(namespace = CONTROLLER_NAMESPACE, "cert-manager not found, installing");
    let manifest = config.manifests().load(CONTROLLER_MANIFEST, &[])?;
    client.apply_manifest(&manifest).await?;
    ctx.controller_installed = true;
    Ok(StepOutcome::Executed)
}

/// Step 2: make sure the CA key pair secret exists, generating it once.
///
/// Reads `controller_installed`. Writes `ca_secret_present`.
pub(crate) async fn ensure_ca_secret<C>(
    client: &C,
    config: &WorkflowConfig,
    ctx: &mut WorkflowContext,
) -> Result<StepOutcome>
where
    C: ClusterResourceClient + ?Sized,
{
    if !ctx.controller_installed {
        return Err(Error::PrecursorMissing {
            precursor: "certificate controller installed".to_string(),
        });
    }

    if client
        .get_secret(CA_SECRET_NAME, CONTROLLER_NAMESPACE)
        .await?
        .is_some()
    {
        ctx.ca_secret_present = true;
        return Ok(StepOutcome::Skipped);
    }

    info!(
        secret = CA_SECRET_NAME,
        namespace = CONTROLLER_NAMESPACE,
        "CA secret not found, generating"
    );
    let set = TransientResourceSet::ca_generator(CONTROLLER_NAMESPACE);
    let manifests = TransientManifests::load(&config.manifests(), &set, CA_SECRET_NAME)?;
    let request = set.job_request(&config.ca_image, CA_SECRET_NAME, CA_COMMON_NAME);

    if !set.run_job(client, &manifests, &request).await? {
        return Err(Error::GenerationFailed {
            job: set.job,
            namespace: set.namespace,
        });
    }

    ctx.ca_secret_present = true;
    Ok(StepOutcome::Executed)
}

/// Step 3: make sure the CA-backed ClusterIssuer exists.
pub(crate) async fn ensure_issuer<C>(client: &C, config: &WorkflowConfig) -> Result<StepOutcome>
where
    C: ClusterResourceClient + ?Sized,
{
    if client.cluster_issuer_exists(CLUSTER_ISSUER_NAME).await? {
        return Ok(StepOutcome::Skipped);
    }

    let manifest = config.manifests().load(
        CLUSTER_ISSUER_MANIFEST,
        &[
            ("ISSUER_NAME", CLUSTER_ISSUER_NAME),
            ("CA_SECRET_NAME", CA_SECRET_NAME),
        ],
    )?;
    client.apply_manifest(&manifest).await?;
    info!(issuer = CLUSTER_ISSUER_NAME, "ClusterIssuer created");
    Ok(StepOutcome::Executed)
}

/// Step 4: request the leaf certificate for the configured domain.
///
/// Reads and writes `certificate_requested`. Under the linear step order the
/// flag is never already set when this runs, so the guard does not trigger.
pub(crate) async fn request_certificate<C>(
    client: &C,
    config: &WorkflowConfig,
    ctx: &mut WorkflowContext,
) -> Result<StepOutcome>
where
    C: ClusterResourceClient + ?Sized,
{
    if ctx.certificate_requested {
        return Err(Error::AlreadyRequested {
            domain: config.domain.clone(),
        });
    }

    let secret_name = config.certificate_secret_name();
    let domain = config.domain.trim().to_ascii_lowercase();
    let manifest = config.manifests().load(
        CERTIFICATE_MANIFEST,
        &[
            ("NAME", secret_name.as_str()),
            ("NAMESPACE", config.namespace.as_str()),
            ("DOMAIN", domain.as_str()),
            ("SECRET_NAME", secret_name.as_str()),
            ("ISSUER_NAME", CLUSTER_ISSUER_NAME),
        ],
    )?;
    client.create_certificate_request(&manifest).await?;
    ctx.certificate_requested = true;
    info!(%domain, secret = %secret_name, "certificate requested");
    Ok(StepOutcome::Executed)
}

/// Step 5: wait for cert-manager to write the leaf secret.
///
/// A secret without `ca.crt` fails at once; it will not fix itself.
pub(crate) async fn wait_for_issuance<C>(
    client: &C,
    config: &WorkflowConfig,
    sleeper: &dyn Sleeper,
) -> Result<StepOutcome>
where
    C: ClusterResourceClient + ?Sized,
{
    let name = config.certificate_secret_name();
    let namespace = config.namespace.as_str();
    let description = format!("secret {}/{}", namespace, name);

    debug!(
        %description,
        attempts = config.issuance_poll.max_attempts,
        max_wait = ?config.issuance_poll.max_wait(),
        "waiting for certificate issuance"
    );
    let secret = name.as_str();
    let issued = poll_bounded(&config.issuance_poll, sleeper, &description, move |attempt| {
        secret_issued(client, secret, namespace, attempt)
    })
    .await?;

    match issued {
        Some(()) => Ok(StepOutcome::Executed),
        None => Err(Error::IssuanceTimeout {
            name,
            namespace: namespace.to_string(),
            attempts: config.issuance_poll.max_attempts,
        }),
    }
}

async fn secret_issued<C>(client: &C, name: &str, namespace: &str, attempt: u32) -> Result<Option<()>>
where
    C: ClusterResourceClient + ?Sized,
{
    debug!(%name, %namespace, attempt, "looking up certificate secret");
    match client.get_secret(name, namespace).await? {
        Some(data) if data.contains_key(CA_CERT_FIELD) => Ok(Some(())),
        Some(_) => Err(Error::MalformedSecret {
            name: name.to_string(),
            namespace: namespace.to_string(),
            field: CA_CERT_FIELD.to_string(),
        }),
        None => Ok(None),
    }
}

/// Step 6: write the CA certificate from the leaf secret to the export path.
///
/// Independent of earlier steps; this is what `export-ca` runs on its own.
/// Overwrites any existing file and returns the path written.
pub async fn export_ca_certificate<C>(client: &C, config: &WorkflowConfig) -> Result<PathBuf>
where
    C: ClusterResourceClient + ?Sized,
{
    let name = config.certificate_secret_name();
    let namespace = config.namespace.as_str();

    let data = client
        .get_secret(&name, namespace)
        .await?
        .ok_or_else(|| Error::secret_unavailable(&name, namespace, "secret not found"))?;
    let encoded = data.get(CA_CERT_FIELD).ok_or_else(|| {
        Error::secret_unavailable(&name, namespace, format!("no '{}' field", CA_CERT_FIELD))
    })?;
    let pem = STANDARD.decode(encoded.trim()).map_err(|e| {
        Error::secret_unavailable(
            &name,
            namespace,
            format!("'{}' is not valid base64: {}", CA_CERT_FIELD, e),
        )
    })?;

    let path = config.export_path().to_path_buf();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(&path, pem)?;

    info!(path = %path.display(), "CA certificate exported");
    info!(
        "Import {} into your browser or OS trust store to trust certificates for {}",
        path.display(),
        config.domain
    );
    Ok(path)
}
