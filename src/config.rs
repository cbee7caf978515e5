//! Workflow configuration
//!
//! Everything a run needs to know that is not discovered from the cluster:
//! where the static manifests live, which namespace and domain the leaf
//! certificate is for, the CA generator image, and where the exported CA
//! certificate is written (`~/.trust-bootstrap/ca.crt` unless overridden).
//!
//! There is no default CA generator image; the caller must name one that
//! follows the contract described in `resources/README.md`.

use std::path::{Path, PathBuf};

use crate::manifest::Manifests;
use crate::poll::PollPolicy;
use crate::{Error, Result};

const CONFIG_DIR_NAME: &str = ".trust-bootstrap";
const EXPORT_FILE_NAME: &str = "ca.crt";

/// Default resources root, relative to the working directory
pub const DEFAULT_RESOURCES_ROOT: &str = "resources";
/// Default namespace for the leaf certificate
pub const DEFAULT_NAMESPACE: &str = "default";

/// Longest name the API server accepts for a Secret or Certificate
const MAX_OBJECT_NAME_LEN: usize = 253;

/// Returns `~/.trust-bootstrap/ca.crt`.
pub fn default_export_path() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| Error::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME).join(EXPORT_FILE_NAME))
}

/// Name of the secret cert-manager writes the leaf certificate to.
///
/// `App.Example.com` becomes `app-example-com-tls`.
pub fn certificate_secret_name(domain: &str) -> String {
    format!(
        "{}-tls",
        domain
            .trim()
            .to_ascii_lowercase()
            .replace(['.', '*'], "-")
            .trim_matches('-')
    )
}

/// Whether `name` is a valid DNS-1123 subdomain (Kubernetes object name).
pub fn is_dns1123_subdomain(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_OBJECT_NAME_LEN
        && name.split('.').all(|label| {
            !label.is_empty()
                && label
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        })
}

/// Configuration for one provisioning run
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Directory holding the static manifests
    pub resources_root: PathBuf,
    /// Namespace the leaf certificate and its secret live in
    pub namespace: String,
    /// Domain the leaf certificate is issued for
    pub domain: String,
    /// Image run by the one-shot CA generation job
    pub ca_image: String,
    /// Where the CA certificate is exported
    pub export_path: PathBuf,
    /// Schedule for waiting on the leaf secret
    pub issuance_poll: PollPolicy,
}

impl WorkflowConfig {
    /// Create a config with defaults for everything but the resources root,
    /// domain and export path. The CA image starts unset.
    pub fn new(
        resources_root: impl Into<PathBuf>,
        domain: impl Into<String>,
        export_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resources_root: resources_root.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            domain: domain.into(),
            ca_image: String::new(),
            export_path: export_path.into(),
            issuance_poll: PollPolicy::issuance(),
        }
    }

    /// Set the target namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the CA generator image
    pub fn with_ca_image(mut self, image: impl Into<String>) -> Self {
        self.ca_image = image.into();
        self
    }

    /// Set the issuance poll schedule
    pub fn with_issuance_poll(mut self, policy: PollPolicy) -> Self {
        self.issuance_poll = policy;
        self
    }

    /// Reject configurations that cannot produce a valid run
    pub fn validate(&self) -> Result<()> {
        if self.domain.trim().is_empty() {
            return Err(Error::config("domain must not be empty"));
        }
        let secret_name = self.certificate_secret_name();
        if !is_dns1123_subdomain(&secret_name) {
            return Err(Error::config(format!(
                "domain '{}' does not yield a valid certificate name ('{}')",
                self.domain, secret_name
            )));
        }
        if self.namespace.trim().is_empty() {
            return Err(Error::config("namespace must not be empty"));
        }
        if self.ca_image.trim().is_empty() {
            return Err(Error::config("CA generator image must be set (--ca-image)"));
        }
        if self.issuance_poll.max_attempts == 0 {
            return Err(Error::config("issuance poll needs at least one attempt"));
        }
        if !self.resources_root.is_dir() {
            return Err(Error::config(format!(
                "resources root {} is not a directory",
                self.resources_root.display()
            )));
        }
        Ok(())
    }

    /// Name of the leaf certificate secret
    pub fn certificate_secret_name(&self) -> String {
        certificate_secret_name(&self.domain)
    }

    /// Manifest reader over the resources root
    pub fn manifests(&self) -> Manifests {
        Manifests::new(&self.resources_root)
    }

    /// The export path
    pub fn export_path(&self) -> &Path {
        &self.export_path
    }
}
