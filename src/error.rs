//! Error types for trust-bootstrap
//!
//! Workflow failures carry the coordinates of the object involved (secret name,
//! namespace, job name) so an operator can inspect the cluster and re-run.
//! Errors leaving the workflow are wrapped in [`Error::Step`] with the title of
//! the step that failed.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for trust-bootstrap operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Cluster client operation failed
    #[error("cluster error [{operation}]: {message}")]
    Client {
        /// Client operation that failed (e.g., "apply_manifest", "create_job")
        operation: String,
        /// Description of what failed
        message: String,
    },

    /// A static manifest could not be read or parsed
    #[error("manifest error [{}]: {message}", .path.display())]
    Manifest {
        /// Path of the manifest (relative to the resources root when known)
        path: PathBuf,
        /// Description of what failed
        message: String,
    },

    /// Invalid configuration supplied by the caller
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// Local filesystem error
    #[error("io error: {source}")]
    Io {
        /// The underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// A step ran before the step it depends on completed
    #[error("precursor missing: {precursor} must be satisfied first")]
    PrecursorMissing {
        /// The fact that should already hold
        precursor: String,
    },

    /// The CA generation job did not report success
    #[error("CA generation job {namespace}/{job} did not succeed")]
    GenerationFailed {
        /// Job name
        job: String,
        /// Job namespace
        namespace: String,
    },

    /// A secret exists but lacks a required field
    #[error("secret {namespace}/{name} exists but has no '{field}' field")]
    MalformedSecret {
        /// Secret name
        name: String,
        /// Secret namespace
        namespace: String,
        /// The missing field
        field: String,
    },

    /// The certificate secret never appeared within the poll bound
    #[error("secret {namespace}/{name} not issued after {attempts} attempts")]
    IssuanceTimeout {
        /// Secret name
        name: String,
        /// Secret namespace
        namespace: String,
        /// Number of lookups performed
        attempts: u32,
    },

    /// A certificate was already requested during this run
    #[error("certificate for {domain} already requested in this run")]
    AlreadyRequested {
        /// Domain the certificate was requested for
        domain: String,
    },

    /// Nothing to export: the secret or its CA field is missing or undecodable
    #[error("CA certificate unavailable from secret {namespace}/{name}: {reason}")]
    SecretUnavailable {
        /// Secret name
        name: String,
        /// Secret namespace
        namespace: String,
        /// Why the certificate could not be exported
        reason: String,
    },

    /// A workflow step failed
    #[error("step '{step}' failed: {source}")]
    Step {
        /// Title of the failing step
        step: &'static str,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a client error for the given operation
    pub fn client(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Client {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a manifest error for the given path
    pub fn manifest(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a secret-unavailable error
    pub fn secret_unavailable(
        name: impl Into<String>,
        namespace: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::SecretUnavailable {
            name: name.into(),
            namespace: namespace.into(),
            reason: reason.into(),
        }
    }

    /// Attach the title of the step this error escaped from.
    ///
    /// Already-wrapped errors keep their original step.
    pub fn in_step(self, step: &'static str) -> Self {
        match self {
            Self::Step { .. } => self,
            other => Self::Step {
                step,
                source: Box::new(other),
            },
        }
    }

    /// The error with any step context removed
    pub fn root(&self) -> &Error {
        match self {
            Self::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Title of the step this error escaped from, if any
    pub fn step(&self) -> Option<&'static str> {
        match self {
            Self::Step { step, .. } => Some(*step),
            _ => None,
        }
    }
}
