//! trust-bootstrap - self-signed TLS trust chain provisioning for Kubernetes
//!
//! Provisions a cert-manager backed trust chain for a cluster-hosted
//! application: installs cert-manager if needed, generates a root CA once
//! inside the cluster, registers a CA ClusterIssuer, requests a leaf
//! certificate for a domain, waits for it to be issued, and exports the CA
//! certificate so it can be added to a local trust store.
//!
//! # Modules
//!
//! - [`workflow`] - The ordered provisioning steps and their shared context
//! - [`client`] - Cluster capability trait and its kube-rs implementation
//! - [`transient`] - Short-lived RBAC and Job objects for CA generation
//! - [`manifest`] - Static manifest loading and `${VAR}` substitution
//! - [`poll`] - Bounded linear polling with an injectable sleeper
//! - [`retry`] - Exponential backoff for transient API failures
//! - [`config`] - Workflow configuration
//! - [`cli`] - Command-line interface
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod manifest;
pub mod poll;
pub mod retry;
pub mod transient;
pub mod workflow;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Cluster Object Names
// =============================================================================
// Well-known names shared by the workflow steps, the manifests under the
// resources root, and the tests.

/// Namespace cert-manager is installed into
pub const CONTROLLER_NAMESPACE: &str = "cert-manager";

/// CRD whose presence means cert-manager is installed
pub const CERTIFICATE_CRD: &str = "certificates.cert-manager.io";

/// Secret holding the root CA key pair (in [`CONTROLLER_NAMESPACE`])
pub const CA_SECRET_NAME: &str = "ca-key-pair";

/// Common name of the generated root CA
pub const CA_COMMON_NAME: &str = "trust-bootstrap-ca";

/// ClusterIssuer backed by [`CA_SECRET_NAME`]
pub const CLUSTER_ISSUER_NAME: &str = "ca-issuer";

/// Secret field carrying the CA certificate
pub const CA_CERT_FIELD: &str = "ca.crt";

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "trust-bootstrap";
