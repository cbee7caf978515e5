//! Static manifests under the resources root
//!
//! Manifests are plain YAML files with `${VAR}` placeholders. Loading reads the
//! file relative to the resources root and substitutes the given variables;
//! parsing turns a single document into JSON plus the metadata needed to
//! address it on the API server.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::{Error, Result};

/// cert-manager release manifest (vendored by the operator, not shipped)
pub const CONTROLLER_MANIFEST: &str = "cert-manager.yaml";
/// ServiceAccount used by the CA generation job
pub const CA_SERVICE_ACCOUNT_MANIFEST: &str = "ca-generator/service-account.yaml";
/// Role allowing the CA generation job to write the CA secret
pub const CA_ROLE_MANIFEST: &str = "ca-generator/role.yaml";
/// Binds the CA generation role to its service account
pub const CA_ROLE_BINDING_MANIFEST: &str = "ca-generator/role-binding.yaml";
/// ClusterIssuer backed by the CA secret
pub const CLUSTER_ISSUER_MANIFEST: &str = "cluster-issuer.yaml";
/// Certificate request for the target domain
pub const CERTIFICATE_MANIFEST: &str = "certificate.yaml";

/// Reader for the manifests under a resources root
#[derive(Debug, Clone)]
pub struct Manifests {
    root: PathBuf,
}

impl Manifests {
    /// Create a reader rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Read `relative` from the resources root and substitute `vars`.
    pub fn load(&self, relative: &str, vars: &[(&str, &str)]) -> Result<String> {
        let path = self.root.join(relative);
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| Error::manifest(&path, format!("failed to read: {}", e)))?;
        Ok(substitute_vars(&raw, vars))
    }
}

/// Substitute `${VAR}` patterns in YAML.
///
/// - `${VAR}` is replaced with the value from `vars`, or left as-is if missing
/// - `${VAR:=default}` and `${VAR:-default}` fall back to `default`
pub fn substitute_vars(yaml: &str, vars: &[(&str, &str)]) -> String {
    let var_map: HashMap<&str, &str> = vars.iter().copied().collect();
    let mut result = String::with_capacity(yaml.len());
    let mut remaining = yaml;

    while let Some(start) = remaining.find("${") {
        result.push_str(&remaining[..start]);
        let after_start = &remaining[start + 2..];

        match after_start.find('}') {
            Some(end) => {
                result.push_str(&resolve_var_expr(&after_start[..end], &var_map));
                remaining = &after_start[end + 1..];
            }
            None => {
                result.push_str("${");
                remaining = after_start;
            }
        }
    }
    result.push_str(remaining);
    result
}

fn resolve_var_expr(expr: &str, vars: &HashMap<&str, &str>) -> String {
    if let Some(pos) = expr.find(":=").or_else(|| expr.find(":-")) {
        let (name, default) = (&expr[..pos], &expr[pos + 2..]);
        return vars.get(name).copied().unwrap_or(default).to_string();
    }

    vars.get(expr)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("${{{}}}", expr))
}

/// Split a multi-document YAML string, dropping documents without an apiVersion.
pub fn split_documents(manifests: &str) -> Vec<&str> {
    manifests
        .split("\n---")
        .map(|doc| doc.trim().trim_start_matches("---").trim())
        .filter(|doc| doc.contains("apiVersion"))
        .collect()
}

/// A single manifest document with its addressing metadata
#[derive(Debug, Clone)]
pub struct ParsedManifest {
    /// The document as JSON
    pub value: serde_json::Value,
    /// apiVersion, e.g. "cert-manager.io/v1"
    pub api_version: String,
    /// Resource kind
    pub kind: String,
    /// metadata.name
    pub name: String,
    /// metadata.namespace, if the document sets one
    pub namespace: Option<String>,
}

/// Parse one YAML document and extract its metadata
pub fn parse_manifest(manifest: &str) -> Result<ParsedManifest> {
    let value: serde_json::Value = serde_yaml::from_str(manifest)
        .map_err(|e| Error::manifest("<inline>", format!("invalid YAML: {}", e)))?;

    let field = |pointer: &str| value.pointer(pointer).and_then(|v| v.as_str());

    let api_version = field("/apiVersion")
        .ok_or_else(|| Error::manifest("<inline>", "missing apiVersion"))?
        .to_string();
    let kind = field("/kind")
        .ok_or_else(|| Error::manifest("<inline>", "missing kind"))?
        .to_string();
    let name = field("/metadata/name")
        .ok_or_else(|| Error::manifest("<inline>", format!("{} missing metadata.name", kind)))?
        .to_string();
    let namespace = field("/metadata/namespace").map(str::to_string);

    Ok(ParsedManifest {
        value,
        api_version,
        kind,
        name,
        namespace,
    })
}

/// Apply order for a resource kind (lower first)
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" => 2,
        "ClusterRole" | "Role" => 3,
        "ClusterRoleBinding" | "RoleBinding" => 4,
        "ConfigMap" | "Secret" => 5,
        "Service" => 6,
        "Deployment" => 7,
        "MutatingWebhookConfiguration" | "ValidatingWebhookConfiguration" => 8,
        _ => 9,
    }
}
