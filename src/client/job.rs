//! CA generation Job construction
//!
//! Builds the one-shot Job that materializes the root CA key pair into a
//! secret. The generator image reads its target from environment variables
//! and writes a `kubernetes.io/tls` secret with `tls.crt`, `tls.key` and
//! `ca.crt`. The full image contract is in `resources/README.md`.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::JobRequest;

/// Label identifying objects created by this tool
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Value of [`MANAGED_BY_LABEL`]
pub const MANAGED_BY_VALUE: &str = "trust-bootstrap";

/// Build the CA generation Job.
///
/// - `backoffLimit: 0`: a failed generation is reported, not retried in-cluster
/// - `restartPolicy: Never`
/// - `ttlSecondsAfterFinished: 600` as a backstop if cleanup never runs
pub fn build_ca_job(request: &JobRequest) -> Job {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(
        "app.kubernetes.io/name".to_string(),
        request.name.clone(),
    );

    let env = [
        ("CA_SECRET_NAME", request.secret_name.as_str()),
        ("CA_SECRET_NAMESPACE", request.namespace.as_str()),
        ("CA_COMMON_NAME", request.common_name.as_str()),
    ]
    .into_iter()
    .map(|(name, value)| EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    })
    .collect();

    let container = Container {
        name: "generator".to_string(),
        image: Some(request.image.clone()),
        env: Some(env),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(request.name.clone()),
            namespace: Some(request.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            ttl_seconds_after_finished: Some(600),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    service_account_name: Some(request.service_account.clone()),
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Check if a Job has completed successfully
pub fn is_job_complete(job: &Job) -> bool {
    has_true_condition(job, "Complete")
}

/// Check if a Job has failed
pub fn is_job_failed(job: &Job) -> bool {
    has_true_condition(job, "Failed")
}

fn has_true_condition(job: &Job, condition_type: &str) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == condition_type && c.status == "True")
        })
        .unwrap_or(false)
}

/// Extract failure message from a failed Job
pub fn job_failure_message(job: &Job) -> Option<String> {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|c| c.type_ == "Failed" && c.status == "True")
                .and_then(|c| c.message.clone())
        })
}
