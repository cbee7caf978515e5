//! Retry with exponential backoff and jitter for cluster API calls.
//!
//! The kube client uses this for server-side apply: right after cert-manager is
//! installed its admission webhook is not serving yet, and applying an issuer
//! or certificate fails until it is. This is distinct from [`crate::poll`],
//! which waits for a resource with a fixed, linear schedule.
//!
//! # Example
//!
//! ```ignore
//! use trust_bootstrap::retry::{retry_with_backoff_if, RetryConfig};
//!
//! retry_with_backoff_if(
//!     &RetryConfig::for_apply(),
//!     "apply ClusterIssuer",
//!     || async { api.patch(name, &params, &patch).await },
//!     |e| !is_validation_error(e),
//! )
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Backoff schedule for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Cap on the delay between attempts
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Schedule for applying manifests against a freshly installed controller.
    ///
    /// Roughly a minute in total, enough for the cert-manager webhook to
    /// become ready.
    pub fn for_apply() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(15),
            backoff_multiplier: 2.0,
        }
    }

    /// Delay after `failures` consecutive failures, before jitter.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exp = self
            .backoff_multiplier
            .powi(failures.saturating_sub(1) as i32);
        Duration::from_secs_f64(
            (self.initial_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Execute an async operation with exponential backoff.
///
/// Errors for which `should_retry` returns false are returned immediately.
/// Otherwise retries until success or `max_attempts` is exhausted, returning
/// the last error.
pub async fn retry_with_backoff_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let e = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !should_retry(&e) {
            return Err(e);
        }

        if config.max_attempts > 0 && attempt >= config.max_attempts {
            error!(
                operation = %operation_name,
                attempt = attempt,
                error = %e,
                "Operation failed after max retries"
            );
            return Err(e);
        }

        // 0.5x to 1.5x of the scheduled delay
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let delay = Duration::from_secs_f64(config.delay_after(attempt).as_secs_f64() * jitter);

        warn!(
            operation = %operation_name,
            attempt = attempt,
            error = %e,
            delay_ms = delay.as_millis(),
            "Operation failed, retrying"
        );

        tokio::time::sleep(delay).await;
    }
}
