//! Bounded linear polling
//!
//! Polls a check a fixed number of times with a fixed pause in between. The
//! pause goes through an injected [`Sleeper`] so the schedule can be verified
//! without real delays.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::debug;

/// Attempts allowed while waiting for a certificate to be issued
pub const ISSUANCE_MAX_ATTEMPTS: u32 = 5;

/// Pause between issuance lookups
pub const ISSUANCE_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Suspends the current task for a duration.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Sleep for `duration`
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Fixed number of attempts separated by a fixed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Maximum number of checks
    pub max_attempts: u32,
    /// Pause between consecutive checks
    pub interval: Duration,
}

impl PollPolicy {
    /// Create a policy
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// 5 attempts, 3 seconds apart
    pub fn issuance() -> Self {
        Self::new(ISSUANCE_MAX_ATTEMPTS, ISSUANCE_POLL_INTERVAL)
    }

    /// Derive a policy that covers `timeout` at `interval` granularity.
    pub fn for_timeout(timeout: Duration, interval: Duration) -> Self {
        let interval_ms = interval.as_millis().max(1);
        let attempts = (timeout.as_millis() / interval_ms) as u32 + 1;
        Self::new(attempts, interval)
    }

    /// Number of pauses taken when every attempt comes back empty
    pub fn max_sleeps(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }

    /// Total time spent sleeping when every attempt comes back empty
    pub fn max_wait(&self) -> Duration {
        self.interval * self.max_sleeps()
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::issuance()
    }
}

/// Poll `check` until it yields a value, fails, or the attempts run out.
///
/// `check` receives the 1-based attempt number and returns:
/// * `Ok(Some(value))` - done, returns `Ok(Some(value))`
/// * `Ok(None)` - not yet, pause and try again
/// * `Err(e)` - fatal, returned immediately without another attempt
///
/// Returns `Ok(None)` when every attempt came back empty. No pause follows the
/// final attempt.
pub async fn poll_bounded<T, E, F, Fut, S>(
    policy: &PollPolicy,
    sleeper: &S,
    description: &str,
    mut check: F,
) -> Result<Option<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    S: Sleeper + ?Sized,
{
    for attempt in 1..=policy.max_attempts {
        if let Some(value) = check(attempt).await? {
            return Ok(Some(value));
        }

        debug!(
            attempt,
            max_attempts = policy.max_attempts,
            "{} not ready yet",
            description
        );

        if attempt < policy.max_attempts {
            sleeper.sleep(policy.interval).await;
        }
    }

    Ok(None)
}
