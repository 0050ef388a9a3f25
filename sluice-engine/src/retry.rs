//! Retry with exponential backoff
//!
//! State writes are retried here before a failure is escalated. Only errors
//! flagged as transient are retried.

use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use crate::repository::StateError;

/// Backoff schedule for retried operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(500), Duration::from_millis(30_000))
    }
}

/// Runs `op` until it succeeds, fails permanently, or the policy is exhausted
///
/// `description` is only used for logging.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    description: &str,
    mut op: F,
) -> Result<T, StateError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StateError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => {
                error!("{} failed permanently: {}", description, e);
                return Err(e);
            }
            Err(e) => {
                if attempt >= policy.max_attempts {
                    error!("{} failed after {} attempt(s): {}", description, attempt, e);
                    return Err(e);
                }

                let delay = policy.delay_after(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                    description, attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
