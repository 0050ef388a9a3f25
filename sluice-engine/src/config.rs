//! Engine configuration
//!
//! Defines the tunable parameters of the stage execution engine: dispatch
//! parallelism, failure escalation, state-write retries and stale-item recovery.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// When per-item failures inside one stage should fail the whole run
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailureThreshold {
    /// Fail once this many items of the stage have failed
    Count(usize),
    /// Fail once this fraction of the stage's items have failed, in (0, 1]
    Ratio(f64),
}

impl FailureThreshold {
    /// Checks the threshold against the failures seen so far in a wave of `total` items
    pub fn is_exceeded(&self, failed: usize, total: usize) -> bool {
        match *self {
            Self::Count(max) => failed >= max,
            Self::Ratio(ratio) => total > 0 && failed as f64 / total as f64 >= ratio,
        }
    }
}

/// What to do with work items found `InProgress` for longer than the timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    /// Put them back to `Pending` so they are processed again
    Resume,
    /// Mark them `Failed`
    Fail,
}

impl std::str::FromStr for StalePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "resume" => Ok(Self::Resume),
            "fail" => Ok(Self::Fail),
            other => anyhow::bail!("unknown stale policy '{}'", other),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum work items processed concurrently within one stage
    pub max_parallel_work_items: usize,

    /// Per-stage failure escalation; None means item failures never fail the run
    pub failure_threshold: Option<FailureThreshold>,

    /// Backoff for state service writes
    pub state_retry: RetryPolicy,

    /// How long an item may stay `InProgress` before recovery considers it abandoned
    pub in_progress_timeout: Duration,

    pub stale_policy: StalePolicy,
}

impl EngineConfig {
    /// Creates a new configuration with defaults
    pub fn new() -> Self {
        Self {
            max_parallel_work_items: 4,
            failure_threshold: None,
            state_retry: RetryPolicy::default(),
            in_progress_timeout: Duration::from_secs(600), // 10 minutes
            stale_policy: StalePolicy::Resume,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - SLUICE_MAX_PARALLEL (default: 4)
    /// - SLUICE_FAILURE_MAX_COUNT (fail a stage after N failed items)
    /// - SLUICE_FAILURE_MAX_RATIO (fail a stage once this fraction failed; ignored if a count is set)
    /// - SLUICE_STATE_RETRIES (default: 10)
    /// - SLUICE_IN_PROGRESS_TIMEOUT (seconds, default: 600)
    /// - SLUICE_STALE_POLICY (resume | fail, default: resume)
    pub fn from_env() -> Self {
        let defaults = Self::new();

        let max_parallel_work_items = std::env::var("SLUICE_MAX_PARALLEL")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_parallel_work_items);

        let failure_count = std::env::var("SLUICE_FAILURE_MAX_COUNT")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .map(FailureThreshold::Count);

        let failure_ratio = std::env::var("SLUICE_FAILURE_MAX_RATIO")
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .map(FailureThreshold::Ratio);

        let max_attempts = std::env::var("SLUICE_STATE_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(defaults.state_retry.max_attempts);

        let in_progress_timeout = std::env::var("SLUICE_IN_PROGRESS_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.in_progress_timeout);

        let stale_policy = std::env::var("SLUICE_STALE_POLICY")
            .ok()
            .and_then(|s| s.parse::<StalePolicy>().ok())
            .unwrap_or(defaults.stale_policy);

        Self {
            max_parallel_work_items,
            failure_threshold: failure_count.or(failure_ratio),
            state_retry: RetryPolicy {
                max_attempts,
                ..defaults.state_retry
            },
            in_progress_timeout,
            stale_policy,
        }
    }

    pub fn with_max_parallel(mut self, max_parallel_work_items: usize) -> Self {
        self.max_parallel_work_items = max_parallel_work_items;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: FailureThreshold) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    pub fn with_state_retry(mut self, policy: RetryPolicy) -> Self {
        self.state_retry = policy;
        self
    }

    pub fn with_in_progress_timeout(mut self, timeout: Duration) -> Self {
        self.in_progress_timeout = timeout;
        self
    }

    pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_parallel_work_items == 0 {
            anyhow::bail!("max_parallel_work_items must be greater than 0");
        }

        match self.failure_threshold {
            Some(FailureThreshold::Count(0)) => {
                anyhow::bail!("failure threshold count must be greater than 0");
            }
            Some(FailureThreshold::Ratio(ratio)) if !(ratio > 0.0 && ratio <= 1.0) => {
                anyhow::bail!("failure threshold ratio must be in (0, 1], got {}", ratio);
            }
            _ => {}
        }

        if self.state_retry.max_attempts == 0 {
            anyhow::bail!("state_retry.max_attempts must be greater than 0");
        }

        if self.in_progress_timeout.is_zero() {
            anyhow::bail!("in_progress_timeout must be greater than 0");
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
