//! Retry classification for scheduled tasks.
//!
//! The classifier is a pure function of (task kind, attempt, error). The
//! caller performs the backoff sleep, so the policy can be shared freely
//! between concurrent workers.

use std::time::Duration;

use crate::TaskError;

/// Task kinds starting with this prefix treat "not found" as success.
pub const DELETE_PREFIX: &str = "delete.";

/// Task kinds starting with this prefix treat a repeated "could not validate"
/// as success (an earlier attempt already created the entity).
pub const CREATE_PREFIX: &str = "create.";

/// Default number of retries before a failure is reported.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// What to do with a failed task attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Treat the failure as success.
    Ignore,
    /// Run the task again after backing off.
    Retry,
    /// Give up and surface the error.
    Report,
}

/// Retry classifier plus the linear backoff unit for one call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts beyond this number are reported.
    pub max_attempts: u32,
    /// Backoff before retry n is `n * backoff_unit`.
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Policy with the default attempt limit and the given backoff unit.
    pub fn with_backoff_unit(backoff_unit: Duration) -> Self {
        Self {
            backoff_unit,
            ..Self::default()
        }
    }

    /// Classify a failure of attempt `attempt` (1-based) of a task of `kind`.
    pub fn classify(&self, kind: &str, attempt: u32, error: &TaskError) -> RetryDecision {
        if kind.starts_with(DELETE_PREFIX) && error.is_not_found() {
            return RetryDecision::Ignore;
        }
        if kind.starts_with(CREATE_PREFIX) && attempt > 1 && error.is_could_not_validate() {
            return RetryDecision::Ignore;
        }
        if attempt > self.max_attempts {
            return RetryDecision::Report;
        }
        RetryDecision::Retry
    }

    /// Linear backoff before the retry that follows attempt `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit.saturating_mul(attempt)
    }
}
