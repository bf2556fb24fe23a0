//! Errors surfaced by a chaos iteration.

use chaos_core::TaskError;
use thiserror::Error;

use crate::churn::ChurnError;
use crate::config::ConfigError;
use crate::convergence::ConvergenceError;
use crate::scheduler::SchedulerError;

/// Chaos iteration errors.
#[derive(Debug, Error)]
pub enum ChaosError {
    /// Configuration problem.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A selected victim cannot be controlled.
    #[error("cannot inject fault: {0}")]
    Lifecycle(TaskError),

    /// Starting previously stopped components failed.
    #[error("restoring stopped components failed: {0}")]
    Restore(SchedulerError),

    /// Fault injection tasks failed.
    #[error("fault injection failed: {0}")]
    Faults(SchedulerError),

    /// Entity churn failed.
    #[error("entity churn failed: {0}")]
    Churn(#[from] ChurnError),

    /// Components were not up.
    #[error("components not up: {0}")]
    NotUp(SchedulerError),

    /// The cluster did not converge.
    #[error("validation failed: {0}")]
    Validation(#[from] ConvergenceError),

    /// The iteration was cancelled.
    #[error("iteration cancelled")]
    Cancelled,
}

impl ChaosError {
    /// True if the error came from cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        match self {
            ChaosError::Cancelled => true,
            ChaosError::Validation(e) => e.is_cancelled(),
            ChaosError::Faults(SchedulerError::Cancelled { .. })
            | ChaosError::Restore(SchedulerError::Cancelled { .. })
            | ChaosError::NotUp(SchedulerError::Cancelled { .. }) => true,
            _ => false,
        }
    }
}
