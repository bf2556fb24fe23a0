//! Bounded-concurrency task scheduler.
//!
//! Runs a batch of [`LabeledTask`]s with at most `concurrency` in flight.
//! Failed attempts are classified by the [`RetryPolicy`]: ignored failures
//! count as success, retried tasks back off linearly, and reported failures
//! are collected into one [`SchedulerError`] once every task has finished.
//!
//! By default a reported failure does not disturb sibling tasks. With
//! [`FailurePolicy::CancelOnReport`] the first report cancels work that has
//! not yet finished. The caller's [`CancellationToken`] is always honoured.

use std::future::Future;
use std::sync::Arc;

use chaos_core::{RetryDecision, RetryPolicy, TaskError};
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

/// Future produced by one attempt of a task.
pub type TaskFuture = BoxFuture<'static, Result<(), TaskError>>;

/// A unit of work plus the kind that drives retry classification.
pub struct LabeledTask {
    /// Task kind, e.g. `restart.router` or `delete.service`.
    pub kind: String,
    /// Human-readable label used in logs and errors.
    pub label: String,
    work: Box<dyn Fn() -> TaskFuture + Send + Sync>,
}

impl std::fmt::Debug for LabeledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabeledTask")
            .field("kind", &self.kind)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl LabeledTask {
    /// Create a task. `work` is called once per attempt.
    pub fn new<F, Fut>(kind: impl Into<String>, label: impl Into<String>, work: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self {
            kind: kind.into(),
            label: label.into(),
            work: Box::new(move || -> TaskFuture { Box::pin(work()) }),
        }
    }

    fn attempt(&self) -> TaskFuture {
        (self.work)()
    }
}

/// What a reported failure does to sibling tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Siblings run to completion.
    #[default]
    RunToCompletion,
    /// The first reported failure cancels unfinished siblings.
    CancelOnReport,
}

/// A task that gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{label} ({kind}) failed after {attempts} attempt(s): {error}")]
pub struct TaskFailure {
    /// Task kind.
    pub kind: String,
    /// Task label.
    pub label: String,
    /// Attempts made, including the reported one.
    pub attempts: u32,
    /// Error of the last attempt.
    pub error: TaskError,
}

/// Batch-level scheduler errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// At least one task reported a failure.
    #[error("{count} task(s) failed: {summary}", count = .failures.len(), summary = summarize(.failures))]
    TasksFailed {
        /// Every reported failure, in completion order.
        failures: Vec<TaskFailure>,
        /// Tasks abandoned before finishing.
        cancelled: usize,
    },

    /// The batch was cancelled before all tasks finished.
    #[error("cancelled with {cancelled} task(s) unfinished")]
    Cancelled {
        /// Tasks abandoned before finishing.
        cancelled: usize,
    },
}

impl SchedulerError {
    /// Reported failures, empty if the batch was only cancelled.
    pub fn failures(&self) -> &[TaskFailure] {
        match self {
            SchedulerError::TasksFailed { failures, .. } => failures,
            SchedulerError::Cancelled { .. } => &[],
        }
    }
}

fn summarize(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Counts for a batch that finished without reported failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionSummary {
    /// Tasks whose work eventually succeeded.
    pub succeeded: usize,
    /// Tasks whose failure was classified as benign.
    pub ignored: usize,
}

enum TaskOutcome {
    Succeeded,
    Ignored,
    Failed(TaskFailure),
    Cancelled,
}

/// Runs batches of tasks with bounded concurrency and retry classification.
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    concurrency: usize,
    policy: RetryPolicy,
    failure_policy: FailurePolicy,
}

impl TaskScheduler {
    /// Scheduler running at most `concurrency` tasks at once (minimum 1).
    pub fn new(concurrency: usize, policy: RetryPolicy) -> Self {
        Self {
            concurrency: concurrency.max(1),
            policy,
            failure_policy: FailurePolicy::default(),
        }
    }

    /// Set what a reported failure does to siblings.
    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    /// Concurrency limit.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run every task to a terminal decision.
    pub async fn execute(
        &self,
        tasks: Vec<LabeledTask>,
        cancel: &CancellationToken,
    ) -> Result<ExecutionSummary, SchedulerError> {
        let total = tasks.len();
        if total == 0 {
            return Ok(ExecutionSummary::default());
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let batch_token = cancel.child_token();
        let (tx, mut rx) = mpsc::channel(total);

        let mut handles = Vec::with_capacity(total);
        for task in tasks {
            let semaphore = Arc::clone(&semaphore);
            let token = batch_token.clone();
            let tx = tx.clone();
            let policy = self.policy;
            let failure_policy = self.failure_policy;
            let label = task.label.clone();
            let kind = task.kind.clone();

            let handle = tokio::spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    _ = token.cancelled() => TaskOutcome::Cancelled,
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(_permit) => run_task(&task, policy, &token).await,
                        Err(_) => TaskOutcome::Cancelled,
                    },
                };
                if matches!(outcome, TaskOutcome::Failed(_))
                    && failure_policy == FailurePolicy::CancelOnReport
                {
                    token.cancel();
                }
                // Receiver outlives every sender
                let _ = tx.send(outcome).await;
            });
            handles.push((kind, label, handle));
        }
        drop(tx);

        let mut summary = ExecutionSummary::default();
        let mut failures = Vec::new();
        let mut cancelled = 0;
        let mut received = 0;
        while let Some(outcome) = rx.recv().await {
            received += 1;
            match outcome {
                TaskOutcome::Succeeded => summary.succeeded += 1,
                TaskOutcome::Ignored => summary.ignored += 1,
                TaskOutcome::Failed(failure) => failures.push(failure),
                TaskOutcome::Cancelled => cancelled += 1,
            }
        }

        if received < total {
            for (kind, label, handle) in handles {
                if let Err(e) = handle.await {
                    failures.push(TaskFailure {
                        kind,
                        label,
                        attempts: 0,
                        error: TaskError::other(format!("task aborted: {}", e)),
                    });
                }
            }
        }

        tracing::debug!(
            total,
            succeeded = summary.succeeded,
            ignored = summary.ignored,
            failed = failures.len(),
            cancelled,
            "task batch finished"
        );

        if !failures.is_empty() {
            Err(SchedulerError::TasksFailed {
                failures,
                cancelled,
            })
        } else if cancelled > 0 {
            Err(SchedulerError::Cancelled { cancelled })
        } else {
            Ok(summary)
        }
    }
}

async fn run_task(task: &LabeledTask, policy: RetryPolicy, cancel: &CancellationToken) -> TaskOutcome {
    let mut attempt = 1;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return TaskOutcome::Cancelled,
            result = task.attempt() => result,
        };
        let error = match result {
            Ok(()) => return TaskOutcome::Succeeded,
            Err(e) => e,
        };
        // Interrupted by the same shutdown that cancelled the batch
        if matches!(error, TaskError::Cancelled(_)) && cancel.is_cancelled() {
            return TaskOutcome::Cancelled;
        }

        match policy.classify(&task.kind, attempt, &error) {
            RetryDecision::Ignore => {
                tracing::debug!(task = %task.label, kind = %task.kind, attempt, error = %error, "failure ignored");
                return TaskOutcome::Ignored;
            }
            RetryDecision::Report => {
                tracing::error!(task = %task.label, kind = %task.kind, attempt, error = %error, "task failed");
                return TaskOutcome::Failed(TaskFailure {
                    kind: task.kind.clone(),
                    label: task.label.clone(),
                    attempts: attempt,
                    error,
                });
            }
            RetryDecision::Retry => {
                let backoff = policy.backoff(attempt);
                tracing::warn!(
                    task = %task.label,
                    kind = %task.kind,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "task failed, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return TaskOutcome::Cancelled,
                    _ = tokio::time::sleep(backoff) => {}
                }
                attempt += 1;
            }
        }
    }
}
