//! Deadline-bounded convergence polling for one controller.
//!
//! After chaos the cluster needs time to settle. The poller repeats a
//! validation until it comes back clean or the deadline passes, sleeping a
//! fixed interval between attempts and refreshing the controller session
//! before each one. A session the controller rejects is dropped so the next
//! attempt logs in again. An attempt is never started past the deadline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chaos_client::{ApiSession, ControllerSession, SessionError, ValidationClient, ValidationError, ValidationReport};
use chaos_types::{ValidationKind, ValidationRequest};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default pause between failed attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(15);

/// Default staleness threshold for controller sessions.
pub const DEFAULT_AUTH_MAX_AGE: Duration = Duration::from_secs(300);

/// Runs one validation exchange.
#[async_trait]
pub trait ValidationProbe: Send + Sync {
    /// Validate through `session`; see [`ValidationClient::validate`].
    async fn validate(
        &self,
        session: &ApiSession,
        request: &ValidationRequest,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport, ValidationError>;
}

#[async_trait]
impl ValidationProbe for ValidationClient {
    async fn validate(
        &self,
        session: &ApiSession,
        request: &ValidationRequest,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport, ValidationError> {
        ValidationClient::validate(self, session, request, cancel).await
    }
}

/// Why a single attempt failed.
#[derive(Debug, Error)]
pub enum AttemptError {
    /// The session could not be refreshed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The validation failed or found inconsistencies.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl AttemptError {
    /// Invalid count of the attempt, if it completed with errors.
    pub fn invalid_count(&self) -> Option<u64> {
        match self {
            AttemptError::Validation(e) => e.invalid_count(),
            AttemptError::Session(_) => None,
        }
    }
}

/// Convergence failures.
#[derive(Debug, Error)]
pub enum ConvergenceError {
    /// The deadline passed with the last attempt still failing.
    #[error(
        "{controller}: {kind} did not converge after {attempts} attempt(s) in {elapsed:?} (last invalid count: {last}): {source}",
        last = display_count(.last_invalid)
    )]
    DeadlineExceeded {
        /// Controller id.
        controller: String,
        /// Validation kind.
        kind: ValidationKind,
        /// Attempts made.
        attempts: u32,
        /// Time spent polling.
        elapsed: Duration,
        /// Invalid count of the last completed attempt.
        last_invalid: Option<u64>,
        /// Last attempt's error.
        #[source]
        source: AttemptError,
    },

    /// Polling was cancelled.
    #[error("{controller}: {kind} convergence cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// Controller id.
        controller: String,
        /// Validation kind.
        kind: ValidationKind,
        /// Attempts made.
        attempts: u32,
    },

    /// The polling task for this controller died without a result.
    #[error("{controller}: validation task aborted: {reason}")]
    Aborted {
        /// Controller id.
        controller: String,
        /// Panic or abort message.
        reason: String,
    },
}

impl ConvergenceError {
    /// Controller the failure belongs to.
    pub fn controller(&self) -> &str {
        match self {
            ConvergenceError::DeadlineExceeded { controller, .. }
            | ConvergenceError::Cancelled { controller, .. }
            | ConvergenceError::Aborted { controller, .. } => controller,
        }
    }

    /// True if polling stopped because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConvergenceError::Cancelled { .. })
    }
}

fn display_count(count: &Option<u64>) -> String {
    count.map_or_else(|| "unknown".to_string(), |n| n.to_string())
}

/// A clean validation and how long it took to get there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Convergence {
    /// Controller id.
    pub controller: String,
    /// Validation kind.
    pub kind: ValidationKind,
    /// Attempts made, including the clean one.
    pub attempts: u32,
    /// Time from the first attempt to the clean report.
    pub elapsed: Duration,
    /// The clean report.
    pub report: ValidationReport,
}

/// Repeats validation on one controller until it is clean.
#[derive(Clone)]
pub struct ConvergencePoller {
    probe: Arc<dyn ValidationProbe>,
    retry_interval: Duration,
    auth_max_age: Duration,
}

impl std::fmt::Debug for ConvergencePoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvergencePoller")
            .field("retry_interval", &self.retry_interval)
            .field("auth_max_age", &self.auth_max_age)
            .finish_non_exhaustive()
    }
}

impl ConvergencePoller {
    /// Poller using `probe` with the default interval and session age.
    pub fn new(probe: Arc<dyn ValidationProbe>) -> Self {
        Self {
            probe,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            auth_max_age: DEFAULT_AUTH_MAX_AGE,
        }
    }

    /// Pause between failed attempts.
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Re-authenticate sessions older than this before an attempt.
    pub fn with_auth_max_age(mut self, auth_max_age: Duration) -> Self {
        self.auth_max_age = auth_max_age;
        self
    }

    /// Validate until clean or until `deadline`.
    pub async fn poll(
        &self,
        session: &ControllerSession,
        request: &ValidationRequest,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Convergence, ConvergenceError> {
        let controller = session.controller().id.clone();
        let kind = request.kind;
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let error = match self.attempt(session, request, cancel).await {
                Ok(report) => {
                    tracing::info!(
                        ctrl = %controller,
                        kind = %kind,
                        attempts,
                        expected = report.expected,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "converged"
                    );
                    return Ok(Convergence {
                        controller,
                        kind,
                        attempts,
                        elapsed: started.elapsed(),
                        report,
                    });
                }
                Err(AttemptError::Validation(ValidationError::Cancelled { .. })) => {
                    return Err(ConvergenceError::Cancelled {
                        controller,
                        kind,
                        attempts,
                    });
                }
                Err(e) => e,
            };

            if matches!(&error, AttemptError::Validation(e) if e.is_unauthorized()) {
                tracing::warn!(ctrl = %controller, kind = %kind, "session rejected, re-authenticating next attempt");
                session.invalidate().await;
            }

            let next_attempt = Instant::now() + self.retry_interval;
            let wake = next_attempt.min(deadline);
            if next_attempt < deadline {
                tracing::info!(
                    ctrl = %controller,
                    kind = %kind,
                    attempt = attempts,
                    invalid = error.invalid_count(),
                    retry_in_ms = self.retry_interval.as_millis() as u64,
                    error = %error,
                    "not converged yet"
                );
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ConvergenceError::Cancelled { controller, kind, attempts });
                }
                _ = tokio::time::sleep_until(wake) => {}
            }

            if next_attempt >= deadline {
                tracing::error!(
                    ctrl = %controller,
                    kind = %kind,
                    attempts,
                    invalid = error.invalid_count(),
                    error = %error,
                    "convergence deadline exceeded"
                );
                return Err(ConvergenceError::DeadlineExceeded {
                    controller,
                    kind,
                    attempts,
                    elapsed: started.elapsed(),
                    last_invalid: error.invalid_count(),
                    source: error,
                });
            }
        }
    }

    async fn attempt(
        &self,
        session: &ControllerSession,
        request: &ValidationRequest,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport, AttemptError> {
        let api = session.ensure_authed(self.auth_max_age).await?;
        let report = self.probe.validate(&api, request, cancel).await?;
        Ok(report.into_result()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{controller, ScriptedProbe};
    use chaos_client::StaticAuthenticator;

    fn session(auth: Arc<StaticAuthenticator>) -> ControllerSession {
        ControllerSession::new(controller(1), auth)
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_counts_as_failed_attempt() {
        let auth = Arc::new(StaticAuthenticator::new().failing(1));
        let probe = Arc::new(ScriptedProbe::always(0));
        let poller = ConvergencePoller::new(probe.clone()).with_retry_interval(Duration::from_secs(1));

        let result = poller
            .poll(
                &session(auth.clone()),
                &ValidationRequest::new(ValidationKind::Circuits),
                Instant::now() + Duration::from_secs(60),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.attempts, 2);
        assert_eq!(auth.calls(), 2);
        assert_eq!(probe.calls(), 1);
    }

    /// Rejects the first token it sees for each controller.
    #[derive(Default)]
    struct ExpiringTokenProbe {
        seen: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ValidationProbe for ExpiringTokenProbe {
        async fn validate(
            &self,
            session: &ApiSession,
            request: &ValidationRequest,
            _cancel: &CancellationToken,
        ) -> Result<ValidationReport, ValidationError> {
            self.seen.lock().unwrap().push(session.token.clone());
            if session.token.ends_with("-1") {
                return Err(ValidationError::Rejected {
                    controller: session.controller_id.clone(),
                    kind: request.kind,
                    message: "unauthorized: session expired".into(),
                });
            }
            Ok(ValidationReport {
                controller: session.controller_id.clone(),
                kind: request.kind,
                expected: 2,
                invalid: 0,
                failures: Vec::new(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_session_is_replaced() {
        let auth = Arc::new(StaticAuthenticator::new());
        let probe = Arc::new(ExpiringTokenProbe::default());
        let poller = ConvergencePoller::new(probe.clone()).with_retry_interval(Duration::from_secs(1));

        let result = poller
            .poll(
                &session(auth.clone()),
                &ValidationRequest::new(ValidationKind::Circuits),
                Instant::now() + Duration::from_secs(60),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.attempts, 2);
        assert_eq!(auth.calls(), 2);
        assert_eq!(*probe.seen.lock().unwrap(), ["token-ctrl1-1", "token-ctrl1-2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn session_is_refreshed_once_stale() {
        let auth = Arc::new(StaticAuthenticator::new());
        let probe = Arc::new(ScriptedProbe::clean_after(3, 4));
        let poller = ConvergencePoller::new(probe.clone())
            .with_retry_interval(Duration::from_secs(15))
            .with_auth_max_age(Duration::from_secs(20));

        poller
            .poll(
                &session(auth.clone()),
                &ValidationRequest::new(ValidationKind::RouterLinks),
                Instant::now() + Duration::from_secs(300),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        // attempts at 0s, 15s, 30s: the third finds a 30s old session
        assert_eq!(auth.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_between_attempts() {
        let probe = Arc::new(ScriptedProbe::always(2));
        let poller = ConvergencePoller::new(probe.clone());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let err = poller
            .poll(
                &session(Arc::new(StaticAuthenticator::new())),
                &ValidationRequest::new(ValidationKind::Circuits),
                Instant::now() + Duration::from_secs(600),
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_error_keeps_controller_and_count() {
        let probe = Arc::new(ScriptedProbe::always(7));
        let poller = ConvergencePoller::new(probe).with_retry_interval(Duration::from_secs(10));

        let err = poller
            .poll(
                &session(Arc::new(StaticAuthenticator::new())),
                &ValidationRequest::new(ValidationKind::RouterSdkTerminators),
                Instant::now() + Duration::from_secs(25),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match &err {
            ConvergenceError::DeadlineExceeded {
                controller,
                attempts,
                last_invalid,
                ..
            } => {
                assert_eq!(controller, "ctrl1");
                assert_eq!(*attempts, 3);
                assert_eq!(*last_invalid, Some(7));
            }
            other => panic!("unexpected error: {other}"),
        }
        let message = err.to_string();
        assert!(message.contains("ctrl1"));
        assert!(message.contains("last invalid count: 7"));
    }
}
