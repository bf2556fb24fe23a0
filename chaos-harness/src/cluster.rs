//! Cluster-wide convergence validation.
//!
//! Polls every controller concurrently against a shared deadline. The first
//! failure to arrive wins; it cancels the remaining pollers, and the call
//! still waits for every poller to finish before returning.

use std::sync::Arc;
use std::time::Duration;

use chaos_client::ControllerSession;
use chaos_types::ValidationRequest;
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::convergence::{Convergence, ConvergenceError, ConvergencePoller};

/// Fans a [`ConvergencePoller`] out across all controllers.
#[derive(Debug, Clone)]
pub struct ClusterValidator {
    poller: ConvergencePoller,
    sessions: Vec<Arc<ControllerSession>>,
    deadline: Duration,
}

impl ClusterValidator {
    /// Validator over `sessions`, each allowed `deadline` to converge.
    pub fn new(poller: ConvergencePoller, sessions: Vec<Arc<ControllerSession>>, deadline: Duration) -> Self {
        Self {
            poller,
            sessions,
            deadline,
        }
    }

    /// Controller sessions, in configuration order.
    pub fn sessions(&self) -> &[Arc<ControllerSession>] {
        &self.sessions
    }

    /// Validate `request` on every controller.
    ///
    /// Returns one [`Convergence`] per controller, sorted by controller id,
    /// or the first error observed.
    pub async fn validate(
        &self,
        request: &ValidationRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<Convergence>, ConvergenceError> {
        let deadline = Instant::now() + self.deadline;
        let token = cancel.child_token();
        let (tx, mut rx) = mpsc::channel(self.sessions.len().max(1));

        tracing::info!(
            kind = %request.kind,
            controllers = self.sessions.len(),
            deadline_secs = self.deadline.as_secs(),
            "validating cluster"
        );

        let handles: Vec<_> = self
            .sessions
            .iter()
            .map(|session| {
                let session = Arc::clone(session);
                let poller = self.poller.clone();
                let request = request.clone();
                let token = token.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let result = poller.poll(&session, &request, deadline, &token).await;
                    let _ = tx.send(result).await;
                })
            })
            .collect();
        drop(tx);

        let mut converged = Vec::with_capacity(self.sessions.len());
        let mut first_error: Option<ConvergenceError> = None;
        while let Some(result) = rx.recv().await {
            match result {
                Ok(convergence) => converged.push(convergence),
                Err(e) if first_error.is_none() => {
                    tracing::error!(ctrl = %e.controller(), error = %e, "controller failed to converge");
                    token.cancel();
                    first_error = Some(e);
                }
                Err(e) => tracing::debug!(ctrl = %e.controller(), error = %e, "additional failure"),
            }
        }

        for (session, joined) in self.sessions.iter().zip(join_all(handles).await) {
            if let Err(e) = joined {
                let controller = session.controller().id.clone();
                tracing::error!(ctrl = %controller, error = %e, "validation task aborted");
                first_error.get_or_insert(ConvergenceError::Aborted {
                    controller,
                    reason: e.to_string(),
                });
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                converged.sort_by(|a, b| a.controller.cmp(&b.controller));
                Ok(converged)
            }
        }
    }
}
