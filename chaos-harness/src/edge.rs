//! Access to the edge management API for scheduled tasks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chaos_client::{ControllerSession, EdgeApi, EdgeClient};
use chaos_core::TaskError;
use rand::seq::SliceRandom;

/// Hands out an authenticated edge API handle.
#[async_trait]
pub trait EdgeProvider: Send + Sync {
    /// An edge API handle backed by a fresh enough session.
    async fn edge(&self) -> Result<Arc<dyn EdgeApi>, TaskError>;
}

/// Picks a random controller per call and talks to its REST API.
#[derive(Debug, Clone)]
pub struct SessionEdgeProvider {
    sessions: Vec<Arc<ControllerSession>>,
    auth_max_age: Duration,
    timeout: Duration,
    insecure: bool,
}

impl SessionEdgeProvider {
    /// Provider over `sessions`; `timeout` bounds each REST call.
    pub fn new(sessions: Vec<Arc<ControllerSession>>, auth_max_age: Duration, timeout: Duration) -> Self {
        Self {
            sessions,
            auth_max_age,
            timeout,
            insecure: true,
        }
    }

    /// Whether to accept self-signed controller certificates.
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }
}

#[async_trait]
impl EdgeProvider for SessionEdgeProvider {
    async fn edge(&self) -> Result<Arc<dyn EdgeApi>, TaskError> {
        let session = self
            .sessions
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| TaskError::other("no controller sessions configured"))?;
        let api = session.ensure_authed(self.auth_max_age).await?;
        let client = EdgeClient::new(&api.edge_url, self.timeout, self.insecure)?.with_token(&api.token);
        Ok(Arc::new(client))
    }
}

#[async_trait]
impl EdgeProvider for Arc<dyn EdgeApi> {
    async fn edge(&self) -> Result<Arc<dyn EdgeApi>, TaskError> {
        Ok(Arc::clone(self))
    }
}
