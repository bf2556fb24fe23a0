//! Authenticated controller sessions.
//!
//! A [`ControllerSession`] remembers when it last authenticated and only
//! re-authenticates when asked with a staleness threshold that the current
//! session exceeds. Concurrent callers are serialized, so a burst of callers
//! with a stale session triggers exactly one authentication.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chaos_core::TaskError;
use chaos_types::Component;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::rest::{EdgeClient, RestError};

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The controller refused the credentials or could not be reached.
    #[error("authentication to {controller} failed: {reason}")]
    Auth {
        /// Controller id.
        controller: String,
        /// Failure reason.
        reason: String,
    },

    /// The component has no endpoint of this kind configured.
    #[error("{controller} has no {endpoint} configured")]
    MissingEndpoint {
        /// Controller id.
        controller: String,
        /// `edge_url` or `mgmt_address`.
        endpoint: &'static str,
    },

    /// REST collaborator error.
    #[error("rest error: {0}")]
    Rest(#[from] RestError),
}

impl From<SessionError> for TaskError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Auth { reason, .. } => TaskError::api("UNAUTHORIZED", &reason),
            SessionError::Rest(e) => e.into(),
            other => TaskError::other(other),
        }
    }
}

/// An authenticated handle to one controller.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiSession {
    /// Controller id.
    pub controller_id: String,
    /// Session token.
    pub token: String,
    /// Edge management REST base URL.
    pub edge_url: String,
    /// Management channel address.
    pub mgmt_address: String,
}

impl std::fmt::Debug for ApiSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSession")
            .field("controller_id", &self.controller_id)
            .field("token", &"[REDACTED]")
            .field("edge_url", &self.edge_url)
            .field("mgmt_address", &self.mgmt_address)
            .finish()
    }
}

impl ApiSession {
    /// Build a session for `controller` with `token`, taking endpoints from
    /// the component.
    pub fn for_controller(controller: &Component, token: &str) -> Result<Self, SessionError> {
        let missing = |endpoint| SessionError::MissingEndpoint {
            controller: controller.id.clone(),
            endpoint,
        };
        Ok(Self {
            controller_id: controller.id.clone(),
            token: token.to_string(),
            edge_url: controller.edge_url.clone().ok_or_else(|| missing("edge_url"))?,
            mgmt_address: controller
                .mgmt_address
                .clone()
                .ok_or_else(|| missing("mgmt_address"))?,
        })
    }
}

/// Produces sessions for controllers.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate against `controller`.
    async fn authenticate(&self, controller: &Component) -> Result<ApiSession, SessionError>;
}

/// Username/password credentials for the edge management API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Authenticates through the controller's REST API.
#[derive(Debug, Clone)]
pub struct RestAuthenticator {
    credentials: Credentials,
    timeout: Duration,
    insecure: bool,
}

impl RestAuthenticator {
    /// Create an authenticator; `timeout` bounds each REST call.
    ///
    /// Certificate verification is off until [`Self::with_insecure`] says otherwise.
    pub fn new(credentials: Credentials, timeout: Duration) -> Self {
        Self {
            credentials,
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
impl Authenticator for RestAuthenticator {
    async fn authenticate(&self, controller: &Component) -> Result<ApiSession, SessionError> {
        let edge_url = controller
            .edge_url
            .as_deref()
            .ok_or_else(|| SessionError::MissingEndpoint {
                controller: controller.id.clone(),
                endpoint: "edge_url",
            })?;
        let mut client = EdgeClient::new(edge_url, self.timeout, self.insecure)?;
        let token = client
            .authenticate(&self.credentials.username, &self.credentials.password)
            .await
            .map_err(|e| SessionError::Auth {
                controller: controller.id.clone(),
                reason: e.to_string(),
            })?;
        ApiSession::for_controller(controller, &token)
    }
}

/// Authenticator that hands out fixed tokens, for tests and dry runs.
#[derive(Debug, Default)]
pub struct StaticAuthenticator {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    delay: Duration,
}

impl StaticAuthenticator {
    /// Authenticator that always succeeds immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `delay` per authentication.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next `n` authentications.
    pub fn failing(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Number of authentications performed (including failed ones).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, controller: &Component) -> Result<ApiSession, SessionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SessionError::Auth {
                controller: controller.id.clone(),
                reason: "invalid credentials".to_string(),
            });
        }
        Ok(ApiSession {
            controller_id: controller.id.clone(),
            token: format!("token-{}-{}", controller.id, call),
            edge_url: controller.edge_url.clone().unwrap_or_default(),
            mgmt_address: controller.mgmt_address.clone().unwrap_or_default(),
        })
    }
}

struct AuthState {
    session: ApiSession,
    authed_at: Instant,
}

/// One controller plus its most recent authentication.
pub struct ControllerSession {
    controller: Component,
    authenticator: Arc<dyn Authenticator>,
    state: Mutex<Option<AuthState>>,
}

impl std::fmt::Debug for ControllerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerSession")
            .field("controller", &self.controller.id)
            .finish_non_exhaustive()
    }
}

impl ControllerSession {
    /// Create an unauthenticated session for `controller`.
    pub fn new(controller: Component, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            controller,
            authenticator,
            state: Mutex::new(None),
        }
    }

    /// The controller this session talks to.
    pub fn controller(&self) -> &Component {
        &self.controller
    }

    /// Return a session no older than `max_age`, authenticating if needed.
    pub async fn ensure_authed(&self, max_age: Duration) -> Result<ApiSession, SessionError> {
        let mut state = self.state.lock().await;
        if let Some(current) = state.as_ref() {
            if current.authed_at.elapsed() <= max_age {
                return Ok(current.session.clone());
            }
        }

        tracing::debug!(ctrl = %self.controller.id, "authenticating");
        let session = self.authenticator.authenticate(&self.controller).await?;
        *state = Some(AuthState {
            session: session.clone(),
            authed_at: Instant::now(),
        });
        Ok(session)
    }

    /// The current session, if any, regardless of age.
    pub async fn current(&self) -> Option<ApiSession> {
        self.state.lock().await.as_ref().map(|s| s.session.clone())
    }

    /// Forget the current session so the next call re-authenticates.
    pub async fn invalidate(&self) {
        *self.state.lock().await = None;
    }
}
