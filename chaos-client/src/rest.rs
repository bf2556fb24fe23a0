//! Edge management REST collaborator.
//!
//! A thin typed wrapper over the controller's `/edge/management/v1` API:
//! password authentication plus list/get/create/update/delete for the entity types
//! the chaos engine touches. Error replies use the
//! `{"error": {"code": "...", "message": "..."}}` envelope.

use std::time::Duration;

use async_trait::async_trait;
use chaos_core::{ApiErrorCode, TaskError};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Header carrying the session token.
pub const SESSION_HEADER: &str = "zt-session";

/// Filter that lifts the default page size.
pub const LIMIT_NONE: &str = "limit none";

const API_PREFIX: &str = "/edge/management/v1";

/// REST errors.
#[derive(Debug, Error)]
pub enum RestError {
    /// HTTP request failed before a reply arrived.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API replied with an error envelope.
    #[error("api error {code} (http {status}): {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// Structured error code.
        code: String,
        /// Human-readable message.
        message: String,
    },

    /// 404 without an error envelope.
    #[error("not found: {0}")]
    NotFound(String),

    /// Reply body did not match the expected shape.
    #[error("unexpected reply: {0}")]
    Decode(String),

    /// Call requires a session token.
    #[error("not authenticated")]
    Unauthenticated,
}

impl From<RestError> for TaskError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::Api { code, message, .. } => TaskError::api(&code, &message),
            RestError::NotFound(what) => TaskError::Api {
                code: ApiErrorCode::NotFound,
                message: what,
            },
            RestError::Http(e) if e.is_timeout() => TaskError::Timeout(e.to_string()),
            RestError::Http(e) => TaskError::Transport(e.to_string()),
            other => TaskError::other(other),
        }
    }
}

/// Entity collections the chaos engine reads or mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    /// Services.
    Services,
    /// Identities.
    Identities,
    /// Service policies.
    ServicePolicies,
    /// Edge routers.
    EdgeRouters,
    /// Terminators.
    Terminators,
    /// Router links.
    Links,
}

impl EntityType {
    /// URL path segment.
    pub fn path(&self) -> &'static str {
        match self {
            EntityType::Services => "services",
            EntityType::Identities => "identities",
            EntityType::ServicePolicies => "service-policies",
            EntityType::EdgeRouters => "edge-routers",
            EntityType::Terminators => "terminators",
            EntityType::Links => "links",
        }
    }

    /// Singular name used in task kinds (`delete.service`).
    pub fn singular(&self) -> &'static str {
        match self {
            EntityType::Services => "service",
            EntityType::Identities => "identity",
            EntityType::ServicePolicies => "service-policy",
            EntityType::EdgeRouters => "edge-router",
            EntityType::Terminators => "terminator",
            EntityType::Links => "link",
        }
    }
}

/// The fields of an entity the chaos engine looks at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySummary {
    /// Remote id.
    pub id: String,
    /// Name (absent for links and terminators).
    #[serde(default)]
    pub name: String,
    /// Online flag (edge routers).
    #[serde(default)]
    pub is_online: Option<bool>,
    /// Admin flag (identities).
    #[serde(default)]
    pub is_admin: Option<bool>,
    /// Role attributes.
    #[serde(default)]
    pub role_attributes: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct TokenData {
    token: String,
}

#[derive(Deserialize)]
struct CreatedData {
    id: String,
}

/// Map a non-2xx reply to a [`RestError`].
pub fn decode_error(status: u16, body: &str, what: &str) -> RestError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => RestError::Api {
            status,
            code: envelope.error.code,
            message: envelope.error.message,
        },
        Err(_) if status == StatusCode::NOT_FOUND.as_u16() => RestError::NotFound(what.to_string()),
        Err(_) => RestError::Api {
            status,
            code: "UNKNOWN".to_string(),
            message: body.chars().take(200).collect(),
        },
    }
}

/// Client for one controller's edge management API.
#[derive(Debug, Clone)]
pub struct EdgeClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl EdgeClient {
    /// Create an unauthenticated client.
    ///
    /// Controllers under test use self-signed certificates, so certificate
    /// verification is disabled when `insecure` is set.
    pub fn new(base_url: &str, timeout: Duration, insecure: bool) -> Result<Self, RestError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Use an existing session token.
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Current session token, if authenticated.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn url(&self, tail: &str) -> String {
        format!("{}{}/{}", self.base_url, API_PREFIX, tail)
    }

    fn session_token(&self) -> Result<&str, RestError> {
        self.token.as_deref().ok_or(RestError::Unauthenticated)
    }

    /// Authenticate with username and password; stores and returns the token.
    pub async fn authenticate(&mut self, username: &str, password: &str) -> Result<String, RestError> {
        let response = self
            .http
            .post(self.url("authenticate"))
            .query(&[("method", "password")])
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await?;
        let data: TokenData = Self::decode(response, "authenticate").await?;
        self.token = Some(data.token.clone());
        Ok(data.token)
    }

    /// List entities matching `filter` (use [`LIMIT_NONE`] for everything).
    pub async fn list(&self, entity: EntityType, filter: &str) -> Result<Vec<EntitySummary>, RestError> {
        let response = self
            .http
            .get(self.url(entity.path()))
            .query(&[("filter", filter)])
            .header(SESSION_HEADER, self.session_token()?)
            .send()
            .await?;
        Self::decode(response, entity.path()).await
    }

    /// Fetch one entity.
    pub async fn get(&self, entity: EntityType, id: &str) -> Result<EntitySummary, RestError> {
        let response = self
            .http
            .get(self.url(&format!("{}/{}", entity.path(), id)))
            .header(SESSION_HEADER, self.session_token()?)
            .send()
            .await?;
        Self::decode(response, &format!("{} {}", entity.singular(), id)).await
    }

    /// Create an entity; returns its id.
    pub async fn create(&self, entity: EntityType, body: &serde_json::Value) -> Result<String, RestError> {
        let response = self
            .http
            .post(self.url(entity.path()))
            .header(SESSION_HEADER, self.session_token()?)
            .json(body)
            .send()
            .await?;
        let created: CreatedData = Self::decode(response, entity.path()).await?;
        Ok(created.id)
    }

    /// Patch the fields present in `body` on an existing entity.
    pub async fn update(&self, entity: EntityType, id: &str, body: &serde_json::Value) -> Result<(), RestError> {
        let response = self
            .http
            .patch(self.url(&format!("{}/{}", entity.path(), id)))
            .header(SESSION_HEADER, self.session_token()?)
            .json(body)
            .send()
            .await?;
        Self::expect_success(response, &format!("{} {}", entity.singular(), id)).await
    }

    /// Delete an entity.
    pub async fn delete(&self, entity: EntityType, id: &str) -> Result<(), RestError> {
        let response = self
            .http
            .delete(self.url(&format!("{}/{}", entity.path(), id)))
            .header(SESSION_HEADER, self.session_token()?)
            .send()
            .await?;
        Self::expect_success(response, &format!("{} {}", entity.singular(), id)).await
    }

    async fn expect_success(response: reqwest::Response, what: &str) -> Result<(), RestError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(decode_error(status.as_u16(), &body, what))
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, RestError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(decode_error(status.as_u16(), &body, what));
        }
        serde_json::from_str::<Envelope<T>>(&body)
            .map(|e| e.data)
            .map_err(|e| RestError::Decode(format!("{}: {}", what, e)))
    }
}

/// Entity operations the chaos engine needs from the management API.
#[async_trait]
pub trait EdgeApi: Send + Sync {
    /// List entities matching `filter`.
    async fn list(&self, entity: EntityType, filter: &str) -> Result<Vec<EntitySummary>, RestError>;

    /// Fetch one entity.
    async fn get(&self, entity: EntityType, id: &str) -> Result<EntitySummary, RestError>;

    /// Create an entity; returns its id.
    async fn create(&self, entity: EntityType, body: &serde_json::Value) -> Result<String, RestError>;

    /// Patch fields of an existing entity.
    async fn update(&self, entity: EntityType, id: &str, body: &serde_json::Value) -> Result<(), RestError>;

    /// Delete an entity.
    async fn delete(&self, entity: EntityType, id: &str) -> Result<(), RestError>;
}

#[async_trait]
impl EdgeApi for EdgeClient {
    async fn list(&self, entity: EntityType, filter: &str) -> Result<Vec<EntitySummary>, RestError> {
        EdgeClient::list(self, entity, filter).await
    }

    async fn get(&self, entity: EntityType, id: &str) -> Result<EntitySummary, RestError> {
        EdgeClient::get(self, entity, id).await
    }

    async fn create(&self, entity: EntityType, body: &serde_json::Value) -> Result<String, RestError> {
        EdgeClient::create(self, entity, body).await
    }

    async fn update(&self, entity: EntityType, id: &str, body: &serde_json::Value) -> Result<(), RestError> {
        EdgeClient::update(self, entity, id, body).await
    }

    async fn delete(&self, entity: EntityType, id: &str) -> Result<(), RestError> {
        EdgeClient::delete(self, entity, id).await
    }
}
