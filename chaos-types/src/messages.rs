//! Validation messages exchanged over a management channel.
//!
//! A validation is one request, one immediate response carrying the number
//! of detail events still to come, and then that many streamed
//! [`DetailEvent`]s.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ContentType, WireError};

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    rmp_serde::to_vec_named(value).map_err(WireError::Serialization)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)
}

/// Which cluster data structure to validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    /// Circuits known to the controller vs. circuits on routers
    Circuits,
    /// Router-to-router links
    RouterLinks,
    /// Router data model replicas
    RouterDataModel,
    /// SDK-hosted terminators
    RouterSdkTerminators,
    /// Identity connection state reported by routers
    IdentityConnectionStatuses,
}

impl ValidationKind {
    /// Every kind, in the order a full validation pass runs them.
    pub const ALL: [ValidationKind; 5] = [
        ValidationKind::RouterDataModel,
        ValidationKind::RouterLinks,
        ValidationKind::Circuits,
        ValidationKind::RouterSdkTerminators,
        ValidationKind::IdentityConnectionStatuses,
    ];

    /// Content type of the request.
    pub fn request_type(&self) -> ContentType {
        match self {
            ValidationKind::Circuits => ContentType::ValidateCircuitsRequest,
            ValidationKind::RouterLinks => ContentType::ValidateRouterLinksRequest,
            ValidationKind::RouterDataModel => ContentType::ValidateRouterDataModelRequest,
            ValidationKind::RouterSdkTerminators => {
                ContentType::ValidateRouterSdkTerminatorsRequest
            }
            ValidationKind::IdentityConnectionStatuses => {
                ContentType::ValidateIdentityConnectionStatusesRequest
            }
        }
    }

    /// Content type of the immediate response.
    pub fn response_type(&self) -> ContentType {
        match self {
            ValidationKind::Circuits => ContentType::ValidateCircuitsResponse,
            ValidationKind::RouterLinks => ContentType::ValidateRouterLinksResponse,
            ValidationKind::RouterDataModel => ContentType::ValidateRouterDataModelResponse,
            ValidationKind::RouterSdkTerminators => {
                ContentType::ValidateRouterSdkTerminatorsResponse
            }
            ValidationKind::IdentityConnectionStatuses => {
                ContentType::ValidateIdentityConnectionStatusesResponse
            }
        }
    }

    /// Content type of the streamed detail events.
    pub fn details_type(&self) -> ContentType {
        match self {
            ValidationKind::Circuits => ContentType::RouterCircuitDetails,
            ValidationKind::RouterLinks => ContentType::RouterLinkDetails,
            ValidationKind::RouterDataModel => ContentType::RouterDataModelDetails,
            ValidationKind::RouterSdkTerminators => ContentType::RouterSdkTerminatorsDetails,
            ValidationKind::IdentityConnectionStatuses => {
                ContentType::RouterIdentityConnectionDetails
            }
        }
    }
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationKind::Circuits => "circuits",
            ValidationKind::RouterLinks => "router_links",
            ValidationKind::RouterDataModel => "router_data_model",
            ValidationKind::RouterSdkTerminators => "router_sdk_terminators",
            ValidationKind::IdentityConnectionStatuses => "identity_connection_statuses",
        };
        f.write_str(s)
    }
}

impl FromStr for ValidationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ValidationKind::ALL
            .into_iter()
            .find(|k| k.to_string() == s)
            .ok_or_else(|| format!("unknown validation kind: {}", s))
    }
}

/// First frame on a new channel: proves the channel belongs to an
/// authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHello {
    /// Session token issued by the edge management API
    pub token: String,
}

impl SessionHello {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        encode(self)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        decode(bytes)
    }
}

/// Ask a controller to validate one kind of cluster state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRequest {
    /// What to validate
    pub kind: ValidationKind,
    /// Router filter expression
    pub router_filter: String,
    /// Also validate the controller's own copy (router data model only)
    pub validate_ctrl: bool,
    /// Ask the controller to repair what it finds
    pub fix_invalid: bool,
}

impl ValidationRequest {
    /// Request validation of every router, without fixes.
    pub fn new(kind: ValidationKind) -> Self {
        Self {
            kind,
            router_filter: "limit none".to_string(),
            validate_ctrl: kind == ValidationKind::RouterDataModel,
            fix_invalid: false,
        }
    }

    /// Set the router filter.
    pub fn with_filter(mut self, filter: &str) -> Self {
        self.router_filter = filter.to_string();
        self
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        encode(self)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        decode(bytes)
    }
}

/// Immediate acknowledgement of a [`ValidationRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResponse {
    /// Whether validation was started
    pub success: bool,
    /// Failure reason when `success` is false
    pub message: String,
    /// Number of detail events that will follow
    pub count: u64,
}

impl ValidationResponse {
    /// Validation started; `count` detail events follow.
    pub fn started(count: u64) -> Self {
        Self {
            success: true,
            message: String::new(),
            count,
        }
    }

    /// Validation refused.
    pub fn refused(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            count: 0,
        }
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        encode(self)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        decode(bytes)
    }
}

/// Validation outcome for one entity (circuit, link, terminator, ...) on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDetail {
    /// Entity identifier
    pub entity_id: String,
    /// Whether the node's view of this entity is consistent
    pub valid: bool,
    /// Inconsistencies found for this entity
    #[serde(default)]
    pub errors: Vec<String>,
}

impl EntityDetail {
    /// True if this entity is inconsistent.
    pub fn is_in_error_state(&self) -> bool {
        !self.valid || !self.errors.is_empty()
    }
}

/// One streamed per-node validation outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailEvent {
    /// Whether the node validated cleanly
    pub validate_success: bool,
    /// Node-level message (usually an error)
    #[serde(default)]
    pub message: String,
    /// Node identifier
    pub target_id: String,
    /// Node name
    #[serde(default)]
    pub target_name: String,
    /// Per-entity outcomes
    #[serde(default)]
    pub entities: Vec<EntityDetail>,
}

impl DetailEvent {
    /// A clean result for `target_id`.
    pub fn valid(target_id: &str) -> Self {
        Self {
            validate_success: true,
            message: String::new(),
            target_id: target_id.to_string(),
            target_name: target_id.to_string(),
            entities: Vec::new(),
        }
    }

    /// A failed result for `target_id`.
    pub fn invalid(target_id: &str, message: &str) -> Self {
        Self {
            validate_success: false,
            message: message.to_string(),
            ..Self::valid(target_id)
        }
    }

    /// Attach an entity outcome.
    pub fn with_entity(mut self, entity: EntityDetail) -> Self {
        self.entities.push(entity);
        self
    }

    /// True if the node reported failure or any entity is in an error state.
    pub fn is_invalid(&self) -> bool {
        !self.validate_success || self.entities.iter().any(EntityDetail::is_in_error_state)
    }

    /// Error strings across the node message and all failing entities.
    pub fn error_messages(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.message.is_empty() {
            out.push(self.message.clone());
        }
        for entity in self.entities.iter().filter(|e| e.is_in_error_state()) {
            if entity.errors.is_empty() {
                out.push(format!("{}: invalid", entity.entity_id));
            }
            for err in &entity.errors {
                out.push(format!("{}: {}", entity.entity_id, err));
            }
        }
        out
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        encode(self)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        decode(bytes)
    }
}
