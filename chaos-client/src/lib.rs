//! # chaos-client
//!
//! Remote collaborators of the fabric-chaos engine.
//!
//! ## Features
//!
//! - **Transport Abstraction**: pluggable byte transport (length-prefixed TCP, mock)
//! - **Management Channel**: one reader task multiplexing replies and streamed events
//! - **Controller Sessions**: staleness-bounded re-authentication, serialized per controller
//! - **Validation Client**: request, acknowledgement, counted detail stream
//! - **Edge REST Client**: typed list/get/create/update/delete over the management API
//!
//! ## Example
//!
//! ```ignore
//! use chaos_client::{ControllerSession, ValidationClient};
//! use chaos_types::{ValidationKind, ValidationRequest};
//!
//! let session = ControllerSession::new(controller, authenticator);
//! let api = session.ensure_authed(Duration::from_secs(300)).await?;
//!
//! let client = ValidationClient::tcp(Duration::from_secs(10), Duration::from_secs(10));
//! let report = client
//!     .validate(&api, &ValidationRequest::new(ValidationKind::Circuits), &cancel)
//!     .await?;
//! report.into_result()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod rest;
pub mod session;
pub mod transport;
pub mod validation;

pub use channel::{ChannelDialer, ChannelError, MgmtChannel, TcpDialer};
pub use rest::{EdgeApi, EdgeClient, EntitySummary, EntityType, RestError, LIMIT_NONE};
pub use session::{
    ApiSession, Authenticator, ControllerSession, Credentials, RestAuthenticator, SessionError,
    StaticAuthenticator,
};
pub use transport::{MockReply, MockTransport, TcpTransport, Transport, TransportError};
pub use validation::{
    NodeFailure, ValidationClient, ValidationError, ValidationReport, DEFAULT_SEND_TIMEOUT,
};
