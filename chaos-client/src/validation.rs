//! Validation protocol client.
//!
//! One validation runs over a fresh management channel:
//!
//! ```text
//! Disconnected → Connecting → AwaitingAck → StreamingDetails → Completed
//!                     ↓             ↓               ↓
//!                   Failed        Failed          Failed
//! ```
//!
//! The immediate response announces how many detail events follow. Detail
//! events are correlated by content type and counted against that number;
//! only one validation may be in flight per channel. If the channel closes
//! before the count is reached the attempt fails.

use std::sync::Arc;
use std::time::Duration;

use chaos_types::{DetailEvent, Frame, ValidationKind, ValidationRequest, ValidationResponse, WireError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelDialer, ChannelError, MgmtChannel, TcpDialer};
use crate::session::ApiSession;

/// Default timeout for the request/response exchange.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Channel failure (connect, send, timeout).
    #[error("{controller}: channel error: {source}")]
    Channel {
        /// Controller id.
        controller: String,
        /// Underlying error.
        #[source]
        source: ChannelError,
    },

    /// Response or request could not be encoded or decoded.
    #[error("{controller}: wire error: {source}")]
    Wire {
        /// Controller id.
        controller: String,
        /// Underlying error.
        #[source]
        source: WireError,
    },

    /// The controller refused to start the validation.
    #[error("{controller}: {kind} validation rejected: {message}")]
    Rejected {
        /// Controller id.
        controller: String,
        /// Validation kind.
        kind: ValidationKind,
        /// Reason given by the controller.
        message: String,
    },

    /// The channel closed before every detail event arrived.
    #[error("{controller}: unexpected close of channel after {received} of {expected} {kind} details")]
    UnexpectedClose {
        /// Controller id.
        controller: String,
        /// Validation kind.
        kind: ValidationKind,
        /// Detail events received.
        received: u64,
        /// Detail events announced.
        expected: u64,
    },

    /// Validation completed and found inconsistencies.
    #[error("{controller}: errors found: {invalid} of {expected} {kind} details invalid")]
    ErrorsFound {
        /// Controller id.
        controller: String,
        /// Validation kind.
        kind: ValidationKind,
        /// Invalid detail events.
        invalid: u64,
        /// Detail events announced.
        expected: u64,
    },

    /// The caller cancelled the validation.
    #[error("{controller}: validation cancelled")]
    Cancelled {
        /// Controller id.
        controller: String,
    },
}

impl ValidationError {
    /// Invalid count carried by the error, if it has one.
    pub fn invalid_count(&self) -> Option<u64> {
        match self {
            ValidationError::ErrorsFound { invalid, .. } => Some(*invalid),
            _ => None,
        }
    }

    /// True if the controller refused the request because the session token
    /// is no longer accepted.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            ValidationError::Rejected { message, .. } => {
                let message = message.to_ascii_lowercase();
                message.contains("unauthorized") || message.contains("not authorized")
            }
            _ => false,
        }
    }
}

/// A node that reported inconsistencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    /// Node id.
    pub target_id: String,
    /// Node name.
    pub target_name: String,
    /// Node and entity error strings.
    pub errors: Vec<String>,
}

/// Outcome of one completed validation exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Controller that ran the validation.
    pub controller: String,
    /// What was validated.
    pub kind: ValidationKind,
    /// Detail events announced (and received).
    pub expected: u64,
    /// Detail events reporting inconsistencies.
    pub invalid: u64,
    /// Per-node failures.
    pub failures: Vec<NodeFailure>,
}

impl ValidationReport {
    /// True if no detail event reported an inconsistency.
    pub fn is_clean(&self) -> bool {
        self.invalid == 0
    }

    /// `Ok(self)` if clean, otherwise [`ValidationError::ErrorsFound`].
    pub fn into_result(self) -> Result<Self, ValidationError> {
        if self.is_clean() {
            Ok(self)
        } else {
            Err(ValidationError::ErrorsFound {
                controller: self.controller,
                kind: self.kind,
                invalid: self.invalid,
                expected: self.expected,
            })
        }
    }
}

/// Protocol progress, tracked for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtocolState {
    Disconnected,
    Connecting,
    AwaitingAck,
    StreamingDetails { received: u64, expected: u64 },
    Completed,
}

impl std::fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolState::Disconnected => write!(f, "disconnected"),
            ProtocolState::Connecting => write!(f, "connecting"),
            ProtocolState::AwaitingAck => write!(f, "awaiting ack"),
            ProtocolState::StreamingDetails { received, expected } => {
                write!(f, "streaming details ({}/{})", received, expected)
            }
            ProtocolState::Completed => write!(f, "completed"),
        }
    }
}

/// Runs validations against controllers.
#[derive(Clone)]
pub struct ValidationClient {
    dialer: Arc<dyn ChannelDialer>,
    send_timeout: Duration,
}

impl std::fmt::Debug for ValidationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationClient")
            .field("send_timeout", &self.send_timeout)
            .finish_non_exhaustive()
    }
}

impl ValidationClient {
    /// Client dialing through `dialer`.
    pub fn new(dialer: Arc<dyn ChannelDialer>, send_timeout: Duration) -> Self {
        Self {
            dialer,
            send_timeout,
        }
    }

    /// Client dialing controllers over TCP.
    pub fn tcp(connect_timeout: Duration, send_timeout: Duration) -> Self {
        Self::new(Arc::new(TcpDialer::new(connect_timeout)), send_timeout)
    }

    /// Run one validation exchange.
    ///
    /// Returns the report whenever the exchange completes, even if it found
    /// inconsistencies; use [`ValidationReport::into_result`] to treat those
    /// as errors.
    pub async fn validate(
        &self,
        session: &ApiSession,
        request: &ValidationRequest,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport, ValidationError> {
        let controller = session.controller_id.as_str();
        let mut state = ProtocolState::Disconnected;
        tracing::trace!(ctrl = controller, state = %state, kind = %request.kind, "starting validation");

        state = ProtocolState::Connecting;
        tracing::trace!(ctrl = controller, state = %state);
        let channel = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled(controller)),
            dialed = self.dialer.dial(session) => dialed.map_err(|e| channel_err(controller, e))?,
        };

        let result = self.exchange(&channel, controller, request, cancel, &mut state).await;
        channel.close().await;

        match &result {
            Ok(report) => tracing::debug!(
                ctrl = controller,
                kind = %report.kind,
                expected = report.expected,
                invalid = report.invalid,
                "validation completed"
            ),
            Err(e) => tracing::debug!(ctrl = controller, last_state = %state, error = %e, "validation failed"),
        }
        result
    }

    async fn exchange(
        &self,
        channel: &MgmtChannel,
        controller: &str,
        request: &ValidationRequest,
        cancel: &CancellationToken,
        state: &mut ProtocolState,
    ) -> Result<ValidationReport, ValidationError> {
        let kind = request.kind;
        // Bind before sending so no detail event can slip past
        let mut details = channel.bind(kind.details_type());
        let closed = channel.close_token();

        *state = ProtocolState::AwaitingAck;
        let body = request.to_bytes().map_err(|e| wire_err(controller, e))?;
        let frame = Frame::new(kind.request_type(), body);
        let reply = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled(controller)),
            reply = channel.send_for_reply(frame, self.send_timeout) => {
                reply.map_err(|e| channel_err(controller, e))?
            }
        };
        reply
            .expect_kind(kind.response_type())
            .map_err(|e| wire_err(controller, e))?;
        let response = ValidationResponse::from_bytes(&reply.body).map_err(|e| wire_err(controller, e))?;
        if !response.success {
            return Err(ValidationError::Rejected {
                controller: controller.to_string(),
                kind,
                message: response.message,
            });
        }

        let expected = response.count;
        let mut report = ValidationReport {
            controller: controller.to_string(),
            kind,
            expected,
            invalid: 0,
            failures: Vec::new(),
        };
        let mut received = 0u64;
        *state = ProtocolState::StreamingDetails { received, expected };

        while received < expected {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(controller)),
                frame = details.recv() => frame,
                _ = closed.cancelled() => None,
            };
            let Some(frame) = frame else {
                return Err(ValidationError::UnexpectedClose {
                    controller: controller.to_string(),
                    kind,
                    received,
                    expected,
                });
            };
            received += 1;
            *state = ProtocolState::StreamingDetails { received, expected };
            record_detail(&mut report, controller, &frame);
        }

        *state = ProtocolState::Completed;
        Ok(report)
    }
}

fn record_detail(report: &mut ValidationReport, controller: &str, frame: &Frame) {
    match DetailEvent::from_bytes(&frame.body) {
        Ok(event) if !event.is_invalid() => {}
        Ok(event) => {
            let errors = event.error_messages();
            tracing::warn!(
                ctrl = controller,
                kind = %report.kind,
                target = %event.target_id,
                name = %event.target_name,
                errors = ?errors,
                "validation reported inconsistency"
            );
            report.invalid += 1;
            report.failures.push(NodeFailure {
                target_id: event.target_id,
                target_name: event.target_name,
                errors,
            });
        }
        Err(e) => {
            tracing::warn!(ctrl = controller, kind = %report.kind, error = %e, "undecodable detail event");
            report.invalid += 1;
            report.failures.push(NodeFailure {
                target_id: "unknown".to_string(),
                target_name: String::new(),
                errors: vec![e.to_string()],
            });
        }
    }
}

fn cancelled(controller: &str) -> ValidationError {
    ValidationError::Cancelled {
        controller: controller.to_string(),
    }
}

fn channel_err(controller: &str, source: ChannelError) -> ValidationError {
    ValidationError::Channel {
        controller: controller.to_string(),
        source,
    }
}

fn wire_err(controller: &str, source: WireError) -> ValidationError {
    ValidationError::Wire {
        controller: controller.to_string(),
        source,
    }
}
