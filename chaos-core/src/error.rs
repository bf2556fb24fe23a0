//! Error taxonomy for schedulable units of work.
//!
//! Every task the scheduler runs (restart a router, delete a service, check a
//! component is up) fails with a [`TaskError`]. The retry classifier inspects
//! it to decide whether the failure is benign, transient or fatal.

use std::fmt;
use thiserror::Error;

/// Structured error code returned by the remote management API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorCode {
    /// The entity does not exist.
    NotFound,
    /// The request failed validation (typically a duplicate create).
    CouldNotValidate,
    /// The session is missing or expired.
    Unauthorized,
    /// Any other code.
    Other,
}

impl ApiErrorCode {
    /// Map the API's wire code (`NOT_FOUND`, `COULD_NOT_VALIDATE`, ...) to a variant.
    pub fn from_code(code: &str) -> Self {
        match code.to_ascii_uppercase().as_str() {
            "NOT_FOUND" => ApiErrorCode::NotFound,
            "COULD_NOT_VALIDATE" => ApiErrorCode::CouldNotValidate,
            "UNAUTHORIZED" => ApiErrorCode::Unauthorized,
            _ => ApiErrorCode::Other,
        }
    }
}

impl fmt::Display for ApiErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiErrorCode::NotFound => write!(f, "NOT_FOUND"),
            ApiErrorCode::CouldNotValidate => write!(f, "COULD_NOT_VALIDATE"),
            ApiErrorCode::Unauthorized => write!(f, "UNAUTHORIZED"),
            ApiErrorCode::Other => write!(f, "OTHER"),
        }
    }
}

/// Failure of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The remote API rejected the call.
    #[error("api error {code}: {message}")]
    Api {
        /// Structured error code.
        code: ApiErrorCode,
        /// Human-readable message from the API.
        message: String,
    },

    /// Transport-level failure (connection refused, closed channel).
    #[error("transport error: {0}")]
    Transport(String),

    /// The operation did not finish in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The operation was interrupted before it finished.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The component cannot perform the requested lifecycle operation.
    #[error("{component} does not support {operation}")]
    Unsupported {
        /// Component id.
        component: String,
        /// Operation that was requested (start, stop, restart, status).
        operation: &'static str,
    },

    /// Anything else (command exit status, unexpected state).
    #[error("{0}")]
    Other(String),
}

impl TaskError {
    /// Build an API error from the wire code and message.
    pub fn api(code: &str, message: &str) -> Self {
        TaskError::Api {
            code: ApiErrorCode::from_code(code),
            message: message.to_string(),
        }
    }

    /// Wrap a free-form failure.
    pub fn other(message: impl fmt::Display) -> Self {
        TaskError::Other(message.to_string())
    }

    /// True if the error means the target entity does not exist.
    pub fn is_not_found(&self) -> bool {
        self.has_code_or_text(ApiErrorCode::NotFound, "not found")
    }

    /// True if the error means the request failed validation.
    pub fn is_could_not_validate(&self) -> bool {
        self.has_code_or_text(ApiErrorCode::CouldNotValidate, "could not validate")
    }

    fn has_code_or_text(&self, wanted: ApiErrorCode, text: &str) -> bool {
        match self {
            TaskError::Api { code, .. } if *code == wanted => true,
            // Not every collaborator reports codes, fall back to the message
            other => other.to_string().to_ascii_lowercase().contains(text),
        }
    }
}
