//! Error types for fabric-chaos wire types.

use thiserror::Error;

/// Errors that can occur while encoding, decoding or interpreting wire types.
#[derive(Debug, Error)]
pub enum WireError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Unknown content type discriminator
    #[error("invalid content type: {0}")]
    InvalidContentType(i32),

    /// Unsupported frame version
    #[error("unsupported frame version: {0}")]
    UnsupportedVersion(u8),

    /// Frame body had a different content type than expected
    #[error("unexpected content type: expected {expected:?}, got {actual}")]
    UnexpectedContentType {
        /// The content type the caller wanted.
        expected: ContentTypeName,
        /// The raw content type that arrived.
        actual: i32,
    },

    /// Component selector could not be parsed
    #[error("invalid selector {selector:?}: {reason}")]
    InvalidSelector {
        /// The selector text.
        selector: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Two components share an id
    #[error("duplicate component id: {0}")]
    DuplicateComponent(String),
}

/// Static name of a content type, used in error messages.
pub type ContentTypeName = &'static str;
