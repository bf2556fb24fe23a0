//! Frame - the wire format wrapper for all management channel messages.

use serde::{Deserialize, Serialize};

use crate::WireError;

/// Current frame format version.
pub const FRAME_VERSION: u8 = 1;

/// Largest frame accepted off the wire (4 MiB).
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Content type discriminator for frame routing.
///
/// Each validation kind has a request, an immediate response, and a
/// streamed details type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ContentType {
    /// Session token presented when a channel opens
    SessionHello = 1,
    /// Generic error reply for requests the controller could not decode
    ErrorReply = 2,

    /// Validate circuits request
    ValidateCircuitsRequest = 10_100,
    /// Validate circuits response
    ValidateCircuitsResponse = 10_101,
    /// Per-router circuit details
    RouterCircuitDetails = 10_102,

    /// Validate router links request
    ValidateRouterLinksRequest = 10_110,
    /// Validate router links response
    ValidateRouterLinksResponse = 10_111,
    /// Per-router link details
    RouterLinkDetails = 10_112,

    /// Validate router data model request
    ValidateRouterDataModelRequest = 10_120,
    /// Validate router data model response
    ValidateRouterDataModelResponse = 10_121,
    /// Per-component router data model details
    RouterDataModelDetails = 10_122,

    /// Validate router SDK terminators request
    ValidateRouterSdkTerminatorsRequest = 10_130,
    /// Validate router SDK terminators response
    ValidateRouterSdkTerminatorsResponse = 10_131,
    /// Per-router SDK terminator details
    RouterSdkTerminatorsDetails = 10_132,

    /// Validate identity connection statuses request
    ValidateIdentityConnectionStatusesRequest = 10_140,
    /// Validate identity connection statuses response
    ValidateIdentityConnectionStatusesResponse = 10_141,
    /// Per-router identity connection details
    RouterIdentityConnectionDetails = 10_142,
}

impl ContentType {
    /// Human-readable name, used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            ContentType::SessionHello => "SessionHello",
            ContentType::ErrorReply => "ErrorReply",
            ContentType::ValidateCircuitsRequest => "ValidateCircuitsRequest",
            ContentType::ValidateCircuitsResponse => "ValidateCircuitsResponse",
            ContentType::RouterCircuitDetails => "RouterCircuitDetails",
            ContentType::ValidateRouterLinksRequest => "ValidateRouterLinksRequest",
            ContentType::ValidateRouterLinksResponse => "ValidateRouterLinksResponse",
            ContentType::RouterLinkDetails => "RouterLinkDetails",
            ContentType::ValidateRouterDataModelRequest => "ValidateRouterDataModelRequest",
            ContentType::ValidateRouterDataModelResponse => "ValidateRouterDataModelResponse",
            ContentType::RouterDataModelDetails => "RouterDataModelDetails",
            ContentType::ValidateRouterSdkTerminatorsRequest => {
                "ValidateRouterSdkTerminatorsRequest"
            }
            ContentType::ValidateRouterSdkTerminatorsResponse => {
                "ValidateRouterSdkTerminatorsResponse"
            }
            ContentType::RouterSdkTerminatorsDetails => "RouterSdkTerminatorsDetails",
            ContentType::ValidateIdentityConnectionStatusesRequest => {
                "ValidateIdentityConnectionStatusesRequest"
            }
            ContentType::ValidateIdentityConnectionStatusesResponse => {
                "ValidateIdentityConnectionStatusesResponse"
            }
            ContentType::RouterIdentityConnectionDetails => "RouterIdentityConnectionDetails",
        }
    }
}

impl TryFrom<i32> for ContentType {
    type Error = WireError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        use ContentType::*;
        let ct = match value {
            1 => SessionHello,
            2 => ErrorReply,
            10_100 => ValidateCircuitsRequest,
            10_101 => ValidateCircuitsResponse,
            10_102 => RouterCircuitDetails,
            10_110 => ValidateRouterLinksRequest,
            10_111 => ValidateRouterLinksResponse,
            10_112 => RouterLinkDetails,
            10_120 => ValidateRouterDataModelRequest,
            10_121 => ValidateRouterDataModelResponse,
            10_122 => RouterDataModelDetails,
            10_130 => ValidateRouterSdkTerminatorsRequest,
            10_131 => ValidateRouterSdkTerminatorsResponse,
            10_132 => RouterSdkTerminatorsDetails,
            10_140 => ValidateIdentityConnectionStatusesRequest,
            10_141 => ValidateIdentityConnectionStatusesResponse,
            10_142 => RouterIdentityConnectionDetails,
            _ => return Err(WireError::InvalidContentType(value)),
        };
        Ok(ct)
    }
}

/// One message on a management channel.
///
/// Requests carry a channel-unique `sequence`; replies point back at it via
/// `reply_for`. Streamed frames (detail events) have no `reply_for` and are
/// routed by content type alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Frame format version (currently 1)
    pub version: u8,
    /// Content type discriminator
    pub content_type: i32,
    /// Sender-assigned sequence number
    pub sequence: u32,
    /// Sequence of the request this frame answers
    pub reply_for: Option<u32>,
    /// MessagePack-encoded message body
    pub body: Vec<u8>,
}

impl Frame {
    /// Create a frame that is not a reply.
    pub fn new(content_type: ContentType, body: Vec<u8>) -> Self {
        Self {
            version: FRAME_VERSION,
            content_type: content_type as i32,
            sequence: 0,
            reply_for: None,
            body,
        }
    }

    /// Create a reply to the frame with sequence `request_sequence`.
    pub fn reply(content_type: ContentType, request_sequence: u32, body: Vec<u8>) -> Self {
        Self {
            reply_for: Some(request_sequence),
            ..Self::new(content_type, body)
        }
    }

    /// Set the sequence number.
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec(self).map_err(WireError::Serialization)
    }

    /// Deserialize from MessagePack bytes, rejecting unknown versions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        let frame: Frame = rmp_serde::from_slice(bytes).map_err(WireError::Deserialization)?;
        if frame.version != FRAME_VERSION {
            return Err(WireError::UnsupportedVersion(frame.version));
        }
        Ok(frame)
    }

    /// Get the content type as an enum.
    pub fn kind(&self) -> Result<ContentType, WireError> {
        ContentType::try_from(self.content_type)
    }

    /// Fail unless this frame has content type `expected`.
    pub fn expect_kind(&self, expected: ContentType) -> Result<(), WireError> {
        if self.content_type == expected as i32 {
            Ok(())
        } else {
            Err(WireError::UnexpectedContentType {
                expected: expected.name(),
                actual: self.content_type,
            })
        }
    }
}
