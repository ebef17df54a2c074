//! Codec error type.

use switchboard_types::{CorrelationId, ValueError};

/// A frame could not be turned into a [`switchboard_types::Message`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The bytes are not valid JSON.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The envelope names a type the gateway does not know.
    #[error("unknown message type `{kind}`")]
    UnknownType {
        /// Tag as sent.
        kind: String,
        /// Correlation id, when the envelope carried one.
        id: Option<CorrelationId>,
    },

    /// Valid JSON that is not a well-formed envelope.
    #[error("invalid envelope: {detail}")]
    InvalidEnvelope {
        /// What was wrong.
        detail: &'static str,
        /// Correlation id, when it could be recovered.
        id: Option<CorrelationId>,
    },

    /// The inbound buffer grew past the frame limit without yielding a
    /// message. The stream can no longer be trusted.
    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },

    /// The payload does not have the fields a handler needs.
    #[error("invalid payload: {0}")]
    Payload(#[from] ValueError),
}

impl CodecError {
    /// Reason string sent to the client in an `error` response.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Malformed(_) | Self::InvalidEnvelope { .. } | Self::FrameTooLarge { .. } => {
                "malformed"
            }
            Self::UnknownType { .. } => "unknown_type",
            Self::Payload(_) => "invalid_payload",
        }
    }

    /// Correlation id recovered from the bad frame, if any.
    pub const fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            Self::UnknownType { id, .. } | Self::InvalidEnvelope { id, .. } => id.as_ref(),
            Self::Malformed(_) | Self::FrameTooLarge { .. } | Self::Payload(_) => None,
        }
    }

    /// Whether the error means the byte stream itself is corrupt, so the
    /// connection must be closed instead of answering with an error.
    pub const fn is_framing(&self) -> bool {
        matches!(self, Self::FrameTooLarge { .. })
    }
}
