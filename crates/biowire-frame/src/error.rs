use crate::kind::KindCode;

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The kind byte is not a known wire kind.
    #[error("unknown frame kind 0x{0:02x}")]
    UnknownKind(u8),

    /// `KindCode::Unknown` was handed to the encoder.
    #[error("frame kind Unknown cannot be encoded")]
    UnencodableKind,

    /// The header carries a negative payload length.
    #[error("invalid frame length {0}")]
    InvalidLength(i32),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The payload does not match the schema for its kind.
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: KindCode, reason: String },

    /// A JSON-encoded payload failed to parse or serialize.
    #[error("json payload error: {0}")]
    Json(#[from] serde_json::Error),

    /// The assembler already failed and the stream position is lost.
    #[error("frame stream desynchronized by an earlier error")]
    Desynchronized,
}

impl FrameError {
    pub(crate) fn invalid(kind: KindCode, reason: impl Into<String>) -> Self {
        Self::InvalidPayload {
            kind,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
