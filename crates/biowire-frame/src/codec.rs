use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, Result};
use crate::kind::KindCode;

/// Frame header: kind (1) + length (4) = 5 bytes.
pub const HEADER_SIZE: usize = 5;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Largest length the signed 32-bit header field can describe.
pub const MAX_WIRE_PAYLOAD: usize = i32::MAX as usize;

/// A framed message tagged with its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The payload schema of this frame.
    pub kind: KindCode,
    /// The raw payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(kind: KindCode, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// A header-only frame.
    pub fn empty(kind: KindCode) -> Self {
        Self::new(kind, Bytes::new())
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode into a fresh buffer, enforcing `max_payload`.
    pub fn to_wire(&self, max_payload: usize) -> Result<Bytes> {
        check_payload_len(self.payload.len(), max_payload)?;
        let mut dst = BytesMut::with_capacity(self.wire_size());
        encode_frame(self.kind, &self.payload, &mut dst)?;
        Ok(dst.freeze())
    }
}

/// Reject a payload length that exceeds `max_payload` or the header's range.
pub fn check_payload_len(len: usize, max_payload: usize) -> Result<()> {
    let max = max_payload.min(MAX_WIRE_PAYLOAD);
    if len > max {
        return Err(FrameError::PayloadTooLarge { size: len, max });
    }
    Ok(())
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬──────────────┬────────────────┐
/// │ Kind (1B)  │ Length       │ Payload        │
/// │            │ (4B LE, i32) │ (Length bytes) │
/// └────────────┴──────────────┴────────────────┘
/// ```
pub fn encode_frame(kind: KindCode, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if kind == KindCode::Unknown {
        return Err(FrameError::UnencodableKind);
    }
    check_payload_len(payload.len(), MAX_WIRE_PAYLOAD)?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u8(kind.as_u8());
    dst.put_i32_le(payload.len() as i32);
    dst.put_slice(payload);
    Ok(())
}

/// Parse the header at the front of `src` without consuming anything.
///
/// Returns `Ok(None)` if fewer than [`HEADER_SIZE`] bytes are buffered.
pub fn peek_header(src: &[u8], max_payload: usize) -> Result<Option<(KindCode, usize)>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let kind = KindCode::try_from(src[0])?;
    let length = i32::from_le_bytes([src[1], src[2], src[3], src[4]]);
    if length < 0 {
        return Err(FrameError::InvalidLength(length));
    }
    let length = length as usize;
    check_payload_len(length, max_payload)?;

    Ok(Some((kind, length)))
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the front of the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let Some((kind, length)) = peek_header(&src[..], max_payload)? else {
        return Ok(None);
    };

    if src.len() < HEADER_SIZE + length {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(length).freeze();

    Ok(Some(Frame { kind, payload }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
