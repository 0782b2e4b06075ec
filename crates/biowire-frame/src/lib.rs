//! Kind-tagged, length-prefixed framing for biowire.
//!
//! Every message is framed with:
//! - A 1-byte kind code identifying the payload schema
//! - A 4-byte little-endian signed payload length
//!
//! [`FrameAssembler`] turns an arbitrarily chunked byte stream back into
//! frames; [`Message`] maps each frame to its typed payload.

pub mod assembler;
pub mod codec;
pub mod error;
pub mod kind;
pub mod message;

pub use assembler::FrameAssembler;
pub use codec::{
    check_payload_len, decode_frame, encode_frame, peek_header, Frame, FrameConfig,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAX_WIRE_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use kind::KindCode;
pub use message::{
    Message, ProtocolInfo, SensorsData, Settings, PROTOCOL_NAME, PROTOCOL_VERSION,
    SENSORS_PAYLOAD_SIZE,
};
