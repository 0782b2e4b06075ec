//! Frame kind codes.
//!
//! The kind is exactly one byte on the wire. `Unknown` (0) exists only as an
//! in-process sentinel; it and every byte above 7 are protocol violations.

use std::fmt;

use crate::error::FrameError;

/// Discriminator identifying a frame's payload schema.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KindCode {
    /// Never valid on the wire.
    Unknown = 0,
    /// Server capability/version descriptor.
    ProtocolInfo = 1,
    /// Client display name.
    ClientInfo = 2,
    /// Server display name.
    ServerInfo = 3,
    /// Key/value settings.
    Settings = 4,
    /// Raw audio window.
    Voice = 5,
    /// Chat text.
    Chat = 6,
    /// Four sensor readings.
    Sensors = 7,
}

impl KindCode {
    /// Every kind that may appear on the wire, in code order.
    pub const WIRE: [KindCode; 7] = [
        KindCode::ProtocolInfo,
        KindCode::ClientInfo,
        KindCode::ServerInfo,
        KindCode::Settings,
        KindCode::Voice,
        KindCode::Chat,
        KindCode::Sensors,
    ];

    /// The wire byte for this kind.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            KindCode::Unknown => "UNKNOWN",
            KindCode::ProtocolInfo => "PROTOCOL_INFO",
            KindCode::ClientInfo => "CLIENT_INFO",
            KindCode::ServerInfo => "SERVER_INFO",
            KindCode::Settings => "SETTINGS",
            KindCode::Voice => "VOICE",
            KindCode::Chat => "CHAT",
            KindCode::Sensors => "SENSORS",
        }
    }

    /// Returns true for kinds exchanged only during the handshake.
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            KindCode::ProtocolInfo | KindCode::ClientInfo | KindCode::ServerInfo
        )
    }
}

impl TryFrom<u8> for KindCode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(KindCode::ProtocolInfo),
            2 => Ok(KindCode::ClientInfo),
            3 => Ok(KindCode::ServerInfo),
            4 => Ok(KindCode::Settings),
            5 => Ok(KindCode::Voice),
            6 => Ok(KindCode::Chat),
            7 => Ok(KindCode::Sensors),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

impl fmt::Display for KindCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
