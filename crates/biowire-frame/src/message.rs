//! Typed payload schemas, one per wire kind.
//!
//! | Kind           | Payload                                               |
//! |----------------|-------------------------------------------------------|
//! | `ProtocolInfo` | JSON [`ProtocolInfo`]                                 |
//! | `ClientInfo`   | display name, raw UTF-8                               |
//! | `ServerInfo`   | display name, raw UTF-8                               |
//! | `Settings`     | JSON object of string keys to string values           |
//! | `Voice`        | raw audio bytes                                       |
//! | `Chat`         | UTF-8 text                                            |
//! | `Sensors`      | 4 x f64 LE: temperature, skin resistance, motion, pulse |

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::codec::{Frame, DEFAULT_MAX_PAYLOAD};
use crate::error::{FrameError, Result};
use crate::kind::KindCode;

/// Protocol name advertised in [`ProtocolInfo`].
pub const PROTOCOL_NAME: &str = "biowire";

/// Protocol version advertised in [`ProtocolInfo`].
pub const PROTOCOL_VERSION: &str = "1.0";

/// Encoded size of a [`SensorsData`] payload.
pub const SENSORS_PAYLOAD_SIZE: usize = 4 * std::mem::size_of::<f64>();

/// One sample of the four biofeedback sensors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorsData {
    pub temperature: f64,
    pub skin_resistance: f64,
    pub motion: f64,
    pub pulse: f64,
}

impl SensorsData {
    pub fn new(temperature: f64, skin_resistance: f64, motion: f64, pulse: f64) -> Self {
        Self {
            temperature,
            skin_resistance,
            motion,
            pulse,
        }
    }

    /// Encode as the 32-byte wire payload.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SENSORS_PAYLOAD_SIZE);
        buf.put_f64_le(self.temperature);
        buf.put_f64_le(self.skin_resistance);
        buf.put_f64_le(self.motion);
        buf.put_f64_le(self.pulse);
        buf.freeze()
    }

    /// Decode a 32-byte wire payload.
    pub fn from_bytes(mut payload: &[u8]) -> Result<Self> {
        if payload.len() != SENSORS_PAYLOAD_SIZE {
            return Err(FrameError::invalid(
                KindCode::Sensors,
                format!(
                    "expected {SENSORS_PAYLOAD_SIZE} bytes, got {}",
                    payload.len()
                ),
            ));
        }
        Ok(Self {
            temperature: payload.get_f64_le(),
            skin_resistance: payload.get_f64_le(),
            motion: payload.get_f64_le(),
            pulse: payload.get_f64_le(),
        })
    }
}

/// Server capability descriptor sent first on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolInfo {
    /// Protocol name. `biowire` by default.
    pub protocol: String,
    /// Protocol version as `<major>.<minor>`.
    pub version: String,
    /// Largest payload the sender accepts.
    pub max_payload: u32,
    /// Wire kind codes the sender understands.
    pub kinds: Vec<u8>,
}

impl Default for ProtocolInfo {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            max_payload: DEFAULT_MAX_PAYLOAD as u32,
            kinds: KindCode::WIRE.iter().map(|kind| kind.as_u8()).collect(),
        }
    }
}

/// Key/value settings exchanged between the peers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(pub BTreeMap<String, String>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a setting, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A decoded frame payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ProtocolInfo(ProtocolInfo),
    ClientInfo(String),
    ServerInfo(String),
    Settings(Settings),
    Voice(Bytes),
    Chat(String),
    Sensors(SensorsData),
}

impl Message {
    /// The wire kind this message is framed with.
    pub fn kind(&self) -> KindCode {
        match self {
            Message::ProtocolInfo(_) => KindCode::ProtocolInfo,
            Message::ClientInfo(_) => KindCode::ClientInfo,
            Message::ServerInfo(_) => KindCode::ServerInfo,
            Message::Settings(_) => KindCode::Settings,
            Message::Voice(_) => KindCode::Voice,
            Message::Chat(_) => KindCode::Chat,
            Message::Sensors(_) => KindCode::Sensors,
        }
    }

    /// Encode into a frame.
    ///
    /// Empty names, empty chat text and empty voice windows are rejected.
    pub fn encode(&self) -> Result<Frame> {
        let kind = self.kind();
        let payload = match self {
            Message::ProtocolInfo(info) => Bytes::from(serde_json::to_vec(info)?),
            Message::Settings(settings) => Bytes::from(serde_json::to_vec(settings)?),
            Message::ClientInfo(text) | Message::ServerInfo(text) | Message::Chat(text) => {
                if text.is_empty() {
                    return Err(FrameError::invalid(kind, "empty text"));
                }
                Bytes::copy_from_slice(text.as_bytes())
            }
            Message::Voice(window) => {
                if window.is_empty() {
                    return Err(FrameError::invalid(kind, "empty voice window"));
                }
                window.clone()
            }
            Message::Sensors(data) => data.to_bytes(),
        };
        Ok(Frame::new(kind, payload))
    }

    /// Decode a frame's payload according to its kind.
    pub fn decode(frame: &Frame) -> Result<Self> {
        let payload = &frame.payload;
        let message = match frame.kind {
            KindCode::Unknown => return Err(FrameError::UnknownKind(KindCode::Unknown.as_u8())),
            KindCode::ProtocolInfo => Message::ProtocolInfo(serde_json::from_slice(payload)?),
            KindCode::Settings => Message::Settings(serde_json::from_slice(payload)?),
            KindCode::ClientInfo => Message::ClientInfo(decode_text(frame.kind, payload)?),
            KindCode::ServerInfo => Message::ServerInfo(decode_text(frame.kind, payload)?),
            KindCode::Chat => Message::Chat(decode_text(frame.kind, payload)?),
            KindCode::Voice => {
                if payload.is_empty() {
                    return Err(FrameError::invalid(frame.kind, "empty voice window"));
                }
                Message::Voice(payload.clone())
            }
            KindCode::Sensors => Message::Sensors(SensorsData::from_bytes(payload)?),
        };
        Ok(message)
    }
}

fn decode_text(kind: KindCode, payload: &[u8]) -> Result<String> {
    if payload.is_empty() {
        return Err(FrameError::invalid(kind, "empty text"));
    }
    std::str::from_utf8(payload)
        .map(str::to_owned)
        .map_err(|err| FrameError::invalid(kind, err.to_string()))
}

impl From<SensorsData> for Message {
    fn from(data: SensorsData) -> Self {
        Message::Sensors(data)
    }
}

impl From<Settings> for Message {
    fn from(settings: Settings) -> Self {
        Message::Settings(settings)
    }
}

impl From<ProtocolInfo> for Message {
    fn from(info: ProtocolInfo) -> Self {
        Message::ProtocolInfo(info)
    }
}

impl TryFrom<&Frame> for Message {
    type Error = FrameError;

    fn try_from(frame: &Frame) -> Result<Self> {
        Message::decode(frame)
    }
}
