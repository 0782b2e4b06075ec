//! Connection handshake.
//!
//! ```text
//! server                         client
//!   | ---- PROTOCOL_INFO -------->  |
//!   | <--- CLIENT_INFO (name) ----  |
//!   | ---- SERVER_INFO (name) --->  |
//! ```
//!
//! Every receive step is bounded by the handshake timeout and polled in short
//! slices so a concurrent stop is noticed promptly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use biowire_frame::{
    Frame, FrameAssembler, FrameConfig, KindCode, Message, ProtocolInfo, PROTOCOL_NAME,
    PROTOCOL_VERSION,
};
use biowire_transport::{Transport, TransportError};
use bytes::BytesMut;
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};

const MAX_PROTOCOL_LEN: usize = 32;
const MAX_VERSION_LEN: usize = 16;
const MAX_NAME_LEN: usize = 256;
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Result of a successful handshake.
#[derive(Debug)]
pub struct Handshake {
    /// Display name announced by the peer.
    pub peer_name: String,
    /// Capabilities advertised by the server (client side only).
    pub protocol: Option<ProtocolInfo>,
    /// Bytes received after the last handshake frame.
    pub leftover: BytesMut,
}

/// Reads frames one at a time from a transport within a deadline.
pub(crate) struct FrameReceiver<'a> {
    transport: &'a dyn Transport,
    assembler: FrameAssembler,
    chunk: Vec<u8>,
    cancel: &'a AtomicBool,
}

impl<'a> FrameReceiver<'a> {
    pub(crate) fn new(
        transport: &'a dyn Transport,
        config: &SessionConfig,
        cancel: &'a AtomicBool,
    ) -> Self {
        Self {
            transport,
            assembler: FrameAssembler::with_config(config.frame.clone()),
            chunk: vec![0u8; config.receive_chunk_size.max(1)],
            cancel,
        }
    }

    /// Wait for the next frame, giving up after `timeout`.
    pub(crate) fn receive(&mut self, timeout: Duration) -> Result<Frame> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.assembler.next_frame()? {
                return Ok(frame);
            }
            if self.cancel.load(Ordering::SeqCst) {
                return Err(SessionError::Stopped);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SessionError::Timeout(timeout));
            }

            let wait = POLL_SLICE.min(deadline - now);
            match self.transport.receive(&mut self.chunk, wait) {
                Ok(0) => continue,
                Ok(n) => self.assembler.feed(&self.chunk[..n]),
                Err(TransportError::NotConnected) => {
                    return Err(SessionError::Disconnected(
                        "connection closed during handshake".to_string(),
                    ));
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Wait for a frame of `expected` kind and decode it.
    pub(crate) fn expect(&mut self, expected: KindCode, timeout: Duration) -> Result<Message> {
        let frame = self.receive(timeout)?;
        if frame.kind != expected {
            return Err(SessionError::UnexpectedKind {
                expected,
                got: frame.kind,
            });
        }
        Ok(Message::decode(&frame)?)
    }

    pub(crate) fn into_leftover(self) -> BytesMut {
        self.assembler.into_remaining()
    }
}

/// Encode `message` and write it straight to the transport, bypassing the queue.
pub(crate) fn send_direct(
    transport: &dyn Transport,
    message: &Message,
    frame_config: &FrameConfig,
) -> Result<()> {
    let wire = message.encode()?.to_wire(frame_config.max_payload_size)?;
    transport.send(&wire)?;
    debug!(kind = ?message.kind(), size = wire.len(), "sent handshake frame");
    Ok(())
}

/// Server side, up to and including the client's name.
///
/// The caller answers with [`send_server_info`] once it has accepted the peer.
pub fn handshake_server(
    transport: &dyn Transport,
    config: &SessionConfig,
    cancel: &AtomicBool,
) -> Result<Handshake> {
    let info = ProtocolInfo {
        max_payload: u32::try_from(config.frame.max_payload_size).unwrap_or(u32::MAX),
        ..ProtocolInfo::default()
    };
    send_direct(transport, &Message::ProtocolInfo(info), &config.frame)?;

    let mut receiver = FrameReceiver::new(transport, config, cancel);
    let Message::ClientInfo(name) =
        receiver.expect(KindCode::ClientInfo, config.handshake_timeout)?
    else {
        return Err(SessionError::HandshakeFailed(
            "CLIENT_INFO did not decode to a client name".to_string(),
        ));
    };
    validate_name(&name)?;
    debug!(client = %name, "received client info");

    Ok(Handshake {
        peer_name: name,
        protocol: None,
        leftover: receiver.into_leftover(),
    })
}

/// Final server step: announce the local display name.
pub fn send_server_info(transport: &dyn Transport, config: &SessionConfig) -> Result<()> {
    send_direct(
        transport,
        &Message::ServerInfo(config.display_name.clone()),
        &config.frame,
    )
}

/// Client side of the handshake.
pub fn handshake_client(
    transport: &dyn Transport,
    config: &SessionConfig,
    cancel: &AtomicBool,
) -> Result<Handshake> {
    let mut receiver = FrameReceiver::new(transport, config, cancel);

    let Message::ProtocolInfo(info) =
        receiver.expect(KindCode::ProtocolInfo, config.handshake_timeout)?
    else {
        return Err(SessionError::HandshakeFailed(
            "PROTOCOL_INFO did not decode to a descriptor".to_string(),
        ));
    };
    validate_protocol(&info)?;
    debug!(protocol = %info.protocol, version = %info.version, "received protocol info");

    send_direct(
        transport,
        &Message::ClientInfo(config.display_name.clone()),
        &config.frame,
    )?;

    let Message::ServerInfo(name) =
        receiver.expect(KindCode::ServerInfo, config.handshake_timeout)?
    else {
        return Err(SessionError::HandshakeFailed(
            "SERVER_INFO did not decode to a server name".to_string(),
        ));
    };
    validate_name(&name)?;
    debug!(server = %name, "received server info");

    Ok(Handshake {
        peer_name: name,
        protocol: Some(info),
        leftover: receiver.into_leftover(),
    })
}

fn validate_protocol(info: &ProtocolInfo) -> Result<()> {
    validate_protocol_name(&info.protocol)?;
    validate_version(&info.version)?;

    if info.protocol != PROTOCOL_NAME {
        return Err(SessionError::HandshakeFailed(format!(
            "unknown protocol '{}' (expected '{}')",
            info.protocol, PROTOCOL_NAME
        )));
    }

    if !is_version_compatible(PROTOCOL_VERSION, &info.version)? {
        return Err(SessionError::HandshakeFailed(format!(
            "incompatible version '{}' (local '{}')",
            info.version, PROTOCOL_VERSION
        )));
    }
    Ok(())
}

fn validate_protocol_name(protocol: &str) -> Result<()> {
    if protocol.is_empty() || protocol.len() > MAX_PROTOCOL_LEN {
        return Err(SessionError::HandshakeFailed(format!(
            "invalid protocol name length: {}",
            protocol.len()
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.len() > MAX_VERSION_LEN {
        return Err(SessionError::HandshakeFailed(format!(
            "invalid protocol version length: {}",
            version.len()
        )));
    }
    let _ = parse_version(version)?;
    Ok(())
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.len() > MAX_NAME_LEN {
        return Err(SessionError::HandshakeFailed(format!(
            "invalid display name length: {}",
            name.len()
        )));
    }
    Ok(())
}

fn is_version_compatible(client_version: &str, server_version: &str) -> Result<bool> {
    let (client_major, client_minor) = parse_version(client_version)?;
    let (server_major, server_minor) = parse_version(server_version)?;

    Ok(client_major == server_major && client_minor >= server_minor)
}

fn parse_version(version: &str) -> Result<(u16, u16)> {
    let invalid = |what: &str| {
        SessionError::HandshakeFailed(format!("invalid version '{version}': {what}"))
    };

    let mut parts = version.split('.');
    let major = parts.next().ok_or_else(|| invalid("missing major"))?;
    let minor = parts.next().ok_or_else(|| invalid("missing minor"))?;
    if parts.next().is_some() {
        return Err(invalid("expected '<major>.<minor>'"));
    }

    let major = major
        .parse::<u16>()
        .map_err(|_| invalid("non-numeric major"))?;
    let minor = minor
        .parse::<u16>()
        .map_err(|_| invalid("non-numeric minor"))?;

    Ok((major, minor))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use biowire_frame::encode_frame;

    use super::*;
    use crate::testing::ScriptedTransport;

    fn quick_config(name: &str) -> SessionConfig {
        SessionConfig {
            handshake_timeout: Duration::from_millis(300),
            ..SessionConfig::named(name)
        }
    }

    fn wire(messages: &[Message]) -> Vec<u8> {
        let mut out = BytesMut::new();
        for message in messages {
            let frame = message.encode().unwrap();
            encode_frame(frame.kind, &frame.payload, &mut out).unwrap();
        }
        out.to_vec()
    }

    #[test]
    fn server_accepts_client_name() {
        let transport = ScriptedTransport::new();
        transport.inject(&wire(&[Message::ClientInfo("Test client".to_string())]));
        let cancel = AtomicBool::new(false);

        let handshake = handshake_server(&transport, &quick_config("Monitor"), &cancel).unwrap();
        assert_eq!(handshake.peer_name, "Test client");
        assert!(handshake.leftover.is_empty());

        let sent = transport.sent_messages();
        assert!(matches!(&sent[0], Message::ProtocolInfo(info) if info.protocol == "biowire"));
    }

    #[test]
    fn server_keeps_bytes_after_client_info() {
        let transport = ScriptedTransport::new();
        transport.inject(&wire(&[
            Message::ClientInfo("Test client".to_string()),
            Message::Chat("early".to_string()),
        ]));
        let cancel = AtomicBool::new(false);

        let handshake = handshake_server(&transport, &quick_config("Monitor"), &cancel).unwrap();
        let mut assembler =
            FrameAssembler::with_buffered(FrameConfig::default(), handshake.leftover);
        let frames = assembler.try_extract().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, KindCode::Chat);
    }

    #[test]
    fn server_times_out_without_client_info() {
        let transport = ScriptedTransport::new();
        let cancel = AtomicBool::new(false);
        let config = SessionConfig {
            handshake_timeout: Duration::from_millis(50),
            ..SessionConfig::default()
        };

        let result = handshake_server(&transport, &config, &cancel);
        assert!(matches!(result, Err(SessionError::Timeout(_))));
    }

    #[test]
    fn server_rejects_wrong_kind() {
        let transport = ScriptedTransport::new();
        transport.inject(&wire(&[Message::Chat("hello".to_string())]));
        let cancel = AtomicBool::new(false);

        let result = handshake_server(&transport, &quick_config("Monitor"), &cancel);
        assert!(matches!(
            result,
            Err(SessionError::UnexpectedKind {
                expected: KindCode::ClientInfo,
                got: KindCode::Chat
            })
        ));
    }

    #[test]
    fn server_rejects_garbage() {
        let transport = ScriptedTransport::new();
        transport.inject(&[0xEE, 0, 0, 0, 0]);
        let cancel = AtomicBool::new(false);

        let result = handshake_server(&transport, &quick_config("Monitor"), &cancel);
        assert!(matches!(result, Err(SessionError::Frame(_))));
    }

    #[test]
    fn cancel_interrupts_wait() {
        let transport = ScriptedTransport::new();
        let cancel = Arc::new(AtomicBool::new(false));
        let config = SessionConfig {
            handshake_timeout: Duration::from_secs(10),
            ..SessionConfig::default()
        };

        let canceller = {
            let cancel = Arc::clone(&cancel);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                cancel.store(true, Ordering::SeqCst);
            })
        };

        let started = Instant::now();
        let result = handshake_server(&transport, &config, &cancel);
        canceller.join().unwrap();
        assert!(matches!(result, Err(SessionError::Stopped)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn client_completes_against_scripted_server() {
        let transport = ScriptedTransport::new();
        transport.inject(&wire(&[
            Message::ProtocolInfo(ProtocolInfo::default()),
            Message::ServerInfo("Monitor".to_string()),
        ]));
        let cancel = AtomicBool::new(false);

        let handshake = handshake_client(&transport, &quick_config("Sensor rig"), &cancel).unwrap();
        assert_eq!(handshake.peer_name, "Monitor");
        assert_eq!(handshake.protocol.unwrap().version, "1.0");
        assert_eq!(
            transport.sent_messages(),
            vec![Message::ClientInfo("Sensor rig".to_string())]
        );
    }

    #[test]
    fn client_rejects_foreign_protocol() {
        let transport = ScriptedTransport::new();
        let info = ProtocolInfo {
            protocol: "foobar".to_string(),
            ..ProtocolInfo::default()
        };
        transport.inject(&wire(&[Message::ProtocolInfo(info)]));
        let cancel = AtomicBool::new(false);

        let result = handshake_client(&transport, &quick_config("Sensor rig"), &cancel);
        assert!(matches!(result, Err(SessionError::HandshakeFailed(_))));
        assert!(transport.sent_messages().is_empty());
    }

    #[test]
    fn version_rule_requires_same_major() {
        assert!(is_version_compatible("1.0", "1.0").unwrap());
        assert!(is_version_compatible("1.2", "1.1").unwrap());
        assert!(!is_version_compatible("1.0", "1.1").unwrap());
        assert!(!is_version_compatible("1.0", "2.0").unwrap());
        assert!(parse_version("1").is_err());
        assert!(parse_version("1.x").is_err());
        assert!(parse_version("1.0.0").is_err());
    }
}
