use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use biowire_frame::{ProtocolInfo, SensorsData, Settings};
use biowire_transport::{TcpClientTransport, Transport};
use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::dispatcher::{Dispatcher, PeerInfo, SessionEvents};
use crate::error::{Result, SessionError};
use crate::handshake::handshake_client;
use crate::session::{lock, SessionCore, SessionState};

struct Connected {
    transport: Arc<TcpClientTransport>,
    peer: PeerInfo,
    protocol: Option<ProtocolInfo>,
}

/// Sensor-side session: connects to a monitoring server, completes the
/// handshake and runs the send and receive loops.
pub struct ClientSession {
    core: SessionCore,
    connected: Mutex<Option<Connected>>,
    ever_connected: AtomicBool,
}

impl ClientSession {
    pub fn new(config: SessionConfig, dispatcher: Arc<Dispatcher>, events: SessionEvents) -> Self {
        Self {
            core: SessionCore::new(config, dispatcher, events),
            connected: Mutex::new(None),
            ever_connected: AtomicBool::new(false),
        }
    }

    /// Connect to `host` at the configured port.
    pub fn connect(&self, host: &str) -> Result<PeerInfo> {
        self.connect_with_port(host, self.core.config.port)
    }

    /// Connect to `host:port` and complete the handshake.
    ///
    /// On failure the connection is closed and the session stays
    /// disconnected.
    pub fn connect_with_port(&self, host: &str, port: u16) -> Result<PeerInfo> {
        let mut slot = lock(&self.connected);
        if self.core.is_running() {
            return Err(SessionError::AlreadyBound);
        }
        if let Some(stale) = slot.take() {
            stale.transport.shutdown();
        }
        self.core.deactivate();

        let transport = Arc::new(TcpClientTransport::connect(host, port)?);
        let cancel = AtomicBool::new(false);
        let handshake = match handshake_client(transport.as_ref(), &self.core.config, &cancel) {
            Ok(handshake) => handshake,
            Err(err) => {
                warn!(host, port, error = %err, "handshake with server failed");
                transport.shutdown();
                return Err(err);
            }
        };

        let peer = PeerInfo {
            name: handshake.peer_name,
            addr: Some(transport.peer_addr()),
        };
        info!(server = %peer.name, addr = %transport.peer_addr(), "connected to server");
        self.core.events.peer_connected(&peer);

        let dyn_transport: Arc<dyn Transport> = transport.clone();
        if let Err(err) = self.core.activate(dyn_transport, handshake.leftover) {
            transport.shutdown();
            return Err(err);
        }

        self.ever_connected.store(true, Ordering::SeqCst);
        *slot = Some(Connected {
            transport,
            peer: peer.clone(),
            protocol: handshake.protocol,
        });
        Ok(peer)
    }

    /// The server this session last connected to.
    pub fn peer(&self) -> Option<PeerInfo> {
        lock(&self.connected).as_ref().map(|c| c.peer.clone())
    }

    /// The server's advertised capabilities.
    pub fn protocol(&self) -> Option<ProtocolInfo> {
        lock(&self.connected)
            .as_ref()
            .and_then(|c| c.protocol.clone())
    }

    pub fn state(&self) -> SessionState {
        if self.core.is_running() {
            SessionState::Active
        } else if self.ever_connected.load(Ordering::SeqCst) {
            SessionState::Stopped
        } else {
            SessionState::Unbound
        }
    }

    pub fn is_connected(&self) -> bool {
        self.core.is_running()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    /// Stop the loops and close the connection. A no-op when not connected.
    pub fn disconnect(&self) {
        let connected = lock(&self.connected).take();
        self.core.deactivate();
        self.core.clear_queue();
        if let Some(connected) = connected {
            connected.transport.disconnect();
            info!(server = %connected.peer.name, "disconnected");
        }
    }

    pub fn send_sensors_data(&self, data: SensorsData) -> bool {
        self.core.send_sensors_data(data)
    }

    pub fn send_voice_window(&self, window: &[u8]) -> bool {
        self.core.send_voice_window(window)
    }

    /// Queue a chat message. Missing or empty text is rejected.
    pub fn send_chat_message<'a>(&self, text: impl Into<Option<&'a str>>) -> bool {
        self.core.send_chat_message(text.into())
    }

    pub fn send_settings(&self, settings: &Settings) -> bool {
        self.core.send_settings(settings)
    }

    /// Frames queued but not yet taken by the send loop.
    pub fn pending(&self) -> usize {
        self.core.pending()
    }

    /// Wait up to `timeout` for the outbound queue to drain.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.core.flush(timeout)
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("state", &self.state())
            .field("peer", &self.peer())
            .finish()
    }
}
