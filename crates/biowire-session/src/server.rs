use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use biowire_frame::{SensorsData, Settings};
use biowire_transport::{PeerConnectedCallback, TcpServerTransport, Transport};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::dispatcher::{Dispatcher, PeerInfo, SessionEvents};
use crate::error::{Result, SessionError};
use crate::handshake::{handshake_server, send_server_info};
use crate::session::{lock, SessionCore, SessionState};

struct Status {
    state: SessionState,
    local_addr: Option<SocketAddr>,
}

struct ServerInner {
    core: SessionCore,
    /// Guards the transport for bind, the handshake and stop's teardown.
    transport: Mutex<Option<Arc<TcpServerTransport>>>,
    status: Mutex<Status>,
    stopping: AtomicBool,
}

impl ServerInner {
    fn set_state(&self, state: SessionState) {
        lock(&self.status).state = state;
    }

    /// Runs on the transport's acceptor thread for each new peer.
    fn on_peer_connected(&self) {
        let slot = lock(&self.transport);
        let Some(transport) = slot.as_ref().map(Arc::clone) else {
            return;
        };
        if self.stopping.load(Ordering::SeqCst) {
            transport.drop_peer();
            return;
        }

        let peer = transport.peer_addr();
        self.set_state(SessionState::Handshaking);
        match self.accept_peer(&transport) {
            Ok(()) => {}
            Err(SessionError::Timeout(timeout)) => {
                debug!(?peer, ?timeout, "client info not received; dropping peer");
                transport.drop_peer();
            }
            Err(err) => {
                warn!(?peer, error = %err, "handshake abandoned; dropping peer");
                transport.drop_peer();
            }
        }
        if !self.stopping.load(Ordering::SeqCst) {
            self.set_state(SessionState::Bound);
        }
    }

    fn accept_peer(&self, transport: &Arc<TcpServerTransport>) -> Result<()> {
        let config = &self.core.config;
        let handshake = handshake_server(transport.as_ref(), config, &self.stopping)?;

        let peer = PeerInfo {
            name: handshake.peer_name,
            addr: transport.peer_addr(),
        };
        info!(client = %peer.name, addr = ?peer.addr, "peer handshake complete");
        self.core.events.peer_connected(&peer);

        send_server_info(transport.as_ref(), config)?;
        if self.stopping.load(Ordering::SeqCst) {
            return Err(SessionError::Stopped);
        }
        let transport: Arc<dyn Transport> = transport.clone();
        self.core.activate(transport, handshake.leftover)
    }
}

/// Monitoring-side session: listens for a single client, performs the
/// handshake and runs the send and receive loops while a client is attached.
///
/// ```no_run
/// use std::sync::Arc;
/// use biowire_session::{Dispatcher, ServerSession, SessionConfig, SessionEvents};
///
/// let mut dispatcher = Dispatcher::new();
/// dispatcher.on_chat(|text| println!("chat: {text}"));
///
/// let server = ServerSession::new(
///     SessionConfig::named("Monitor"),
///     Arc::new(dispatcher),
///     SessionEvents::new(),
/// );
/// server.bind("0.0.0.0")?;
/// # Ok::<(), biowire_session::SessionError>(())
/// ```
pub struct ServerSession {
    inner: Arc<ServerInner>,
}

impl ServerSession {
    pub fn new(config: SessionConfig, dispatcher: Arc<Dispatcher>, events: SessionEvents) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                core: SessionCore::new(config, dispatcher, events),
                transport: Mutex::new(None),
                status: Mutex::new(Status {
                    state: SessionState::Unbound,
                    local_addr: None,
                }),
                stopping: AtomicBool::new(false),
            }),
        }
    }

    /// Listen on `host` at the configured port.
    pub fn bind(&self, host: &str) -> Result<()> {
        self.bind_with_port(host, self.inner.core.config.port)
    }

    /// Listen on `host:port`. Port `0` picks an ephemeral port.
    pub fn bind_with_port(&self, host: &str, port: u16) -> Result<()> {
        let mut slot = lock(&self.inner.transport);
        if slot.is_some() {
            return Err(SessionError::AlreadyBound);
        }
        self.inner.stopping.store(false, Ordering::SeqCst);

        let weak: Weak<ServerInner> = Arc::downgrade(&self.inner);
        let on_peer_connected: PeerConnectedCallback = Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_peer_connected();
            }
        });
        let transport = TcpServerTransport::start_listening(host, port, on_peer_connected)?;
        let local_addr = transport.local_addr();
        *slot = Some(Arc::new(transport));

        let mut status = lock(&self.inner.status);
        status.state = SessionState::Bound;
        status.local_addr = Some(local_addr);
        info!(%local_addr, name = %self.inner.core.config.display_name, "session bound");
        Ok(())
    }

    /// Address the session is listening on.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.inner.status).local_addr
    }

    pub fn state(&self) -> SessionState {
        let state = lock(&self.inner.status).state;
        if state == SessionState::Bound && self.inner.core.is_running() {
            SessionState::Active
        } else {
            state
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.core.config
    }

    /// Stop the loops, close the peer and the listener.
    ///
    /// Must not be called concurrently with itself. A loop that does not
    /// finish within the join timeout is detached. A no-op when the session
    /// is not bound.
    pub fn stop(&self) {
        if matches!(
            lock(&self.inner.status).state,
            SessionState::Unbound | SessionState::Stopped
        ) {
            return;
        }

        self.inner.stopping.store(true, Ordering::SeqCst);
        self.inner.core.deactivate();

        let transport = {
            let mut slot = lock(&self.inner.transport);
            let transport = slot.take();
            if let Some(transport) = &transport {
                transport.shutdown();
            }
            self.inner.core.clear_queue();
            let mut status = lock(&self.inner.status);
            status.state = SessionState::Stopped;
            status.local_addr = None;
            transport
        };

        // A handshake that finished while the transport lock was contended
        // may have started a second activation.
        self.inner.core.deactivate();
        if let Some(transport) = transport {
            transport.join();
        }
        info!("session stopped");
    }

    pub fn send_sensors_data(&self, data: SensorsData) -> bool {
        self.inner.core.send_sensors_data(data)
    }

    pub fn send_voice_window(&self, window: &[u8]) -> bool {
        self.inner.core.send_voice_window(window)
    }

    /// Queue a chat message. Missing or empty text is rejected.
    pub fn send_chat_message<'a>(&self, text: impl Into<Option<&'a str>>) -> bool {
        self.inner.core.send_chat_message(text.into())
    }

    pub fn send_settings(&self, settings: &Settings) -> bool {
        self.inner.core.send_settings(settings)
    }

    /// Frames queued but not yet taken by the send loop.
    pub fn pending(&self) -> usize {
        self.inner.core.pending()
    }

    /// Wait up to `timeout` for the outbound queue to drain.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.inner.core.flush(timeout)
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}
