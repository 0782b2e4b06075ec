use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::error::{Result, TransportError};
use crate::traits::Transport;

/// Well-known protocol port.
pub const PROTOCOL_PORT: u16 = 11000;

/// How often the acceptor thread re-checks the listening flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Smallest read timeout handed to the socket; a zero timeout is rejected by the OS API.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Upper bound on a single blocking write to a stalled peer.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Notification fired on the acceptor thread each time a peer is attached.
pub type PeerConnectedCallback = Arc<dyn Fn() + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn resolve(host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>> {
    Ok((host, port).to_socket_addrs()?.collect())
}

/// One attached peer. The reader and writer are clones of the same socket so
/// the two loops never contend for a single lock; `control` is a third clone
/// used to shut the socket down while either side is mid-call.
struct Connection {
    reader: Mutex<TcpStream>,
    writer: Mutex<TcpStream>,
    control: TcpStream,
    addr: SocketAddr,
    generation: u64,
}

impl Connection {
    fn new(stream: TcpStream, addr: SocketAddr) -> Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        let reader = stream.try_clone()?;
        let control = stream.try_clone()?;
        Ok(Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(stream),
            control,
            addr,
            generation: 0,
        })
    }

    fn close(&self) {
        let _ = self.control.shutdown(Shutdown::Both);
    }
}

/// The peer slot shared by the server and client transports.
///
/// Every attached connection gets a fresh generation number so callers can
/// tell a reconnected peer from the one they started with.
#[derive(Default)]
struct Link {
    peer: Mutex<Option<Arc<Connection>>>,
    attached: AtomicU64,
}

impl Link {
    fn attach(&self, mut connection: Connection) {
        let mut peer = lock(&self.peer);
        connection.generation = self.attached.fetch_add(1, Ordering::SeqCst) + 1;
        *peer = Some(Arc::new(connection));
    }

    /// The current connection, if it belongs to `generation` (any when `None`).
    fn current(&self, generation: Option<u64>) -> Result<Arc<Connection>> {
        lock(&self.peer)
            .as_ref()
            .filter(|c| generation.is_none_or(|g| c.generation == g))
            .cloned()
            .ok_or(TransportError::NotConnected)
    }

    fn generation(&self) -> Option<u64> {
        lock(&self.peer).as_ref().map(|c| c.generation)
    }

    fn is_connected(&self) -> bool {
        lock(&self.peer).is_some()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        lock(&self.peer).as_ref().map(|c| c.addr)
    }

    /// Detach the peer if it is still the one attached at `generation`.
    fn detach(&self, generation: u64) {
        let mut peer = lock(&self.peer);
        if let Some(connection) = peer.as_ref().filter(|c| c.generation == generation) {
            debug!(peer = %connection.addr, generation, "peer detached");
            connection.close();
            *peer = None;
        }
    }

    fn detach_any(&self) {
        if let Some(connection) = lock(&self.peer).take() {
            debug!(peer = %connection.addr, "dropping peer");
            connection.close();
        }
    }

    fn send(&self, generation: Option<u64>, data: &[u8]) -> Result<usize> {
        let connection = self.current(generation)?;
        let result = lock(&connection.writer).write_all(data);
        match result {
            Ok(()) => {
                trace!(size = data.len(), "sent bytes");
                Ok(data.len())
            }
            Err(err) => {
                self.detach(connection.generation);
                Err(TransportError::Io(err))
            }
        }
    }

    fn receive(
        &self,
        generation: Option<u64>,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize> {
        let connection = self.current(generation)?;
        let result = {
            let mut reader = lock(&connection.reader);
            reader.set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))?;
            reader.read(buf)
        };

        match result {
            Ok(0) if !buf.is_empty() => {
                self.detach(connection.generation);
                Err(TransportError::NotConnected)
            }
            Ok(n) => Ok(n),
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(err) => {
                self.detach(connection.generation);
                Err(TransportError::Io(err))
            }
        }
    }
}

struct ServerShared {
    listening: AtomicBool,
    link: Link,
}

/// Listening TCP transport serving a single peer at a time.
///
/// A background acceptor thread owns the listener. When a connection arrives
/// while no peer is attached it becomes the peer and the peer-connected
/// callback runs on the acceptor thread; connections arriving while a peer is
/// attached are closed immediately.
pub struct TcpServerTransport {
    shared: Arc<ServerShared>,
    local_addr: SocketAddr,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl TcpServerTransport {
    /// Bind `host:port` and start accepting peers.
    ///
    /// Port `0` picks an ephemeral port; see [`local_addr`](Self::local_addr).
    pub fn start_listening(
        host: &str,
        port: u16,
        on_peer_connected: PeerConnectedCallback,
    ) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let candidates = resolve(host, port).map_err(|source| TransportError::Bind {
            addr: addr.clone(),
            source,
        })?;
        if candidates.is_empty() {
            return Err(TransportError::Unresolved(addr));
        }

        let listener =
            TcpListener::bind(&candidates[..]).map_err(|source| TransportError::Bind {
                addr: addr.clone(),
                source,
            })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| TransportError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(ServerShared {
            listening: AtomicBool::new(true),
            link: Link::default(),
        });

        let acceptor = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("biowire-accept".to_string())
                .spawn(move || accept_loop(listener, shared, on_peer_connected))?
        };

        info!(%local_addr, "listening for peers");

        Ok(Self {
            shared,
            local_addr,
            acceptor: Mutex::new(Some(acceptor)),
        })
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address of the attached peer, if any.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.link.peer_addr()
    }

    /// Wait for the acceptor thread to exit after [`shutdown`](Transport::shutdown).
    ///
    /// A call from the acceptor thread itself returns without joining.
    pub fn join(&self) {
        let handle = lock(&self.acceptor).take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("acceptor thread panicked");
            }
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    shared: Arc<ServerShared>,
    on_peer_connected: PeerConnectedCallback,
) {
    while shared.listening.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                if shared.link.is_connected() {
                    debug!(peer = %addr, "peer already attached; closing new connection");
                    let _ = stream.shutdown(Shutdown::Both);
                    continue;
                }
                if let Err(err) = stream.set_nonblocking(false) {
                    warn!(peer = %addr, error = %err, "failed to configure peer stream");
                    continue;
                }
                match Connection::new(stream, addr) {
                    Ok(connection) => shared.link.attach(connection),
                    Err(err) => {
                        warn!(peer = %addr, error = %err, "failed to attach peer");
                        continue;
                    }
                }
                info!(peer = %addr, "peer connected");
                on_peer_connected();
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => {
                warn!(error = %err, "accept failed");
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
    debug!("acceptor exiting");
}

impl Transport for TcpServerTransport {
    fn send(&self, data: &[u8]) -> Result<usize> {
        if !self.is_listening() {
            return Err(TransportError::Shutdown);
        }
        self.shared.link.send(None, data)
    }

    fn send_on(&self, generation: u64, data: &[u8]) -> Result<usize> {
        if !self.is_listening() {
            return Err(TransportError::Shutdown);
        }
        self.shared.link.send(Some(generation), data)
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.is_listening() {
            return Err(TransportError::Shutdown);
        }
        self.shared.link.receive(None, buf, timeout)
    }

    fn receive_on(&self, generation: u64, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.is_listening() {
            return Err(TransportError::Shutdown);
        }
        self.shared.link.receive(Some(generation), buf, timeout)
    }

    fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::SeqCst)
    }

    fn is_peer_connected(&self) -> bool {
        self.shared.link.is_connected()
    }

    fn peer_generation(&self) -> Option<u64> {
        self.shared.link.generation()
    }

    fn drop_peer(&self) {
        self.shared.link.detach_any();
    }

    fn drop_peer_on(&self, generation: u64) {
        self.shared.link.detach(generation);
    }

    fn shutdown(&self) {
        if self.shared.listening.swap(false, Ordering::SeqCst) {
            info!(local_addr = %self.local_addr, "transport shutting down");
        }
        self.shared.link.detach_any();
    }
}

impl Drop for TcpServerTransport {
    fn drop(&mut self) {
        self.shutdown();
        self.join();
    }
}

impl std::fmt::Debug for TcpServerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServerTransport")
            .field("local_addr", &self.local_addr)
            .field("listening", &self.is_listening())
            .field("peer", &self.peer_addr())
            .finish()
    }
}

/// Connected TCP transport on the client side.
pub struct TcpClientTransport {
    open: AtomicBool,
    link: Link,
    peer_addr: SocketAddr,
}

impl TcpClientTransport {
    /// Connect to a server at `host:port`.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let candidates = resolve(host, port).map_err(|source| TransportError::Connect {
            addr: addr.clone(),
            source,
        })?;
        if candidates.is_empty() {
            return Err(TransportError::Unresolved(addr));
        }

        let stream =
            TcpStream::connect(&candidates[..]).map_err(|source| TransportError::Connect {
                addr: addr.clone(),
                source,
            })?;
        let peer_addr = stream.peer_addr()?;
        let link = Link::default();
        link.attach(Connection::new(stream, peer_addr)?);

        debug!(peer = %peer_addr, "connected to server");

        Ok(Self {
            open: AtomicBool::new(true),
            link,
            peer_addr,
        })
    }

    /// Address of the server.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Close the connection.
    pub fn disconnect(&self) {
        self.shutdown();
    }
}

impl Transport for TcpClientTransport {
    fn send(&self, data: &[u8]) -> Result<usize> {
        if !self.is_listening() {
            return Err(TransportError::Shutdown);
        }
        self.link.send(None, data)
    }

    fn send_on(&self, generation: u64, data: &[u8]) -> Result<usize> {
        if !self.is_listening() {
            return Err(TransportError::Shutdown);
        }
        self.link.send(Some(generation), data)
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.is_listening() {
            return Err(TransportError::Shutdown);
        }
        self.link.receive(None, buf, timeout)
    }

    fn receive_on(&self, generation: u64, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.is_listening() {
            return Err(TransportError::Shutdown);
        }
        self.link.receive(Some(generation), buf, timeout)
    }

    fn is_listening(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn is_peer_connected(&self) -> bool {
        self.link.is_connected()
    }

    fn peer_generation(&self) -> Option<u64> {
        self.link.generation()
    }

    fn drop_peer(&self) {
        self.link.detach_any();
    }

    fn drop_peer_on(&self, generation: u64) {
        self.link.detach(generation);
    }

    fn shutdown(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!(peer = %self.peer_addr, "disconnecting");
        }
        self.link.detach_any();
    }
}

impl Drop for TcpClientTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TcpClientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpClientTransport")
            .field("peer_addr", &self.peer_addr)
            .field("open", &self.is_listening())
            .field("connected", &self.is_peer_connected())
            .finish()
    }
}
