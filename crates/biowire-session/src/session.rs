use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use biowire_frame::{Message, SensorsData, Settings};
use biowire_transport::Transport;
use bytes::{Bytes, BytesMut};
use tracing::{debug, info, trace};

use crate::config::SessionConfig;
use crate::dispatcher::{Dispatcher, SessionEvents};
use crate::error::{Result, SessionError};
use crate::queue::OutboundQueue;
use crate::worker::{
    run_receive_loop, run_send_loop, LoopContext, LoopHandle, RECV_THREAD, SEND_THREAD,
};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Never bound or connected.
    Unbound,
    /// Listening for a peer.
    Bound,
    /// Exchanging handshake frames with a peer.
    Handshaking,
    /// Send and receive loops running.
    Active,
    /// Stopped; may be bound or connected again.
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unbound => "unbound",
            SessionState::Bound => "bound",
            SessionState::Handshaking => "handshaking",
            SessionState::Active => "active",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct Activation {
    transport: Arc<dyn Transport>,
    send: LoopHandle,
    recv: LoopHandle,
}

impl Activation {
    fn is_running(&self) -> bool {
        !self.send.is_finished() && !self.recv.is_finished()
    }
}

/// State shared by server and client sessions: the outbound queue, the
/// handler registrations and the loops of the current activation.
pub(crate) struct SessionCore {
    pub(crate) config: SessionConfig,
    pub(crate) events: Arc<SessionEvents>,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<OutboundQueue>,
    activation: Mutex<Option<Activation>>,
}

impl SessionCore {
    pub(crate) fn new(
        config: SessionConfig,
        dispatcher: Arc<Dispatcher>,
        events: SessionEvents,
    ) -> Self {
        Self {
            config,
            events: Arc::new(events),
            dispatcher,
            queue: Arc::new(OutboundQueue::new()),
            activation: Mutex::new(None),
        }
    }

    /// Start the send and receive loops over `transport`.
    ///
    /// Loops left over from a previous peer are reaped first.
    pub(crate) fn activate(
        &self,
        transport: Arc<dyn Transport>,
        leftover: BytesMut,
    ) -> Result<()> {
        self.deactivate();
        self.queue.clear();

        let generation = transport
            .peer_generation()
            .ok_or_else(|| SessionError::Disconnected("no peer to activate".to_string()))?;
        let ctx = LoopContext {
            transport: Arc::clone(&transport),
            generation,
            peer_lost: Arc::new(AtomicBool::new(false)),
            queue: Arc::clone(&self.queue),
            dispatcher: Arc::clone(&self.dispatcher),
            events: Arc::clone(&self.events),
            config: self.config.clone(),
        };

        let send = {
            let ctx = ctx.clone();
            LoopHandle::spawn(SEND_THREAD, move |stop| run_send_loop(&ctx, stop))?
        };
        let recv = match LoopHandle::spawn(RECV_THREAD, move |stop| {
            run_receive_loop(&ctx, stop, leftover)
        }) {
            Ok(recv) => recv,
            Err(err) => {
                send.request_stop();
                self.queue.wake();
                send.join(self.config.join_timeout);
                return Err(err);
            }
        };

        *lock(&self.activation) = Some(Activation {
            transport,
            send,
            recv,
        });
        info!("session active");
        Ok(())
    }

    /// Stop both loops, waiting up to the join timeout for each.
    pub(crate) fn deactivate(&self) {
        let Some(activation) = lock(&self.activation).take() else {
            return;
        };

        activation.send.request_stop();
        activation.recv.request_stop();
        self.queue.wake();

        let timeout = self.config.join_timeout;
        let send = activation.send.join(timeout);
        let recv = activation.recv.join(timeout);
        debug!(?send, ?recv, "loops joined");
    }

    /// Whether both loops of the current activation are still running.
    pub(crate) fn is_running(&self) -> bool {
        lock(&self.activation)
            .as_ref()
            .is_some_and(Activation::is_running)
    }

    pub(crate) fn clear_queue(&self) {
        self.queue.clear();
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Wait until the send loop has taken every queued frame.
    pub(crate) fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.queue.is_empty() {
            if Instant::now() >= deadline || !self.is_running() {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }

    fn is_ready(&self) -> bool {
        lock(&self.activation).as_ref().is_some_and(|activation| {
            activation.is_running()
                && activation.transport.is_listening()
                && activation.transport.is_peer_connected()
        })
    }

    /// Encode `message` and queue it for the send loop.
    ///
    /// Returns `false` without queuing anything when the session is not
    /// active or the message cannot be encoded.
    pub(crate) fn enqueue(&self, message: Message) -> bool {
        let kind = message.kind();
        if !self.is_ready() {
            debug!(?kind, "send rejected: session not active");
            return false;
        }
        let wire: Bytes = match message
            .encode()
            .and_then(|frame| frame.to_wire(self.config.frame.max_payload_size))
        {
            Ok(wire) => wire,
            Err(err) => {
                debug!(?kind, error = %err, "send rejected");
                return false;
            }
        };
        trace!(?kind, size = wire.len(), "frame queued");
        self.queue.push(wire);
        true
    }

    pub(crate) fn send_sensors_data(&self, data: SensorsData) -> bool {
        self.enqueue(Message::Sensors(data))
    }

    pub(crate) fn send_voice_window(&self, window: &[u8]) -> bool {
        if window.is_empty() {
            return false;
        }
        self.enqueue(Message::Voice(Bytes::copy_from_slice(window)))
    }

    pub(crate) fn send_chat_message(&self, text: Option<&str>) -> bool {
        match text {
            Some(text) if !text.is_empty() => self.enqueue(Message::Chat(text.to_string())),
            _ => false,
        }
    }

    pub(crate) fn send_settings(&self, settings: &Settings) -> bool {
        self.enqueue(Message::Settings(settings.clone()))
    }
}
