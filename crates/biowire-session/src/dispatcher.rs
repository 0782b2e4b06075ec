use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use biowire_frame::{KindCode, Message, ProtocolInfo, SensorsData, Settings};
use bytes::Bytes;
use tracing::trace;

use crate::error::SessionError;

type MessageHandler = Box<dyn Fn(&Message) + Send + Sync>;

/// Routes decoded messages to the handlers registered for their kind.
///
/// Handlers are registered up front through `&mut self`; once the dispatcher
/// is shared with a session behind an `Arc` the registrations are frozen.
/// Every handler for a kind runs synchronously, in registration order, on
/// the receive loop thread.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<KindCode, Vec<MessageHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for every message of `kind`.
    pub fn on<F>(&mut self, kind: KindCode, handler: F) -> &mut Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.handlers
            .entry(kind)
            .or_default()
            .push(Box::new(handler));
        self
    }

    pub fn on_chat<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on(KindCode::Chat, move |message| {
            if let Message::Chat(text) = message {
                handler(text);
            }
        })
    }

    pub fn on_sensors<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(SensorsData) + Send + Sync + 'static,
    {
        self.on(KindCode::Sensors, move |message| {
            if let Message::Sensors(data) = message {
                handler(*data);
            }
        })
    }

    pub fn on_voice<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&Bytes) + Send + Sync + 'static,
    {
        self.on(KindCode::Voice, move |message| {
            if let Message::Voice(window) = message {
                handler(window);
            }
        })
    }

    pub fn on_settings<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&Settings) + Send + Sync + 'static,
    {
        self.on(KindCode::Settings, move |message| {
            if let Message::Settings(settings) = message {
                handler(settings);
            }
        })
    }

    /// Handler for `ServerInfo` frames arriving after the handshake.
    pub fn on_server_info<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on(KindCode::ServerInfo, move |message| {
            if let Message::ServerInfo(name) = message {
                handler(name);
            }
        })
    }

    /// Handler for `ProtocolInfo` frames arriving after the handshake.
    pub fn on_protocol_info<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&ProtocolInfo) + Send + Sync + 'static,
    {
        self.on(KindCode::ProtocolInfo, move |message| {
            if let Message::ProtocolInfo(info) = message {
                handler(info);
            }
        })
    }

    /// Invoke every handler registered for the message's kind.
    ///
    /// Returns the number of handlers invoked; messages without a handler
    /// are dropped.
    pub fn dispatch(&self, message: &Message) -> usize {
        let kind = message.kind();
        let Some(handlers) = self.handlers.get(&kind) else {
            trace!(?kind, "no handler registered; dropping message");
            return 0;
        };
        for handler in handlers {
            handler(message);
        }
        handlers.len()
    }

    pub fn handler_count(&self, kind: KindCode) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self
            .handlers
            .iter()
            .map(|(kind, handlers)| (*kind, handlers.len()))
            .collect();
        kinds.sort();
        f.debug_struct("Dispatcher")
            .field("handlers", &kinds)
            .finish()
    }
}

/// Identity of the remote end, learned during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Display name announced by the peer.
    pub name: String,
    /// Remote socket address, when the transport knows it.
    pub addr: Option<SocketAddr>,
}

type PeerConnectedObserver = Box<dyn Fn(&PeerInfo) + Send + Sync>;
type DisconnectedObserver = Box<dyn Fn() + Send + Sync>;
type ErrorObserver = Box<dyn Fn(&SessionError) + Send + Sync>;

/// Lifecycle observers of a session.
///
/// `on_peer_connected` runs on the thread that completed the handshake;
/// `on_disconnected` and `on_error` run on the receive loop thread.
#[derive(Default)]
pub struct SessionEvents {
    peer_connected: Vec<PeerConnectedObserver>,
    disconnected: Vec<DisconnectedObserver>,
    error: Vec<ErrorObserver>,
}

impl SessionEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_peer_connected<F>(&mut self, observer: F) -> &mut Self
    where
        F: Fn(&PeerInfo) + Send + Sync + 'static,
    {
        self.peer_connected.push(Box::new(observer));
        self
    }

    pub fn on_disconnected<F>(&mut self, observer: F) -> &mut Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.disconnected.push(Box::new(observer));
        self
    }

    /// Observer for fatal receive-path errors.
    pub fn on_error<F>(&mut self, observer: F) -> &mut Self
    where
        F: Fn(&SessionError) + Send + Sync + 'static,
    {
        self.error.push(Box::new(observer));
        self
    }

    pub(crate) fn peer_connected(&self, peer: &PeerInfo) {
        for observer in &self.peer_connected {
            observer(peer);
        }
    }

    pub(crate) fn disconnected(&self) {
        for observer in &self.disconnected {
            observer();
        }
    }

    pub(crate) fn error(&self, err: &SessionError) {
        for observer in &self.error {
            observer(err);
        }
    }
}

impl fmt::Debug for SessionEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionEvents")
            .field("peer_connected", &self.peer_connected.len())
            .field("disconnected", &self.disconnected.len())
            .field("error", &self.error.len())
            .finish()
    }
}
