//! Session layer for biowire.
//!
//! A session owns one transport, an outbound queue and a pair of worker
//! threads: the send loop drains the queue onto the transport, the receive
//! loop reassembles frames, decodes them and hands them to the
//! [`Dispatcher`]. [`ServerSession`] listens for a single client;
//! [`ClientSession`] connects to a server. Both perform the handshake before
//! the loops start.

mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod queue;
mod server;
mod session;
#[cfg(test)]
mod testing;
mod worker;

pub use client::ClientSession;
pub use config::{parse_duration, SessionConfig};
pub use dispatcher::{Dispatcher, PeerInfo, SessionEvents};
pub use error::{Result, SessionError};
pub use handshake::{handshake_client, handshake_server, send_server_info, Handshake};
pub use queue::OutboundQueue;
pub use server::ServerSession;
pub use session::SessionState;
pub use worker::LoopExit;
