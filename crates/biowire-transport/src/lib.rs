//! Byte-stream transport for biowire.
//!
//! The protocol layer only talks to the [`Transport`] trait: bounded-timeout
//! send/receive plus liveness queries and shutdown. [`TcpServerTransport`]
//! and [`TcpClientTransport`] implement it over `std::net` with a single-peer
//! model.
//!
//! This is the lowest layer of biowire. Everything else builds on top of it.

pub mod error;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use tcp::{PeerConnectedCallback, TcpClientTransport, TcpServerTransport, PROTOCOL_PORT};
pub use traits::Transport;
