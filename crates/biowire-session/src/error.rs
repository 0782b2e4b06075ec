use std::time::Duration;

use biowire_frame::KindCode;

/// Errors that can occur in session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] biowire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] biowire_frame::FrameError),

    /// Handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The peer sent a frame of the wrong kind during the handshake.
    #[error("expected {expected} frame, got {got}")]
    UnexpectedKind { expected: KindCode, got: KindCode },

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// The session is already bound to a transport.
    #[error("session already bound")]
    AlreadyBound,

    /// The session was stopped while an operation was in progress.
    #[error("session stopped")]
    Stopped,

    /// A worker thread could not be spawned.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },

    /// Request timed out.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

pub type Result<T> = std::result::Result<T, SessionError>;
