//! Framed telemetry and chat protocol for biofeedback monitoring.
//!
//! biowire streams sensor readings, voice windows, chat text and settings
//! between a sensor-bearing client and a monitoring server over a single TCP
//! connection.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP byte-stream transport with a single-peer server
//! - [`frame`]: Kind-tagged length-prefixed framing and payload schemas
//! - [`session`]: Handshake, dispatch and send/receive loops (behind `session` feature)

/// Re-export transport types.
pub mod transport {
    pub use biowire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use biowire_frame::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use biowire_session::*;
}
