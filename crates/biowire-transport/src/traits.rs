use std::time::Duration;

use crate::error::Result;

/// A bidirectional byte stream to a single peer.
///
/// This is the seam the protocol layer is built on. Implementations take
/// `&self` everywhere because the send and receive loops drive the same
/// transport concurrently from two threads; internal state must be
/// synchronized by the implementation.
pub trait Transport: Send + Sync {
    /// Write all of `data` to the peer.
    ///
    /// Returns the number of bytes sent, which equals `data.len()` on success.
    /// Fails immediately when no peer is attached.
    fn send(&self, data: &[u8]) -> Result<usize>;

    /// Like [`send`](Transport::send), but only to the peer attached at
    /// `generation`. A different or absent peer yields `NotConnected`.
    fn send_on(&self, generation: u64, data: &[u8]) -> Result<usize>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout`.
    ///
    /// Returns `Ok(0)` when the wait expires without data. A peer that closes
    /// its end is reported as an error and flips [`is_peer_connected`] to false.
    ///
    /// [`is_peer_connected`]: Transport::is_peer_connected
    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Like [`receive`](Transport::receive), but only from the peer attached
    /// at `generation`.
    fn receive_on(&self, generation: u64, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Whether the transport is open.
    ///
    /// For a server this means the listener is up; for a client, that
    /// [`shutdown`](Transport::shutdown) has not been called yet.
    fn is_listening(&self) -> bool;

    /// Whether a peer is currently attached.
    fn is_peer_connected(&self) -> bool;

    /// Identifier of the attached peer connection. Each newly attached peer
    /// gets a different value; `None` while no peer is attached.
    fn peer_generation(&self) -> Option<u64>;

    /// Drop the current peer connection, if any, without closing the listener.
    fn drop_peer(&self);

    /// Drop the peer only if it is still the one attached at `generation`.
    fn drop_peer_on(&self, generation: u64);

    /// Close the peer connection and stop listening.
    fn shutdown(&self);
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send(&self, data: &[u8]) -> Result<usize> {
        (**self).send(data)
    }

    fn send_on(&self, generation: u64, data: &[u8]) -> Result<usize> {
        (**self).send_on(generation, data)
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).receive(buf, timeout)
    }

    fn receive_on(&self, generation: u64, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).receive_on(generation, buf, timeout)
    }

    fn is_listening(&self) -> bool {
        (**self).is_listening()
    }

    fn is_peer_connected(&self) -> bool {
        (**self).is_peer_connected()
    }

    fn peer_generation(&self) -> Option<u64> {
        (**self).peer_generation()
    }

    fn drop_peer(&self) {
        (**self).drop_peer()
    }

    fn drop_peer_on(&self, generation: u64) {
        (**self).drop_peer_on(generation)
    }

    fn shutdown(&self) {
        (**self).shutdown()
    }
}
