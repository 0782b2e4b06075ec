//! In-memory transport for driving handshakes and loops in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use biowire_frame::{FrameAssembler, Message};
use biowire_transport::{Result, Transport, TransportError};

#[derive(Default)]
struct Wire {
    inbound: VecDeque<u8>,
    sent: Vec<u8>,
}

/// A transport whose inbound bytes are injected by the test and whose
/// outbound bytes are captured.
pub(crate) struct ScriptedTransport {
    wire: Mutex<Wire>,
    changed: Condvar,
    listening: AtomicBool,
    connected: AtomicBool,
    generation: AtomicU64,
    fail_sends: AtomicBool,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self {
            wire: Mutex::new(Wire::default()),
            changed: Condvar::new(),
            listening: AtomicBool::new(true),
            connected: AtomicBool::new(true),
            generation: AtomicU64::new(1),
            fail_sends: AtomicBool::new(false),
        }
    }

    pub(crate) fn inject(&self, bytes: &[u8]) {
        self.wire.lock().unwrap().inbound.extend(bytes);
        self.changed.notify_all();
    }

    /// Simulate the remote end closing the connection.
    pub(crate) fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.changed.notify_all();
    }

    /// Simulate a new peer taking the place of the old one.
    pub(crate) fn reconnect(&self) {
        self.wire.lock().unwrap().inbound.clear();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        self.changed.notify_all();
    }

    fn is_current(&self, generation: Option<u64>) -> bool {
        self.connected.load(Ordering::SeqCst)
            && generation.is_none_or(|g| g == self.generation.load(Ordering::SeqCst))
    }

    fn write(&self, generation: Option<u64>, data: &[u8]) -> Result<usize> {
        if !self.is_current(generation) {
            return Err(TransportError::NotConnected);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe).into());
        }
        self.wire.lock().unwrap().sent.extend_from_slice(data);
        self.changed.notify_all();
        Ok(data.len())
    }

    fn read(&self, generation: Option<u64>, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut wire = self.wire.lock().unwrap();
        loop {
            if !self.is_current(generation) && (generation.is_some() || wire.inbound.is_empty()) {
                return Err(TransportError::NotConnected);
            }
            if !wire.inbound.is_empty() {
                let n = buf.len().min(wire.inbound.len());
                for (slot, byte) in buf.iter_mut().zip(wire.inbound.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            wire = self.changed.wait_timeout(wire, deadline - now).unwrap().0;
        }
    }

    pub(crate) fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub(crate) fn sent_bytes(&self) -> Vec<u8> {
        self.wire.lock().unwrap().sent.clone()
    }

    pub(crate) fn sent_messages(&self) -> Vec<Message> {
        let mut assembler = FrameAssembler::new();
        assembler
            .push(&self.sent_bytes())
            .unwrap()
            .iter()
            .map(|frame| Message::decode(frame).unwrap())
            .collect()
    }

    /// Block until at least `count` messages were sent or `timeout` passes.
    pub(crate) fn wait_for_sent(&self, count: usize, timeout: Duration) -> Vec<Message> {
        let deadline = Instant::now() + timeout;
        loop {
            let messages = self.sent_messages();
            let now = Instant::now();
            if messages.len() >= count || now >= deadline {
                return messages;
            }
            let wire = self.wire.lock().unwrap();
            let _ = self.changed.wait_timeout(wire, deadline - now).unwrap();
        }
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, data: &[u8]) -> Result<usize> {
        self.write(None, data)
    }

    fn send_on(&self, generation: u64, data: &[u8]) -> Result<usize> {
        self.write(Some(generation), data)
    }

    fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.read(None, buf, timeout)
    }

    fn receive_on(&self, generation: u64, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.read(Some(generation), buf, timeout)
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn is_peer_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn peer_generation(&self) -> Option<u64> {
        self.is_peer_connected()
            .then(|| self.generation.load(Ordering::SeqCst))
    }

    fn drop_peer(&self) {
        self.disconnect();
    }

    fn drop_peer_on(&self, generation: u64) {
        if self.is_current(Some(generation)) {
            self.disconnect();
        }
    }

    fn shutdown(&self) {
        self.listening.store(false, Ordering::SeqCst);
        self.disconnect();
    }
}
