use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use biowire_frame::{FrameAssembler, Message};
use biowire_transport::{Transport, TransportError};
use bytes::BytesMut;
use tracing::{debug, error, trace, warn};

use crate::config::SessionConfig;
use crate::dispatcher::{Dispatcher, SessionEvents};
use crate::error::{Result, SessionError};
use crate::queue::OutboundQueue;

pub(crate) const SEND_THREAD: &str = "biowire-send";
pub(crate) const RECV_THREAD: &str = "biowire-recv";

/// Floor for the send loop's queue wait so a zero interval cannot spin.
pub(crate) const MIN_SEND_POLL: Duration = Duration::from_millis(1);

/// Why a loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Its stop flag was raised.
    Stopped,
    /// The peer went away or the transport closed.
    Disconnected,
    /// Malformed input ended the receive path.
    Failed,
}

/// Everything a loop needs, shared between the two loops of one activation.
///
/// `generation` pins the loops to the peer connection they were started
/// for. Once that peer is gone, or the sibling loop has given up on it,
/// neither loop touches the transport again.
#[derive(Clone)]
pub(crate) struct LoopContext {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) generation: u64,
    pub(crate) peer_lost: Arc<AtomicBool>,
    pub(crate) queue: Arc<OutboundQueue>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) events: Arc<SessionEvents>,
    pub(crate) config: SessionConfig,
}

impl LoopContext {
    fn peer_is_current(&self) -> bool {
        !self.peer_lost.load(Ordering::SeqCst)
            && self.transport.is_listening()
            && self.transport.peer_generation() == Some(self.generation)
    }

    /// Flag the peer as gone and release a sibling blocked on the queue.
    fn lose_peer(&self) {
        self.peer_lost.store(true, Ordering::SeqCst);
        self.queue.wake();
    }
}

/// A running loop thread with its own stop flag and completion channel.
pub(crate) struct LoopHandle {
    name: &'static str,
    stop: Arc<AtomicBool>,
    done: mpsc::Receiver<LoopExit>,
    thread: Option<JoinHandle<()>>,
}

impl LoopHandle {
    pub(crate) fn spawn<F>(name: &'static str, body: F) -> Result<Self>
    where
        F: FnOnce(&AtomicBool) -> LoopExit + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, done) = mpsc::channel();
        let thread = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(name.to_string())
                .spawn(move || {
                    let exit = body(&stop);
                    debug!(thread = name, ?exit, "loop finished");
                    let _ = tx.send(exit);
                })
                .map_err(|source| SessionError::Spawn { name, source })?
        };
        Ok(Self {
            name,
            stop,
            done,
            thread: Some(thread),
        })
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait up to `timeout` for the completion announcement.
    ///
    /// A loop that misses the deadline is detached and `None` is returned.
    pub(crate) fn join(mut self, timeout: Duration) -> Option<LoopExit> {
        let exit = match self.done.recv_timeout(timeout) {
            Ok(exit) => Some(exit),
            Err(RecvTimeoutError::Timeout) => {
                warn!(thread = self.name, ?timeout, "loop did not stop in time; detaching");
                return None;
            }
            Err(RecvTimeoutError::Disconnected) => None,
        };
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(thread = self.name, "loop thread panicked");
            }
        }
        exit
    }
}

/// Drain the outbound queue onto the transport until stopped or disconnected.
pub(crate) fn run_send_loop(ctx: &LoopContext, stop: &AtomicBool) -> LoopExit {
    let poll = ctx.config.send_poll_interval.max(MIN_SEND_POLL);
    let exit = loop {
        if stop.load(Ordering::SeqCst) {
            break LoopExit::Stopped;
        }
        if !ctx.peer_is_current() {
            break LoopExit::Disconnected;
        }

        let Some(frame) = ctx.queue.pop_timeout(poll) else {
            continue;
        };
        match ctx.transport.send_on(ctx.generation, &frame) {
            Ok(sent) => trace!(size = sent, "frame sent"),
            Err(err) => {
                debug!(error = %err, "send failed; closing peer connection");
                ctx.transport.drop_peer_on(ctx.generation);
                break LoopExit::Disconnected;
            }
        }
    };

    if exit != LoopExit::Stopped {
        ctx.lose_peer();
    }
    exit
}

/// Read, reassemble, decode and dispatch frames until stopped or disconnected.
///
/// `leftover` seeds the assembler with bytes that arrived together with the
/// last handshake frame.
pub(crate) fn run_receive_loop(
    ctx: &LoopContext,
    stop: &AtomicBool,
    leftover: BytesMut,
) -> LoopExit {
    let mut assembler = FrameAssembler::with_buffered(ctx.config.frame.clone(), leftover);
    let mut chunk = vec![0u8; ctx.config.receive_chunk_size.max(1)];

    let exit = match deliver(ctx, &mut assembler) {
        Err(err) => fail(ctx, err),
        Ok(()) => loop {
            if stop.load(Ordering::SeqCst) {
                break LoopExit::Stopped;
            }
            if !ctx.peer_is_current() {
                break LoopExit::Disconnected;
            }

            match ctx
                .transport
                .receive_on(ctx.generation, &mut chunk, ctx.config.receive_timeout)
            {
                Ok(0) => continue,
                Ok(n) => {
                    assembler.feed(&chunk[..n]);
                    if let Err(err) = deliver(ctx, &mut assembler) {
                        break fail(ctx, err);
                    }
                }
                Err(_) if stop.load(Ordering::SeqCst) => break LoopExit::Stopped,
                Err(TransportError::NotConnected) => break LoopExit::Disconnected,
                Err(err) => {
                    debug!(error = %err, "receive failed");
                    break LoopExit::Disconnected;
                }
            }
        },
    };

    if exit != LoopExit::Stopped {
        ctx.lose_peer();
        ctx.events.disconnected();
    }
    exit
}

fn deliver(ctx: &LoopContext, assembler: &mut FrameAssembler) -> Result<()> {
    loop {
        let frames = assembler.try_extract()?;
        if frames.is_empty() {
            return Ok(());
        }
        for frame in frames {
            trace!(kind = ?frame.kind, size = frame.payload.len(), "frame received");
            let message = Message::decode(&frame)?;
            ctx.dispatcher.dispatch(&message);
        }
    }
}

fn fail(ctx: &LoopContext, err: SessionError) -> LoopExit {
    error!(error = %err, "malformed input from peer; closing connection");
    ctx.events.error(&err);
    ctx.transport.drop_peer_on(ctx.generation);
    LoopExit::Failed
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Instant;

    use biowire_frame::{encode_frame, KindCode};
    use bytes::Bytes;

    use super::*;
    use crate::testing::ScriptedTransport;

    struct Harness {
        transport: Arc<ScriptedTransport>,
        ctx: LoopContext,
        chats: Arc<Mutex<Vec<String>>>,
        errors: Arc<Mutex<Vec<String>>>,
        disconnects: Arc<Mutex<usize>>,
    }

    fn harness() -> Harness {
        let chats = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let disconnects = Arc::new(Mutex::new(0));

        let mut dispatcher = Dispatcher::new();
        {
            let chats = Arc::clone(&chats);
            dispatcher.on_chat(move |text| chats.lock().unwrap().push(text.to_string()));
        }
        let mut events = SessionEvents::new();
        {
            let errors = Arc::clone(&errors);
            events.on_error(move |err| errors.lock().unwrap().push(err.to_string()));
        }
        {
            let disconnects = Arc::clone(&disconnects);
            events.on_disconnected(move || *disconnects.lock().unwrap() += 1);
        }

        let transport = Arc::new(ScriptedTransport::new());
        let ctx = LoopContext {
            transport: transport.clone(),
            generation: transport.peer_generation().unwrap(),
            peer_lost: Arc::new(AtomicBool::new(false)),
            queue: Arc::new(OutboundQueue::new()),
            dispatcher: Arc::new(dispatcher),
            events: Arc::new(events),
            config: SessionConfig {
                receive_timeout: Duration::from_millis(10),
                send_poll_interval: Duration::from_millis(10),
                ..SessionConfig::default()
            },
        };
        Harness {
            transport,
            ctx,
            chats,
            errors,
            disconnects,
        }
    }

    fn chat_wire(texts: &[&str]) -> Vec<u8> {
        let mut out = BytesMut::new();
        for text in texts {
            encode_frame(KindCode::Chat, text.as_bytes(), &mut out).unwrap();
        }
        out.to_vec()
    }

    fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn send_loop_writes_in_enqueue_order() {
        let h = harness();
        for text in ["one", "two", "three"] {
            let frame = Message::Chat(text.to_string()).encode().unwrap();
            h.ctx.queue.push(frame.to_wire(usize::MAX).unwrap());
        }

        let ctx = h.ctx.clone();
        let handle = LoopHandle::spawn(SEND_THREAD, move |stop| run_send_loop(&ctx, stop)).unwrap();
        let sent = h.transport.wait_for_sent(3, Duration::from_secs(2));

        handle.request_stop();
        h.ctx.queue.wake();
        assert_eq!(handle.join(Duration::from_secs(2)), Some(LoopExit::Stopped));
        assert_eq!(
            sent,
            vec![
                Message::Chat("one".to_string()),
                Message::Chat("two".to_string()),
                Message::Chat("three".to_string()),
            ]
        );
    }

    #[test]
    fn send_loop_exits_when_peer_disconnects() {
        let h = harness();
        let ctx = h.ctx.clone();
        let handle = LoopHandle::spawn(SEND_THREAD, move |stop| run_send_loop(&ctx, stop)).unwrap();

        h.transport.disconnect();
        assert_eq!(
            handle.join(Duration::from_secs(2)),
            Some(LoopExit::Disconnected)
        );
    }

    #[test]
    fn send_loop_stops_when_peer_is_replaced() {
        let mut h = harness();
        h.ctx.config.send_poll_interval = Duration::from_millis(200);
        let ctx = h.ctx.clone();
        let handle = LoopHandle::spawn(SEND_THREAD, move |stop| run_send_loop(&ctx, stop)).unwrap();
        thread::sleep(Duration::from_millis(20));

        h.transport.disconnect();
        h.transport.reconnect();
        let frame = Message::Chat("stale".to_string()).encode().unwrap();
        h.ctx.queue.push(frame.to_wire(usize::MAX).unwrap());

        assert_eq!(
            handle.join(Duration::from_secs(2)),
            Some(LoopExit::Disconnected)
        );
        assert!(h.transport.sent_bytes().is_empty());
        assert!(h.transport.is_peer_connected());
    }

    #[test]
    fn receive_failure_releases_waiting_send_loop() {
        let mut h = harness();
        h.ctx.config.send_poll_interval = Duration::from_secs(30);
        let ctx = h.ctx.clone();
        let send = LoopHandle::spawn(SEND_THREAD, move |stop| run_send_loop(&ctx, stop)).unwrap();

        h.transport.inject(&[0x00, 0, 0, 0, 0]);
        let exit = run_receive_loop(&h.ctx, &AtomicBool::new(false), BytesMut::new());
        assert_eq!(exit, LoopExit::Failed);

        h.transport.reconnect();
        assert_eq!(
            send.join(Duration::from_secs(2)),
            Some(LoopExit::Disconnected)
        );
        assert!(h.transport.is_peer_connected());
    }

    #[test]
    fn zero_poll_interval_still_stops() {
        let mut h = harness();
        h.ctx.config.send_poll_interval = Duration::ZERO;
        let ctx = h.ctx.clone();
        let handle = LoopHandle::spawn(SEND_THREAD, move |stop| run_send_loop(&ctx, stop)).unwrap();

        let frame = Message::Chat("tick".to_string()).encode().unwrap();
        h.ctx.queue.push(frame.to_wire(usize::MAX).unwrap());
        assert_eq!(h.transport.wait_for_sent(1, Duration::from_secs(2)).len(), 1);

        handle.request_stop();
        assert_eq!(handle.join(Duration::from_secs(2)), Some(LoopExit::Stopped));
    }

    #[test]
    fn send_failure_drops_peer() {
        let h = harness();
        h.transport.fail_sends();
        h.ctx.queue.push(Bytes::from_static(&[6, 1, 0, 0, 0, b'x']));

        let exit = run_send_loop(&h.ctx, &AtomicBool::new(false));
        assert_eq!(exit, LoopExit::Disconnected);
        assert!(!h.transport.is_peer_connected());
    }

    #[test]
    fn receive_loop_dispatches_split_frames_in_order() {
        let h = harness();
        let ctx = h.ctx.clone();
        let handle = LoopHandle::spawn(RECV_THREAD, move |stop| {
            run_receive_loop(&ctx, stop, BytesMut::new())
        })
        .unwrap();

        let bytes = chat_wire(&["alpha", "beta", "gamma"]);
        for piece in bytes.chunks(4) {
            h.transport.inject(piece);
        }
        assert!(wait_until(Duration::from_secs(2), || h.chats.lock().unwrap().len() == 3));

        handle.request_stop();
        assert_eq!(handle.join(Duration::from_secs(2)), Some(LoopExit::Stopped));
        assert_eq!(*h.chats.lock().unwrap(), vec!["alpha", "beta", "gamma"]);
        assert_eq!(*h.disconnects.lock().unwrap(), 0);
    }

    #[test]
    fn receive_loop_delivers_leftover_first() {
        let h = harness();
        h.transport.inject(&chat_wire(&["second"]));
        let leftover = BytesMut::from(&chat_wire(&["first"])[..]);

        let ctx = h.ctx.clone();
        let handle =
            LoopHandle::spawn(RECV_THREAD, move |stop| run_receive_loop(&ctx, stop, leftover))
                .unwrap();
        assert!(wait_until(Duration::from_secs(2), || h.chats.lock().unwrap().len() == 2));

        handle.request_stop();
        handle.join(Duration::from_secs(2));
        assert_eq!(*h.chats.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn malformed_frame_is_fatal() {
        let h = harness();
        let mut bytes = chat_wire(&["before"]);
        bytes.extend_from_slice(&[0x00, 0, 0, 0, 0]);
        bytes.extend_from_slice(&chat_wire(&["after"]));
        h.transport.inject(&bytes);

        let exit = run_receive_loop(&h.ctx, &AtomicBool::new(false), BytesMut::new());

        assert_eq!(exit, LoopExit::Failed);
        assert_eq!(*h.chats.lock().unwrap(), vec!["before"]);
        assert_eq!(h.errors.lock().unwrap().len(), 1);
        assert!(h.errors.lock().unwrap()[0].contains("unknown frame kind"));
        assert!(!h.transport.is_peer_connected());
        assert_eq!(*h.disconnects.lock().unwrap(), 1);
    }

    #[test]
    fn undecodable_payload_is_fatal() {
        let h = harness();
        let mut bytes = BytesMut::new();
        encode_frame(KindCode::Sensors, &[0u8; 12], &mut bytes).unwrap();
        h.transport.inject(&bytes);

        let exit = run_receive_loop(&h.ctx, &AtomicBool::new(false), BytesMut::new());
        assert_eq!(exit, LoopExit::Failed);
        assert_eq!(h.errors.lock().unwrap().len(), 1);
    }

    #[test]
    fn receive_loop_reports_disconnect_once() {
        let h = harness();
        h.transport.disconnect();

        let exit = run_receive_loop(&h.ctx, &AtomicBool::new(false), BytesMut::new());
        assert_eq!(exit, LoopExit::Disconnected);
        assert_eq!(*h.disconnects.lock().unwrap(), 1);
        assert!(h.errors.lock().unwrap().is_empty());
    }

    #[test]
    fn wedged_loop_is_detached_after_timeout() {
        let handle = LoopHandle::spawn("biowire-test", |_stop| {
            thread::sleep(Duration::from_millis(300));
            LoopExit::Stopped
        })
        .unwrap();

        handle.request_stop();
        let started = Instant::now();
        assert_eq!(handle.join(Duration::from_millis(20)), None);
        assert!(started.elapsed() < Duration::from_millis(250));
    }
}
