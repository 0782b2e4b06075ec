use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;

#[derive(Default)]
struct QueueState {
    items: VecDeque<Bytes>,
    woken: bool,
}

/// FIFO of encoded frames awaiting the send loop.
///
/// Any thread may [`push`](Self::push); only the send loop pops.
#[derive(Default)]
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append an encoded frame and wake the consumer.
    pub fn push(&self, frame: Bytes) {
        self.lock().items.push_back(frame);
        self.ready.notify_one();
    }

    /// Pop the oldest frame, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout or when [`wake`](Self::wake) was called.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Bytes> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(frame) = state.items.pop_front() {
                return Some(frame);
            }
            if state.woken {
                state.woken = false;
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .ready
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    /// Release a consumer blocked in [`pop_timeout`](Self::pop_timeout).
    pub fn wake(&self) {
        self.lock().woken = true;
        self.ready.notify_all();
    }

    /// Drop every pending frame.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.items.clear();
        state.woken = false;
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

impl std::fmt::Debug for OutboundQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundQueue")
            .field("pending", &self.len())
            .finish()
    }
}
