//! Bounded per-session event queue
//!
//! Sits between the broker pump and the delivery loop. Pushing never waits:
//! when the queue is full the oldest undelivered payload is evicted, so a slow
//! client only ever loses its own backlog and the broker is never stalled.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

struct QueueState {
    payloads: VecDeque<Vec<u8>>,
    closed: bool,
}

/// Single-consumer FIFO with drop-oldest overflow
pub struct EventQueue {
    /// Maximum number of payloads to retain
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
    /// Payloads evicted on overflow
    dropped: AtomicU64,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(QueueState {
                payloads: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a payload, returns false if the queue is closed
    pub fn push(&self, payload: Vec<u8>) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }

            while state.payloads.len() >= self.capacity {
                state.payloads.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }

            state.payloads.push_back(payload);
        }

        self.notify.notify_one();
        true
    }

    /// Stop accepting payloads; already queued ones can still be popped
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    /// Wait for the next payload
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Vec<u8>> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(payload) = state.payloads.pop_front() {
                    return Some(payload);
                }
                if state.closed {
                    return None;
                }
            }

            // A notify_one issued between the unlock above and this await is
            // kept as a permit, so no wakeup is lost.
            self.notify.notified().await;
        }
    }

    /// Payloads evicted so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Get current queue length
    pub fn len(&self) -> usize {
        self.state.lock().payloads.len()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.state.lock().payloads.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
