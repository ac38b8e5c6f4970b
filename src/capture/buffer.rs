//! Bounded many-producer, single-consumer event queue.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::{CaptureError, ClientCaptureEvent, Result};
use crate::config::{CaptureConfig, OverflowPolicy};

/// Drops are logged on the first occurrence and then once per this many.
const OVERFLOW_LOG_INTERVAL: u64 = 1024;

/// Counters maintained by the buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStats {
    pub accepted: u64,
    /// Dropped under the reject policy
    pub rejected: u64,
    /// Gave up waiting under the block policy
    pub timed_out: u64,
    /// Refused because the buffer was closed
    pub after_shutdown: u64,
}

/// Bounded FIFO of captured events
///
/// `push` may be called from any number of threads; `drain` and
/// `wait_for_event` belong to the single consumer. Events from one producer
/// come out in the order that producer pushed them.
pub struct CaptureEventBuffer {
    tx: Sender<ClientCaptureEvent>,
    rx: Receiver<ClientCaptureEvent>,
    capacity: usize,
    policy: OverflowPolicy,
    push_timeout: Duration,
    closed: AtomicBool,
    pushes_in_progress: AtomicUsize,
    accepted: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
    after_shutdown: AtomicU64,
}

impl CaptureEventBuffer {
    pub fn new(capacity: usize, policy: OverflowPolicy, push_timeout: Duration) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            policy,
            push_timeout,
            closed: AtomicBool::new(false),
            pushes_in_progress: AtomicUsize::new(0),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            after_shutdown: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(
            config.buffer_capacity,
            config.overflow_policy,
            config.push_timeout(),
        )
    }

    /// Enqueue an event
    ///
    /// Never waits longer than the configured push timeout. Fails with
    /// `Overflow` (reject policy) or `PushTimeout` (block policy) when the
    /// buffer stays full, and with `Shutdown` once the buffer is closed.
    pub fn push(&self, event: ClientCaptureEvent) -> Result<()> {
        // Registered before the closed check so `is_quiescent` cannot miss a
        // push that observed the buffer open.
        self.pushes_in_progress.fetch_add(1, Ordering::SeqCst);
        let result = self.push_inner(event);
        self.pushes_in_progress.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn push_inner(&self, event: ClientCaptureEvent) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            self.after_shutdown.fetch_add(1, Ordering::Relaxed);
            return Err(CaptureError::Shutdown);
        }

        let sent = match self.policy {
            OverflowPolicy::Reject => self.tx.try_send(event).map_err(|err| match err {
                TrySendError::Full(_) => self.record_drop(&self.rejected, "rejected"),
                TrySendError::Disconnected(_) => CaptureError::Shutdown,
            }),
            OverflowPolicy::Block => {
                self.tx
                    .send_timeout(event, self.push_timeout)
                    .map_err(|err| match err {
                        SendTimeoutError::Timeout(_) => {
                            self.record_drop(&self.timed_out, "timed out")
                        }
                        SendTimeoutError::Disconnected(_) => CaptureError::Shutdown,
                    })
            }
        };

        if sent.is_ok() {
            self.accepted.fetch_add(1, Ordering::Relaxed);
        }
        sent
    }

    fn record_drop(&self, counter: &AtomicU64, what: &'static str) -> CaptureError {
        let dropped = counter.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped == 1 || dropped % OVERFLOW_LOG_INTERVAL == 0 {
            warn!(
                dropped,
                capacity = self.capacity,
                policy = ?self.policy,
                "Capture buffer full, event {}",
                what
            );
        }
        match self.policy {
            OverflowPolicy::Reject => CaptureError::Overflow,
            OverflowPolicy::Block => CaptureError::PushTimeout,
        }
    }

    /// Remove up to `max` events in arrival order without waiting
    pub fn drain(&self, max: usize) -> Vec<ClientCaptureEvent> {
        let events: Vec<_> = self.rx.try_iter().take(max).collect();
        if !events.is_empty() {
            trace!(count = events.len(), remaining = self.rx.len(), "Drained events");
        }
        events
    }

    /// Wait until an event arrives or `deadline` passes
    pub fn wait_for_event(&self, deadline: Instant) -> Option<ClientCaptureEvent> {
        self.rx.recv_deadline(deadline).ok()
    }

    /// Refuse all further pushes
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            trace!(buffered = self.rx.len(), "Capture buffer closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closed, with no push still able to enqueue
    pub fn is_quiescent(&self) -> bool {
        self.is_closed() && self.pushes_in_progress.load(Ordering::SeqCst) == 0
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            after_shutdown: self.after_shutdown.load(Ordering::Relaxed),
        }
    }
}
