//! Batching consumer of the capture buffer.
//!
//! The sender is a small state machine driven by the consumer thread:
//!
//! ```text
//! Idle --first event--> Accumulating{deadline} --threshold/deadline/finish--> Flushing --> Idle
//!                                                                               |
//!                                                                        sink error
//!                                                                               v
//!                                                                             Failed
//! ```
//!
//! The deadline is fixed when a batch receives its first event. A batch is
//! handed to the sink whole; a sink error is terminal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, trace};

use super::buffer::CaptureEventBuffer;
use super::{CaptureBatch, CaptureError, ClientCaptureEvent, Result};
use crate::config::CaptureConfig;
use crate::resolver::ModuleUpdates;

/// Failure reported by a transport sink
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SinkError {
    pub message: String,
}

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Destination of flushed batches
pub trait EventSink: Send {
    /// Deliver one batch; called once per flush, in batch order
    fn send_events(&mut self, batch: CaptureBatch) -> std::result::Result<(), SinkError>;
}

impl<F> EventSink for F
where
    F: FnMut(CaptureBatch) -> std::result::Result<(), SinkError> + Send,
{
    fn send_events(&mut self, batch: CaptureBatch) -> std::result::Result<(), SinkError> {
        self(batch)
    }
}

/// In-process sink forwarding batches over a channel
pub struct ChannelSink {
    tx: Sender<CaptureBatch>,
}

impl ChannelSink {
    pub fn new(tx: Sender<CaptureBatch>) -> Self {
        Self { tx }
    }

    pub fn unbounded() -> (Self, Receiver<CaptureBatch>) {
        let (tx, rx) = unbounded();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn send_events(&mut self, batch: CaptureBatch) -> std::result::Result<(), SinkError> {
        self.tx
            .send(batch)
            .map_err(|_| SinkError::new("batch receiver disconnected"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    Accumulating { deadline: Instant },
    Flushing,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    Count,
    Bytes,
    Deadline,
    Final,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderStats {
    pub events_sent: u64,
    pub batches_sent: u64,
    pub count_flushes: u64,
    pub byte_flushes: u64,
    pub deadline_flushes: u64,
    pub final_flushes: u64,
}

impl SenderStats {
    fn record(&mut self, reason: FlushReason, events: usize) {
        self.events_sent += events as u64;
        self.batches_sent += 1;
        match reason {
            FlushReason::Count => self.count_flushes += 1,
            FlushReason::Bytes => self.byte_flushes += 1,
            FlushReason::Deadline => self.deadline_flushes += 1,
            FlushReason::Final => self.final_flushes += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BatchPolicy {
    max_events: usize,
    max_bytes: Option<usize>,
    max_latency: Duration,
    idle_poll: Duration,
}

pub struct CaptureEventSender<S: EventSink> {
    buffer: Arc<CaptureEventBuffer>,
    sink: S,
    policy: BatchPolicy,
    state: SenderState,
    batch: Vec<ClientCaptureEvent>,
    batch_bytes: usize,
    next_sequence: u64,
    stats: SenderStats,
    module_updates: Option<ModuleUpdates>,
}

impl<S: EventSink> CaptureEventSender<S> {
    pub fn new(buffer: Arc<CaptureEventBuffer>, sink: S, config: &CaptureConfig) -> Self {
        let policy = BatchPolicy {
            max_events: config.max_batch_events.max(1),
            max_bytes: config.max_batch_bytes,
            max_latency: config.max_batch_latency(),
            idle_poll: config.idle_poll_interval(),
        };
        Self {
            buffer,
            sink,
            policy,
            state: SenderState::Idle,
            batch: Vec::with_capacity(policy.max_events.min(4096)),
            batch_bytes: 0,
            next_sequence: 0,
            stats: SenderStats::default(),
            module_updates: None,
        }
    }

    /// Forward module load/unload events to `updates` as they pass through
    pub fn with_module_updates(mut self, updates: ModuleUpdates) -> Self {
        self.module_updates = Some(updates);
        self
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    /// Events in the open batch
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    /// Move everything currently buffered into batches and flush any batch
    /// that reached a threshold or its deadline. Never waits.
    ///
    /// Returns the number of batches emitted.
    pub fn poll(&mut self, now: Instant) -> Result<usize> {
        self.ensure_usable()?;
        let mut flushed = 0;

        // Bounded by what is buffered now so a busy producer cannot pin the consumer here.
        let mut budget = self.buffer.len();
        while budget > 0 {
            let events = self.buffer.drain(budget.min(self.policy.max_events));
            if events.is_empty() {
                break;
            }
            budget = budget.saturating_sub(events.len());
            for event in events {
                flushed += self.accept(event, now)?;
            }
        }

        if let SenderState::Accumulating { deadline } = self.state {
            if now >= deadline {
                self.flush(FlushReason::Deadline)?;
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Wait for the next event, the open batch's deadline or one idle poll
    /// interval, whichever comes first, then poll
    pub fn step(&mut self) -> Result<usize> {
        self.ensure_usable()?;
        let idle_wake = deadline_after(Instant::now(), self.policy.idle_poll);
        let wake_at = match self.state {
            SenderState::Accumulating { deadline } => deadline.min(idle_wake),
            _ => idle_wake,
        };

        let mut flushed = 0;
        if let Some(event) = self.buffer.wait_for_event(wake_at) {
            flushed += self.accept(event, Instant::now())?;
        }
        Ok(flushed + self.poll(Instant::now())?)
    }

    /// Close the buffer, drain what remains and emit the final partial batch
    pub fn finish(&mut self) -> Result<SenderStats> {
        self.ensure_usable()?;
        self.buffer.close();

        loop {
            // Checked before draining so a push that completes after this
            // point is still collected by the drain below.
            let quiescent = self.buffer.is_quiescent();
            let now = Instant::now();
            let mut drained = false;
            loop {
                let events = self.buffer.drain(self.policy.max_events);
                if events.is_empty() {
                    break;
                }
                drained = true;
                for event in events {
                    self.accept(event, now)?;
                }
            }
            if quiescent && !drained {
                break;
            }
            std::thread::yield_now();
        }

        if !self.batch.is_empty() {
            self.flush(FlushReason::Final)?;
        }
        debug!(
            events = self.stats.events_sent,
            batches = self.stats.batches_sent,
            "Capture sender finished"
        );
        Ok(self.stats)
    }

    fn ensure_usable(&self) -> Result<()> {
        match self.state {
            SenderState::Failed => Err(CaptureError::SenderFailed),
            _ => Ok(()),
        }
    }

    /// Add one event to the open batch, flushing if it reaches a threshold
    fn accept(&mut self, event: ClientCaptureEvent, now: Instant) -> Result<usize> {
        if let (Some(updates), ClientCaptureEvent::ModuleUpdate(update)) =
            (&self.module_updates, &event)
        {
            updates.submit(update);
        }

        if self.state == SenderState::Idle {
            self.state = SenderState::Accumulating {
                deadline: deadline_after(now, self.policy.max_latency),
            };
        }
        self.batch_bytes += event.approximate_size();
        self.batch.push(event);

        if self.batch.len() >= self.policy.max_events {
            self.flush(FlushReason::Count)?;
            return Ok(1);
        }
        if self.policy.max_bytes.is_some_and(|max| self.batch_bytes >= max) {
            self.flush(FlushReason::Bytes)?;
            return Ok(1);
        }
        Ok(0)
    }

    fn flush(&mut self, reason: FlushReason) -> Result<()> {
        self.state = SenderState::Flushing;
        let batch = CaptureBatch {
            sequence: self.next_sequence,
            events: std::mem::take(&mut self.batch),
        };
        let events = batch.len();
        let bytes = std::mem::take(&mut self.batch_bytes);

        match self.sink.send_events(batch) {
            Ok(()) => {
                trace!(sequence = self.next_sequence, events, bytes, ?reason, "Flushed batch");
                self.next_sequence += 1;
                self.stats.record(reason, events);
                self.state = SenderState::Idle;
                Ok(())
            }
            Err(err) => {
                error!(sequence = self.next_sequence, events, error = %err, "Transport sink failed");
                self.state = SenderState::Failed;
                Err(CaptureError::SinkFailed(err))
            }
        }
    }
}

fn deadline_after(now: Instant, wait: Duration) -> Instant {
    now.checked_add(wait)
        .unwrap_or_else(|| now + Duration::from_secs(3600))
}
