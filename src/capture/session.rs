//! Capture session lifecycle: one buffer, one consumer thread, one sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::buffer::{BufferStats, CaptureEventBuffer};
use super::sender::{CaptureEventSender, EventSink, SenderStats};
use super::{CaptureError, ClientCaptureEvent, Result};
use crate::config::CaptureConfig;
use crate::resolver::{ModuleResolver, ModuleWorker};

/// Final accounting of a stopped session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub duration: Duration,
    pub buffer: BufferStats,
    pub sender: SenderStats,
}

/// Cloneable push handle for instrumented threads
#[derive(Clone)]
pub struct EventProducer {
    buffer: Arc<CaptureEventBuffer>,
}

impl EventProducer {
    pub fn push(&self, event: ClientCaptureEvent) -> Result<()> {
        self.buffer.push(event)
    }
}

/// A running capture
///
/// Dropping a session without calling [`CaptureSession::stop`] still flushes
/// and joins the consumer, discarding its result.
pub struct CaptureSession {
    id: Uuid,
    buffer: Arc<CaptureEventBuffer>,
    stop: Arc<AtomicBool>,
    consumer: Option<JoinHandle<Result<SenderStats>>>,
    modules: Option<ModuleWorker>,
    started: Instant,
}

impl CaptureSession {
    /// Start the consumer thread
    ///
    /// Module updates passing through the pipeline are applied to `resolver`
    /// when one is given, on a separate worker thread so batching is never
    /// held up by image loading.
    pub fn start<S>(
        config: &CaptureConfig,
        sink: S,
        resolver: Option<Arc<ModuleResolver>>,
    ) -> Result<Self>
    where
        S: EventSink + 'static,
    {
        let id = Uuid::new_v4();
        let buffer = Arc::new(CaptureEventBuffer::from_config(config));
        let stop = Arc::new(AtomicBool::new(false));

        let modules = resolver
            .map(ModuleWorker::spawn)
            .transpose()
            .map_err(CaptureError::Spawn)?;
        let mut sender = CaptureEventSender::new(Arc::clone(&buffer), sink, config);
        if let Some(updates) = modules.as_ref().and_then(ModuleWorker::updates) {
            sender = sender.with_module_updates(updates);
        }

        let consumer = {
            let stop = Arc::clone(&stop);
            let buffer = Arc::clone(&buffer);
            thread::Builder::new()
                .name(format!("capture-{}", &id.simple().to_string()[..8]))
                .spawn(move || run_consumer(sender, &buffer, &stop))
                .map_err(CaptureError::Spawn)?
        };

        info!(
            session = %id,
            capacity = config.buffer_capacity,
            policy = ?config.overflow_policy,
            max_batch_events = config.max_batch_events,
            max_batch_latency_ms = config.max_batch_latency_ms,
            "Capture session started"
        );

        Ok(Self {
            id,
            buffer,
            stop,
            consumer: Some(consumer),
            modules,
            started: Instant::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn push(&self, event: ClientCaptureEvent) -> Result<()> {
        self.buffer.push(event)
    }

    pub fn producer(&self) -> EventProducer {
        EventProducer {
            buffer: Arc::clone(&self.buffer),
        }
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    /// Flush what is buffered, stop the consumer and report
    ///
    /// Pushes made after this returns fail with `Shutdown`. Module updates
    /// already delivered are applied to the resolver before this returns. A
    /// sink failure during the session is returned here.
    pub fn stop(mut self) -> Result<SessionSummary> {
        let sender = self.join()?;
        let summary = SessionSummary {
            session_id: self.id,
            duration: self.started.elapsed(),
            buffer: self.buffer.stats(),
            sender,
        };
        info!(
            session = %self.id,
            duration_ms = summary.duration.as_millis() as u64,
            accepted = summary.buffer.accepted,
            rejected = summary.buffer.rejected,
            timed_out = summary.buffer.timed_out,
            events_sent = summary.sender.events_sent,
            batches_sent = summary.sender.batches_sent,
            "Capture session stopped"
        );
        Ok(summary)
    }

    fn join(&mut self) -> Result<SenderStats> {
        self.stop.store(true, Ordering::Release);
        let Some(consumer) = self.consumer.take() else {
            return Err(CaptureError::Shutdown);
        };
        let result = consumer.join().map_err(|_| CaptureError::ConsumerPanicked);
        // Whatever happened to the consumer, producers must not block on it.
        self.buffer.close();
        if let Some(modules) = self.modules.take() {
            let applied = modules.shutdown();
            debug!(session = %self.id, applied, "Module notices applied");
        }
        result?
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.consumer.is_some() {
            if let Err(err) = self.join() {
                warn!(session = %self.id, error = %err, "Capture session dropped with error");
            }
        }
    }
}

fn run_consumer<S: EventSink>(
    mut sender: CaptureEventSender<S>,
    buffer: &CaptureEventBuffer,
    stop: &AtomicBool,
) -> Result<SenderStats> {
    while !stop.load(Ordering::Acquire) {
        if let Err(err) = sender.step() {
            buffer.close();
            error!(error = %err, "Capture consumer stopped");
            return Err(err);
        }
    }
    sender.finish()
}
