//! # Capture Module
//!
//! Moves captured events from instrumented threads to a transport sink.
//!
//! Producers push [`ClientCaptureEvent`]s into a bounded
//! [`CaptureEventBuffer`]; a single consumer drains it through a
//! [`CaptureEventSender`], which groups events into [`CaptureBatch`]es and
//! hands each batch to an [`EventSink`] exactly once. [`CaptureSession`] owns
//! the consumer thread and the start/stop lifecycle.
//!
//! ## Example
//!
//! ```no_run
//! use perfcap::capture::{CaptureSession, ChannelSink, ClientCaptureEvent, ThreadName};
//! use perfcap::config::CaptureConfig;
//!
//! let (sink, batches) = ChannelSink::unbounded();
//! let session = CaptureSession::start(&CaptureConfig::default(), sink, None)?;
//! session.push(ClientCaptureEvent::ThreadName(ThreadName {
//!     timestamp_ns: 1,
//!     pid: 42,
//!     tid: 42,
//!     name: "main".into(),
//! }))?;
//! let summary = session.stop()?;
//! assert_eq!(summary.sender.events_sent, batches.try_iter().map(|b| b.len() as u64).sum::<u64>());
//! # Ok::<(), perfcap::capture::CaptureError>(())
//! ```

pub mod buffer;
pub mod sender;
pub mod session;

pub use buffer::{BufferStats, CaptureEventBuffer};
pub use sender::{
    CaptureEventSender, ChannelSink, EventSink, FlushReason, SenderState, SenderStats, SinkError,
};
pub use session::{CaptureSession, EventProducer, SessionSummary};

use std::mem;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::config::OverflowPolicy;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture buffer is full")]
    Overflow,

    #[error("timed out waiting for capture buffer space")]
    PushTimeout,

    #[error("capture has been shut down")]
    Shutdown,

    #[error("transport sink failed: {0}")]
    SinkFailed(#[from] SinkError),

    #[error("sender stopped after an earlier sink failure")]
    SenderFailed,

    #[error("capture consumer thread panicked")]
    ConsumerPanicked,

    #[error("failed to start capture thread: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CaptureError>;

/// A sampled call stack, innermost frame first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallstackSample {
    pub timestamp_ns: u64,
    pub pid: u32,
    pub tid: u32,
    pub frames: Vec<u64>,
}

/// A span during which a thread ran on one core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingSlice {
    pub timestamp_ns: u64,
    pub pid: u32,
    pub tid: u32,
    pub core: u32,
    pub duration_ns: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadName {
    pub timestamp_ns: u64,
    pub pid: u32,
    pub tid: u32,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleChange {
    Loaded,
    Unloaded,
}

/// A module mapped into or out of the target process
///
/// `base` is the runtime address of the module's file offset 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleUpdate {
    pub timestamp_ns: u64,
    pub pid: u32,
    pub change: ModuleChange,
    pub path: PathBuf,
    pub base: u64,
    /// Lowercase hex build id, when the instrumentation layer knows it
    #[serde(default)]
    pub build_id: Option<String>,
}

/// Events produced by the instrumentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientCaptureEvent {
    CallstackSample(CallstackSample),
    SchedulingSlice(SchedulingSlice),
    ThreadName(ThreadName),
    ModuleUpdate(ModuleUpdate),
}

impl ClientCaptureEvent {
    pub fn timestamp_ns(&self) -> u64 {
        match self {
            Self::CallstackSample(e) => e.timestamp_ns,
            Self::SchedulingSlice(e) => e.timestamp_ns,
            Self::ThreadName(e) => e.timestamp_ns,
            Self::ModuleUpdate(e) => e.timestamp_ns,
        }
    }

    /// In-memory footprint including heap payload, used for the batch byte bound
    pub fn approximate_size(&self) -> usize {
        let heap = match self {
            Self::CallstackSample(e) => e.frames.len() * mem::size_of::<u64>(),
            Self::SchedulingSlice(_) => 0,
            Self::ThreadName(e) => e.name.len(),
            Self::ModuleUpdate(e) => {
                e.path.as_os_str().len() + e.build_id.as_ref().map_or(0, String::len)
            }
        };
        mem::size_of::<Self>() + heap
    }
}

/// Events flushed together, in the order they were accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureBatch {
    /// Position of this batch in the session, starting at 0
    pub sequence: u64,
    pub events: Vec<ClientCaptureEvent>,
}

impl CaptureBatch {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn approximate_size(&self) -> usize {
        self.events.iter().map(ClientCaptureEvent::approximate_size).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientCaptureEvent> {
        self.events.iter()
    }

    pub fn into_events(self) -> Vec<ClientCaptureEvent> {
        self.events
    }
}
