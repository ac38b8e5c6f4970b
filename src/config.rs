//! Configuration for capture and symbolization.
//!
//! Every section has sensible defaults so that a partial JSON document (or
//! none at all) yields a usable configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PerfcapError, Result};
use crate::io::IOLimits;

/// Master configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfcapConfig {
    /// Event buffering and batching.
    pub capture: CaptureConfig,
    /// Image loading and symbol resolution.
    pub symbols: SymbolConfig,
}

impl PerfcapConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values that would stall or disable the pipeline
    pub fn validate(&self) -> Result<()> {
        self.capture.validate()?;
        self.symbols.validate()
    }
}

/// What a producer experiences when the buffer is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the event and report `Overflow` immediately.
    #[default]
    Reject,
    /// Wait up to `push_timeout_ms` for space.
    Block,
}

/// Event buffering and batching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Events the buffer holds before producers see back-pressure (default: 65536).
    pub buffer_capacity: usize,
    /// Behaviour of a push into a full buffer (default: reject).
    pub overflow_policy: OverflowPolicy,
    /// Upper bound on a blocked push (default: 10ms).
    pub push_timeout_ms: u64,
    /// Flush once a batch holds this many events (default: 5000).
    pub max_batch_events: usize,
    /// Flush once a batch's approximate size reaches this many bytes (default: none).
    pub max_batch_bytes: Option<usize>,
    /// Flush once the oldest event in a batch is this old (default: 20ms).
    pub max_batch_latency_ms: u64,
    /// Longest the consumer waits before rechecking for shutdown (default: 10ms).
    pub idle_poll_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 65536,
            overflow_policy: OverflowPolicy::Reject,
            push_timeout_ms: 10,
            max_batch_events: 5000,
            max_batch_bytes: None,
            max_batch_latency_ms: 20,
            idle_poll_interval_ms: 10,
        }
    }
}

impl CaptureConfig {
    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    pub fn max_batch_latency(&self) -> Duration {
        Duration::from_millis(self.max_batch_latency_ms)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(PerfcapError::Config(
                "capture.buffer_capacity must be non-zero".into(),
            ));
        }
        if self.max_batch_events == 0 {
            return Err(PerfcapError::Config(
                "capture.max_batch_events must be non-zero".into(),
            ));
        }
        if self.max_batch_bytes == Some(0) {
            return Err(PerfcapError::Config(
                "capture.max_batch_bytes must be non-zero when set".into(),
            ));
        }
        if self.idle_poll_interval_ms == 0 {
            return Err(PerfcapError::Config(
                "capture.idle_poll_interval_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Image loading and symbol resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolConfig {
    /// Unloaded images kept for reuse, keyed by build id (default: 64).
    pub module_cache_capacity: usize,
    /// Roots searched for debug-link companions (default: /usr/lib/debug).
    pub debug_directories: Vec<PathBuf>,
    /// Largest image that will be opened (default: 4GB).
    pub max_image_size: u64,
    /// Report demangled symbol names (default: true).
    pub demangle: bool,
}

impl Default for SymbolConfig {
    fn default() -> Self {
        Self {
            module_cache_capacity: 64,
            debug_directories: vec![PathBuf::from("/usr/lib/debug")],
            max_image_size: IOLimits::default().max_file_size,
            demangle: true,
        }
    }
}

impl SymbolConfig {
    pub fn io_limits(&self) -> IOLimits {
        IOLimits {
            max_file_size: self.max_image_size,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_image_size == 0 {
            return Err(PerfcapError::Config(
                "symbols.max_image_size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
