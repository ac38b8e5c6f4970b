//! Profiler capture core: executable parsing, symbolization and buffered
//! event delivery.
//!
//! Images are opened with [`image::BinaryImage`], symbolized through
//! [`symbols`] and [`resolver::ModuleResolver`], and captured events flow
//! through [`capture::CaptureSession`] to a transport sink.

/// Bounded file access
pub mod io;

/// Low-level binary format readers
pub mod formats;

/// Parsed executable images
pub mod image;

/// Symbol tables and DWARF line lookup
pub mod symbols;

/// Symbol name demangling
pub mod demangle;

/// Separate debug files referenced by debug links
pub mod debuglink;

/// Raw address to module, symbol and line
pub mod resolver;

/// Event buffering, batching and delivery
pub mod capture;

/// Serde-backed configuration
pub mod config;

/// Crate-level error type
pub mod error;

/// Tracing subscriber setup
pub mod logging;

pub use capture::{CaptureSession, ClientCaptureEvent};
pub use config::PerfcapConfig;
pub use error::{PerfcapError, Result};
pub use image::BinaryImage;
pub use resolver::{ModuleResolver, Resolution};
