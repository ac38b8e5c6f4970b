//! Crate-level error type.
//!
//! Each module reports its own error enum; `PerfcapError` wraps them for
//! callers that drive several modules at once.

use thiserror::Error;

use crate::capture::CaptureError;
use crate::debuglink::DebugLinkError;
use crate::formats::elf::ElfError;
use crate::image::ImageError;
use crate::io::error::IoError;
use crate::resolver::ResolverError;
use crate::symbols::SymbolError;

#[derive(Debug, Error)]
pub enum PerfcapError {
    #[error(transparent)]
    Elf(#[from] ElfError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("Symbol resolution failed: {0}")]
    Symbol(#[from] SymbolError),

    #[error(transparent)]
    DebugLink(#[from] DebugLinkError),

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error("Capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    FileIo(#[from] IoError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PerfcapError>;
