//! Bounded, read-only access to image files.
//!
//! `FileBytes` is the backing store of a parsed image: either a read-only
//! memory map of a file on disk or a shared in-memory buffer handed over by
//! the caller. Opening a file enforces `IOLimits` before anything is mapped.

pub mod error;

use crate::io::error::{IoError, Result};
use bytes::Bytes;
use memmap2::Mmap;
use std::fs::File;
use std::ops::Deref;
use std::path::Path;
use tracing::{debug, warn};

/// Defines the resource limits for opening files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IOLimits {
    /// The absolute maximum file size that can be opened.
    pub max_file_size: u64,
}

impl Default for IOLimits {
    fn default() -> Self {
        Self {
            max_file_size: 4 * 1024 * 1024 * 1024, // 4GiB
        }
    }
}

/// Immutable file contents.
#[derive(Debug)]
pub enum FileBytes {
    /// Read-only mapping of a non-empty file.
    Mapped(Mmap),
    /// Bytes already in memory (including empty files).
    Shared(Bytes),
}

impl FileBytes {
    /// Opens and memory-maps a file, failing if it exceeds `limits.max_file_size`.
    pub fn open<P: AsRef<Path>>(path: P, limits: &IOLimits) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();

        debug!(
            path = %path.display(),
            size = file_size,
            limits.max_file_size = limits.max_file_size,
            "Opening file for mapping"
        );

        if file_size > limits.max_file_size {
            warn!(
                path = %path.display(),
                size = file_size,
                limit = limits.max_file_size,
                "File is too large"
            );
            return Err(IoError::FileTooLarge {
                limit: limits.max_file_size,
                found: file_size,
            });
        }

        // memmap cannot map empty files.
        if file_size == 0 {
            return Ok(Self::Shared(Bytes::new()));
        }

        // Safety: the map is read-only. Concurrent truncation of the file by
        // another process is outside what this reader can defend against.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self::Mapped(mmap))
    }

    /// Wraps bytes that are already in memory.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::Shared(bytes.into())
    }

    /// Whether the contents are a file mapping.
    pub fn is_mapped(&self) -> bool {
        matches!(self, Self::Mapped(_))
    }
}

impl Deref for FileBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => map,
            Self::Shared(bytes) => bytes,
        }
    }
}

impl AsRef<[u8]> for FileBytes {
    fn as_ref(&self) -> &[u8] {
        self
    }
}
