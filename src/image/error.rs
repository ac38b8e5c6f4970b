//! Errors raised while opening an image.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::formats::elf::ElfError;
use crate::io::error::IoError;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("{}: not an executable image", path.display())]
    NotAnExecutable { path: PathBuf },

    #[error("{}: truncated image: {source}", path.display())]
    Truncated {
        path: PathBuf,
        #[source]
        source: ElfError,
    },

    #[error("{}: unsupported format: {reason}", path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },

    #[error("{}: {source}", path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: IoError,
    },
}

impl ImageError {
    /// Classify a structural ELF error for the image at `path`
    pub fn from_elf(path: &Path, err: ElfError) -> Self {
        let path = path.to_path_buf();
        match err {
            ElfError::InvalidMagic => Self::NotAnExecutable { path },
            err if err.is_truncation() => Self::Truncated { path, source: err },
            err => Self::UnsupportedFormat {
                path,
                reason: err.to_string(),
            },
        }
    }

    /// Path of the image the error refers to
    pub fn path(&self) -> &Path {
        match self {
            Self::NotAnExecutable { path }
            | Self::Truncated { path, .. }
            | Self::UnsupportedFormat { path, .. }
            | Self::IoFailure { path, .. } => path,
        }
    }
}

pub type Result<T> = std::result::Result<T, ImageError>;
