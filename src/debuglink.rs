//! Separate debug-info files referenced through `.gnu_debuglink`.
//!
//! The section holds a file name, NUL-padded to a 4-byte boundary, followed
//! by the CRC-32 of the companion file in the image's byte order.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace};

use crate::formats::elf::utils::{align_up, read_cstring, EndianRead};
use crate::formats::elf::ElfData;
use crate::image::BinaryImage;

const CHECKSUM_CHUNK: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum DebugLinkError {
    #[error("failed to read {}: {source}", path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DebugLinkError>;

/// A debug-link reference: companion file name plus its expected CRC-32
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebugLinkInfo {
    pub file_name: String,
    pub crc: u32,
}

impl DebugLinkInfo {
    /// Parse `.gnu_debuglink` contents
    ///
    /// Returns `None` for an empty name or a missing checksum.
    pub fn parse(section: &[u8], endian: ElfData) -> Option<Self> {
        let file_name = read_cstring(section, 0).ok().filter(|n| !n.is_empty())?;
        let crc_offset = align_up(file_name.len() as u64 + 1, 4);
        let crc = section.read_u32(usize::try_from(crc_offset).ok()?, endian).ok()?;

        Some(Self {
            file_name: file_name.to_string(),
            crc,
        })
    }

    pub fn path(&self) -> &Path {
        Path::new(&self.file_name)
    }
}

/// Debug-link reference of an image, if it carries one
pub fn get_link_info(image: &BinaryImage) -> Option<DebugLinkInfo> {
    image.debug_link().cloned()
}

/// CRC-32 of a file's full contents, streamed in fixed-size chunks
pub fn compute_checksum(path: impl AsRef<Path>) -> Result<u32> {
    let path = path.as_ref();
    let io_failure = |source| DebugLinkError::IoFailure {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_failure)?;
    let mut reader = BufReader::with_capacity(CHECKSUM_CHUNK, file);
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; CHECKSUM_CHUNK];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_failure(err)),
        };
        hasher.update(&buf[..n]);
    }

    let crc = hasher.finalize();
    trace!(path = %path.display(), crc = format_args!("{:#010x}", crc), "Computed checksum");
    Ok(crc)
}

/// Whether `candidate` exists and its checksum equals `expected`
///
/// Unreadable candidates are rejected, not reported.
pub fn validate(candidate: impl AsRef<Path>, expected: u32) -> bool {
    let candidate = candidate.as_ref();
    match compute_checksum(candidate) {
        Ok(crc) if crc == expected => true,
        Ok(crc) => {
            debug!(
                path = %candidate.display(),
                expected = format_args!("{:#010x}", expected),
                found = format_args!("{:#010x}", crc),
                "Debug link candidate rejected: checksum mismatch"
            );
            false
        }
        Err(err) => {
            trace!(error = %err, "Debug link candidate unreadable");
            false
        }
    }
}

/// Conventional locations of the companion file, in search order
///
/// `<dir>/<name>`, `<dir>/.debug/<name>`, then for each debug directory
/// `<debug_dir>/<dir>/<name>` and `<debug_dir>/<name>`, where `<dir>` is the
/// image's directory. An absolute link name is used as is. The image itself
/// is never a candidate.
pub fn candidate_paths(
    image_path: &Path,
    link: &DebugLinkInfo,
    debug_dirs: &[PathBuf],
) -> Vec<PathBuf> {
    let name = link.path();
    if name.is_absolute() {
        return vec![name.to_path_buf()];
    }

    let dir = image_path.parent().unwrap_or_else(|| Path::new(""));
    let mut candidates = vec![dir.join(name), dir.join(".debug").join(name)];

    for debug_dir in debug_dirs {
        let relative_dir = dir.strip_prefix("/").unwrap_or(dir);
        candidates.push(debug_dir.join(relative_dir).join(name));
        candidates.push(debug_dir.join(name));
    }

    candidates.retain(|c| c != image_path);
    candidates.dedup();
    candidates
}

/// First candidate whose checksum matches the link
pub fn find_companion(
    image_path: &Path,
    link: &DebugLinkInfo,
    debug_dirs: &[PathBuf],
) -> Option<PathBuf> {
    candidate_paths(image_path, link, debug_dirs)
        .into_iter()
        .filter(|c| c.is_file())
        .find(|c| validate(c, link.crc))
}
