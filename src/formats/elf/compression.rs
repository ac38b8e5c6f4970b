//! Compressed section contents (`SHF_COMPRESSED`)
//!
//! A compressed section starts with an `Elf32_Chdr`/`Elf64_Chdr` header
//! followed by the compressed stream. Only zlib streams are inflated.

use std::borrow::Cow;
use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::formats::elf::types::*;
use crate::formats::elf::utils::EndianRead;

/// Largest inflated section accepted
pub const MAX_INFLATED_SIZE: u64 = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionHeader {
    pub ch_type: u32,
    pub ch_size: u64,
    pub ch_addralign: u64,
}

impl CompressionHeader {
    /// Parse the header at the start of `data`, returning it and its size
    pub fn parse(data: &[u8], class: ElfClass, endian: ElfData) -> Result<(Self, usize)> {
        match class {
            ElfClass::Elf32 => Ok((
                Self {
                    ch_type: data.read_u32(0, endian)?,
                    ch_size: u64::from(data.read_u32(4, endian)?),
                    ch_addralign: u64::from(data.read_u32(8, endian)?),
                },
                12,
            )),
            // Four reserved bytes follow `ch_type`.
            ElfClass::Elf64 => Ok((
                Self {
                    ch_type: data.read_u32(0, endian)?,
                    ch_size: data.read_u64(8, endian)?,
                    ch_addralign: data.read_u64(16, endian)?,
                },
                24,
            )),
        }
    }
}

/// Section contents, inflated when the section is compressed
///
/// Uncompressed sections are borrowed as is. The inflated size must match
/// the size the compression header declares.
pub fn section_contents<'a>(
    section: &Section<'a>,
    class: ElfClass,
    endian: ElfData,
) -> Result<Cow<'a, [u8]>> {
    if !section.is_compressed() {
        return Ok(Cow::Borrowed(section.data));
    }

    let (header, header_size) = CompressionHeader::parse(section.data, class, endian)?;
    if header.ch_type != ELFCOMPRESS_ZLIB {
        return Err(ElfError::UnsupportedCompression(header.ch_type));
    }
    if header.ch_size > MAX_INFLATED_SIZE {
        return Err(ElfError::Compression(format!(
            "{}: declared size {:#x} exceeds limit",
            section.name, header.ch_size
        )));
    }

    let stream = &section.data[header_size..];
    let capacity = header.ch_size.min(stream.len() as u64 * 8);
    let mut out = Vec::with_capacity(capacity as usize);
    ZlibDecoder::new(stream)
        .take(header.ch_size)
        .read_to_end(&mut out)
        .map_err(|e| ElfError::Compression(format!("{}: {}", section.name, e)))?;

    if out.len() as u64 != header.ch_size {
        return Err(ElfError::Compression(format!(
            "{}: inflated {:#x} bytes, header declares {:#x}",
            section.name,
            out.len(),
            header.ch_size
        )));
    }
    Ok(Cow::Owned(out))
}

/// Whether the contents of `section` can be read, compressed or not
pub fn is_readable(section: &Section<'_>, class: ElfClass, endian: ElfData) -> bool {
    if !section.is_compressed() {
        return true;
    }
    CompressionHeader::parse(section.data, class, endian)
        .is_ok_and(|(header, _)| header.ch_type == ELFCOMPRESS_ZLIB)
}
