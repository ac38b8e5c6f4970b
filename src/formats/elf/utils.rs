//! Utility functions for ELF parsing
//!
//! Every offset-based read goes through these helpers. Offsets and sizes come
//! straight from the file and are never trusted: ranges are computed with
//! checked arithmetic and validated against the buffer before slicing.

use std::ops::Range;

use crate::formats::elf::types::{ElfClass, ElfData, ElfError, Result};

/// Trait for reading values with endianness support
pub trait EndianRead {
    fn read_u16(&self, offset: usize, data: ElfData) -> Result<u16>;
    fn read_u32(&self, offset: usize, data: ElfData) -> Result<u32>;
    fn read_u64(&self, offset: usize, data: ElfData) -> Result<u64>;
    fn read_i32(&self, offset: usize, data: ElfData) -> Result<i32>;
    fn read_i64(&self, offset: usize, data: ElfData) -> Result<i64>;
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N]> {
    offset
        .checked_add(N)
        .and_then(|end| bytes.get(offset..end))
        .and_then(|slice| slice.try_into().ok())
        .ok_or(ElfError::Truncated { offset, needed: N })
}

impl EndianRead for [u8] {
    fn read_u16(&self, offset: usize, data: ElfData) -> Result<u16> {
        let bytes = read_array::<2>(self, offset)?;
        Ok(match data {
            ElfData::Little => u16::from_le_bytes(bytes),
            ElfData::Big => u16::from_be_bytes(bytes),
        })
    }

    fn read_u32(&self, offset: usize, data: ElfData) -> Result<u32> {
        let bytes = read_array::<4>(self, offset)?;
        Ok(match data {
            ElfData::Little => u32::from_le_bytes(bytes),
            ElfData::Big => u32::from_be_bytes(bytes),
        })
    }

    fn read_u64(&self, offset: usize, data: ElfData) -> Result<u64> {
        let bytes = read_array::<8>(self, offset)?;
        Ok(match data {
            ElfData::Little => u64::from_le_bytes(bytes),
            ElfData::Big => u64::from_be_bytes(bytes),
        })
    }

    fn read_i32(&self, offset: usize, data: ElfData) -> Result<i32> {
        let bytes = read_array::<4>(self, offset)?;
        Ok(match data {
            ElfData::Little => i32::from_le_bytes(bytes),
            ElfData::Big => i32::from_be_bytes(bytes),
        })
    }

    fn read_i64(&self, offset: usize, data: ElfData) -> Result<i64> {
        let bytes = read_array::<8>(self, offset)?;
        Ok(match data {
            ElfData::Little => i64::from_le_bytes(bytes),
            ElfData::Big => i64::from_be_bytes(bytes),
        })
    }
}

/// Read an address-sized word based on ELF class
pub fn read_addr(data: &[u8], offset: usize, class: ElfClass, endian: ElfData) -> Result<u64> {
    match class {
        ElfClass::Elf32 => data.read_u32(offset, endian).map(u64::from),
        ElfClass::Elf64 => data.read_u64(offset, endian),
    }
}

/// Read a null-terminated string from data
pub fn read_cstring(data: &[u8], offset: usize) -> Result<&str> {
    let slice = data
        .get(offset..)
        .filter(|s| !s.is_empty())
        .ok_or(ElfError::InvalidOffset { offset })?;
    let end = memchr::memchr(0, slice).unwrap_or(slice.len());

    std::str::from_utf8(&slice[..end]).map_err(|_| ElfError::InvalidString)
}

/// Align a value up to the specified alignment
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 || alignment == 1 {
        value
    } else {
        value
            .checked_add(alignment - 1)
            .map(|v| v & !(alignment - 1))
            .unwrap_or(u64::MAX)
    }
}

/// Validate that `offset..offset + size` lies inside a buffer of `len` bytes.
///
/// `what` names the structure for diagnostics ("section header table", ...).
pub fn checked_range(what: &'static str, offset: u64, size: u64, len: usize) -> Result<Range<usize>> {
    let out_of_bounds = ElfError::OutOfBounds {
        what,
        offset,
        size,
        len,
    };
    let end = offset.checked_add(size).ok_or(out_of_bounds.clone())?;
    if end > len as u64 {
        return Err(out_of_bounds);
    }
    // Both fit in usize because end <= len.
    Ok(offset as usize..end as usize)
}

/// Validate a table of `count` entries of `entsize` bytes starting at `offset`.
pub fn checked_table(
    what: &'static str,
    offset: u64,
    count: u64,
    entsize: u64,
    len: usize,
) -> Result<Range<usize>> {
    let size = count.checked_mul(entsize).ok_or(ElfError::OutOfBounds {
        what,
        offset,
        size: u64::MAX,
        len,
    })?;
    checked_range(what, offset, size, len)
}
