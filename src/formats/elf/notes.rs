//! Note section parsing

use crate::formats::elf::types::*;
use crate::formats::elf::utils::{align_up, checked_range, EndianRead};

/// Notes from one `SHT_NOTE` section or `PT_NOTE` segment
pub struct NoteSection<'a> {
    notes: Vec<Note<'a>>,
}

/// Individual note entry
pub struct Note<'a> {
    pub n_type: u32,
    pub name: &'a str,
    pub desc: &'a [u8],
}

impl<'a> NoteSection<'a> {
    /// Parse note entries
    ///
    /// Stops at the first entry whose name or descriptor would run past the
    /// end of `data`; entries before it are kept.
    pub fn parse(data: &'a [u8], endian: ElfData) -> Result<Self> {
        let mut notes = Vec::new();
        let mut offset = 0usize;

        while data.len().saturating_sub(offset) >= 12 {
            let n_namesz = data.read_u32(offset, endian)?;
            let n_descsz = data.read_u32(offset + 4, endian)?;
            let n_type = data.read_u32(offset + 8, endian)?;
            offset += 12;

            let Ok(name_range) = checked_range("note name", offset as u64, n_namesz.into(), data.len())
            else {
                break;
            };
            let name_bytes = &data[name_range.clone()];
            let len = memchr::memchr(0, name_bytes).unwrap_or(name_bytes.len());
            let name = std::str::from_utf8(&name_bytes[..len]).unwrap_or("");

            let desc_start = align_up(name_range.end as u64, 4);
            let Ok(desc_range) = checked_range("note descriptor", desc_start, n_descsz.into(), data.len())
            else {
                break;
            };
            let desc = &data[desc_range.clone()];

            notes.push(Note { n_type, name, desc });

            let next = align_up(desc_range.end as u64, 4);
            if next >= data.len() as u64 {
                break;
            }
            offset = next as usize;
        }

        Ok(Self { notes })
    }

    /// GNU build ID descriptor, if present
    pub fn build_id(&self) -> Option<&'a [u8]> {
        self.notes
            .iter()
            .find(|n| n.name == "GNU" && n.n_type == NT_GNU_BUILD_ID && !n.desc.is_empty())
            .map(|n| n.desc)
    }

    /// Get all notes
    pub fn notes(&self) -> &[Note<'a>] {
        &self.notes
    }
}
