//! Section table management

use crate::formats::elf::compression;
use crate::formats::elf::types::*;
use crate::formats::elf::utils::{checked_range, checked_table, read_cstring, EndianRead};
use std::borrow::Cow;
use std::collections::HashMap;

/// Section table for efficient section lookup
pub struct SectionTable<'a> {
    headers: Vec<SectionHeader>,
    strings: &'a [u8],
    data: &'a [u8],
    by_name: HashMap<&'a str, usize>,
    class: ElfClass,
    endian: ElfData,
}

impl<'a> SectionTable<'a> {
    /// Parse section table from ELF data
    ///
    /// The table itself and the contents of every section that occupies file
    /// space must lie within `data`.
    pub fn parse(data: &'a [u8], header: &ElfHeader) -> Result<Self> {
        let sh_num = header.e_shnum as u64;

        if sh_num == 0 {
            return Ok(Self {
                headers: Vec::new(),
                strings: &[],
                data,
                by_name: HashMap::new(),
                class: header.ident.class,
                endian: header.ident.data,
            });
        }

        let entsize = header.ident.class.section_header_size() as u64;
        let table = checked_table(
            "section header table",
            header.e_shoff,
            sh_num,
            entsize,
            data.len(),
        )?;

        let mut headers = Vec::with_capacity(sh_num as usize);
        for offset in table.step_by(entsize as usize) {
            let sh = parse_section_header(data, offset, header.ident.class, header.ident.data)?;
            if sh.sh_type != SHT_NOBITS && sh.sh_type != SHT_NULL {
                checked_range("section contents", sh.sh_offset, sh.sh_size, data.len())?;
            }
            headers.push(sh);
        }

        let shstrndx = header.e_shstrndx as usize;
        let strings: &'a [u8] = match headers.get(shstrndx) {
            Some(sh) if shstrndx != 0 => {
                &data[checked_range("section name table", sh.sh_offset, sh.sh_size, data.len())?]
            }
            Some(_) => &[],
            None => {
                return Err(ElfError::MalformedHeader(format!(
                    "Invalid section string table index: {}",
                    shstrndx
                )))
            }
        };

        // First occurrence wins for duplicate names.
        let mut by_name = HashMap::new();
        for (i, sh) in headers.iter().enumerate().skip(1) {
            if let Ok(name) = read_cstring(strings, sh.sh_name as usize) {
                by_name.entry(name).or_insert(i);
            }
        }

        Ok(Self {
            headers,
            strings,
            data,
            by_name,
            class: header.ident.class,
            endian: header.ident.data,
        })
    }

    /// Get section by name
    pub fn by_name(&self, name: &str) -> Option<Section<'a>> {
        self.by_name.get(name).and_then(|&idx| self.by_index(idx))
    }

    /// Get section by index
    pub fn by_index(&self, index: usize) -> Option<Section<'a>> {
        self.headers.get(index).map(|header| {
            let name = read_cstring(self.strings, header.sh_name as usize).unwrap_or("");
            let data = if header.sh_type == SHT_NOBITS {
                &[][..]
            } else {
                checked_range("section contents", header.sh_offset, header.sh_size, self.data.len())
                    .map(|range| &self.data[range])
                    .unwrap_or(&[])
            };
            Section {
                header: *header,
                name,
                data,
            }
        })
    }

    /// First section of the given type
    pub fn by_type(&self, sh_type: u32) -> Option<Section<'a>> {
        self.headers
            .iter()
            .position(|sh| sh.sh_type == sh_type)
            .and_then(|idx| self.by_index(idx))
    }

    /// Get all sections
    pub fn sections(&self) -> impl Iterator<Item = Section<'a>> + '_ {
        (0..self.headers.len()).filter_map(move |i| self.by_index(i))
    }

    /// Count sections
    pub fn count(&self) -> usize {
        self.headers.len()
    }

    /// Contents of `section`, inflated if it is compressed
    pub fn contents(&self, section: &Section<'a>) -> Result<Cow<'a, [u8]>> {
        compression::section_contents(section, self.class, self.endian)
    }

    /// Whether DWARF is present in a form that can be read
    pub fn has_debug_info(&self) -> bool {
        self.by_name(".debug_info")
            .map(|s| !s.data.is_empty() && compression::is_readable(&s, self.class, self.endian))
            .unwrap_or(false)
    }
}

/// Parse a single section header
fn parse_section_header(
    data: &[u8],
    offset: usize,
    class: ElfClass,
    endian: ElfData,
) -> Result<SectionHeader> {
    match class {
        ElfClass::Elf32 => Ok(SectionHeader {
            sh_name: data.read_u32(offset, endian)?,
            sh_type: data.read_u32(offset + 4, endian)?,
            sh_flags: u64::from(data.read_u32(offset + 8, endian)?),
            sh_addr: u64::from(data.read_u32(offset + 12, endian)?),
            sh_offset: u64::from(data.read_u32(offset + 16, endian)?),
            sh_size: u64::from(data.read_u32(offset + 20, endian)?),
            sh_link: data.read_u32(offset + 24, endian)?,
            sh_info: data.read_u32(offset + 28, endian)?,
            sh_addralign: u64::from(data.read_u32(offset + 32, endian)?),
            sh_entsize: u64::from(data.read_u32(offset + 36, endian)?),
        }),
        ElfClass::Elf64 => Ok(SectionHeader {
            sh_name: data.read_u32(offset, endian)?,
            sh_type: data.read_u32(offset + 4, endian)?,
            sh_flags: data.read_u64(offset + 8, endian)?,
            sh_addr: data.read_u64(offset + 16, endian)?,
            sh_offset: data.read_u64(offset + 24, endian)?,
            sh_size: data.read_u64(offset + 32, endian)?,
            sh_link: data.read_u32(offset + 40, endian)?,
            sh_info: data.read_u32(offset + 44, endian)?,
            sh_addralign: data.read_u64(offset + 48, endian)?,
            sh_entsize: data.read_u64(offset + 56, endian)?,
        }),
    }
}
