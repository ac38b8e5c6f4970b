//! Program header table management

use crate::formats::elf::types::*;
use crate::formats::elf::utils::{checked_table, EndianRead};

/// Segment table for program header management
pub struct SegmentTable {
    headers: Vec<ProgramHeader>,
}

impl SegmentTable {
    /// Parse segment table from ELF data
    ///
    /// Fails when the declared table runs past the end of `data`.
    pub fn parse(data: &[u8], header: &ElfHeader) -> Result<Self> {
        let ph_num = header.e_phnum as u64;

        if ph_num == 0 {
            return Ok(Self {
                headers: Vec::new(),
            });
        }

        let entsize = header.ident.class.program_header_size() as u64;
        let table = checked_table(
            "program header table",
            header.e_phoff,
            ph_num,
            entsize,
            data.len(),
        )?;

        let mut headers = Vec::with_capacity(ph_num as usize);
        for offset in table.step_by(entsize as usize) {
            headers.push(parse_program_header(
                data,
                offset,
                header.ident.class,
                header.ident.data,
            )?);
        }

        // Sort by virtual address for efficient lookups
        headers.sort_by_key(|h| h.p_vaddr);

        Ok(Self { headers })
    }

    /// Get all LOAD segments, ascending by virtual address
    pub fn load_segments(&self) -> impl Iterator<Item = &ProgramHeader> + '_ {
        self.headers.iter().filter(|ph| ph.is_load())
    }

    /// The loadable segment with the lowest virtual address
    pub fn first_load(&self) -> Option<&ProgramHeader> {
        self.load_segments().min_by_key(|ph| ph.p_vaddr)
    }

    /// The first loadable segment that is mapped executable
    pub fn first_executable_load(&self) -> Option<&ProgramHeader> {
        self.load_segments().find(|ph| ph.is_executable())
    }

    /// Highest end address over all loadable segments
    pub fn max_load_end(&self) -> Option<u64> {
        self.load_segments().map(|ph| ph.vaddr_end()).max()
    }

    /// All program headers
    pub fn headers(&self) -> &[ProgramHeader] {
        &self.headers
    }

    /// Count segments
    pub fn count(&self) -> usize {
        self.headers.len()
    }
}

/// Parse a single program header
fn parse_program_header(
    data: &[u8],
    offset: usize,
    class: ElfClass,
    endian: ElfData,
) -> Result<ProgramHeader> {
    match class {
        ElfClass::Elf32 => Ok(ProgramHeader {
            p_type: data.read_u32(offset, endian)?,
            p_offset: u64::from(data.read_u32(offset + 4, endian)?),
            p_vaddr: u64::from(data.read_u32(offset + 8, endian)?),
            p_paddr: u64::from(data.read_u32(offset + 12, endian)?),
            p_filesz: u64::from(data.read_u32(offset + 16, endian)?),
            p_memsz: u64::from(data.read_u32(offset + 20, endian)?),
            p_flags: data.read_u32(offset + 24, endian)?,
            p_align: u64::from(data.read_u32(offset + 28, endian)?),
        }),
        ElfClass::Elf64 => Ok(ProgramHeader {
            p_type: data.read_u32(offset, endian)?,
            p_flags: data.read_u32(offset + 4, endian)?,
            p_offset: data.read_u64(offset + 8, endian)?,
            p_vaddr: data.read_u64(offset + 16, endian)?,
            p_paddr: data.read_u64(offset + 24, endian)?,
            p_filesz: data.read_u64(offset + 32, endian)?,
            p_memsz: data.read_u64(offset + 40, endian)?,
            p_align: data.read_u64(offset + 48, endian)?,
        }),
    }
}
