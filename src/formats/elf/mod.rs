//! ELF (Executable and Linkable Format) parser
//!
//! A zero-copy ELF reader covering what symbolization needs: the file
//! header, program and section header tables, symbol tables, notes and the
//! dynamic section. Both classes and both byte orders are supported.

pub mod compression;
pub mod dynamic;
pub mod headers;
pub mod notes;
pub mod sections;
pub mod segments;
pub mod symbols;
#[cfg(test)]
pub(crate) mod synth;
pub mod types;
pub mod utils;

use dynamic::DynamicSection;
use headers::parse_header;
use notes::NoteSection;
use sections::SectionTable;
use segments::SegmentTable;
use symbols::SymbolTable;
pub use types::*;
use utils::checked_range;

/// Main ELF parser
pub struct ElfParser<'data> {
    data: &'data [u8],
    header: ElfHeader,
}

impl<'data> ElfParser<'data> {
    /// Parse ELF from raw data
    ///
    /// Only the file header is validated here; the tables are validated when
    /// first requested.
    pub fn parse(data: &'data [u8]) -> Result<Self> {
        let header = parse_header(data)?;

        Ok(Self { data, header })
    }

    /// Get ELF header
    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    /// Get raw data
    pub fn data(&self) -> &'data [u8] {
        self.data
    }

    /// Get sections
    pub fn sections(&self) -> Result<SectionTable<'data>> {
        SectionTable::parse(self.data, &self.header)
    }

    /// Get segments
    pub fn segments(&self) -> Result<SegmentTable> {
        SegmentTable::parse(self.data, &self.header)
    }

    /// Get symbol table
    pub fn symbols(&self, sections: &SectionTable<'data>) -> Result<Option<SymbolTable<'data>>> {
        self.parse_symbol_table(sections, SHT_SYMTAB)
    }

    /// Get dynamic symbol table
    pub fn dynamic_symbols(
        &self,
        sections: &SectionTable<'data>,
    ) -> Result<Option<SymbolTable<'data>>> {
        self.parse_symbol_table(sections, SHT_DYNSYM)
    }

    /// Entry count of the first symbol table of `sh_type`, from its header
    ///
    /// Zero when the table is absent or not linked to a string table. An
    /// entry size of 0 means the class's native symbol size.
    pub fn symbol_count(&self, sections: &SectionTable<'data>, sh_type: u32) -> u64 {
        let Some(table) = sections.by_type(sh_type) else {
            return 0;
        };
        let linked = sections
            .by_index(table.header.sh_link as usize)
            .is_some_and(|s| s.header.sh_type == SHT_STRTAB);
        if !linked {
            return 0;
        }
        let entsize = match table.header.sh_entsize {
            0 => self.header.ident.class.symbol_size() as u64,
            n => n,
        };
        table.header.sh_size / entsize
    }

    /// Get dynamic section
    pub fn dynamic(&self, sections: &SectionTable<'data>) -> Result<Option<DynamicSection<'data>>> {
        let dynamic_section = match sections.by_type(SHT_DYNAMIC) {
            Some(s) => s,
            None => return Ok(None),
        };

        // sh_link names the string table; fall back to .dynstr
        let dynstr_section = sections
            .by_index(dynamic_section.header.sh_link as usize)
            .filter(|s| s.header.sh_type == SHT_STRTAB)
            .or_else(|| sections.by_name(".dynstr"));

        let dynamic = DynamicSection::parse(
            &dynamic_section,
            dynstr_section.as_ref(),
            self.header.ident.class,
            self.header.ident.data,
        )?;

        Ok(Some(dynamic))
    }

    /// Get SONAME from the dynamic section
    pub fn soname(&self, sections: &SectionTable<'data>) -> Option<&'data str> {
        self.dynamic(sections).ok().flatten().and_then(|d| d.soname())
    }

    /// Get build ID from note sections, falling back to `PT_NOTE` segments
    pub fn build_id(&self, sections: &SectionTable<'data>) -> Option<&'data [u8]> {
        let endian = self.header.ident.data;

        let from_sections = sections
            .sections()
            .filter(|s| s.header.sh_type == SHT_NOTE)
            .find_map(|s| NoteSection::parse(s.data, endian).ok()?.build_id());
        if from_sections.is_some() {
            return from_sections;
        }

        let segments = self.segments().ok()?;
        segments
            .headers()
            .iter()
            .filter(|ph| ph.p_type == PT_NOTE)
            .find_map(|ph| {
                let range =
                    checked_range("note segment", ph.p_offset, ph.p_filesz, self.data.len()).ok()?;
                NoteSection::parse(&self.data[range], endian).ok()?.build_id()
            })
    }

    /// Raw `.gnu_debuglink` contents, if present
    pub fn debug_link_section(&self, sections: &SectionTable<'data>) -> Option<&'data [u8]> {
        sections
            .by_name(".gnu_debuglink")
            .filter(|s| s.header.sh_type != SHT_NOBITS && !s.data.is_empty())
            .map(|s| s.data)
    }

    /// Check if binary has debug info
    pub fn has_debug_info(&self) -> bool {
        self.sections().map(|s| s.has_debug_info()).unwrap_or(false)
    }

    /// Parse a symbol table of the given type with its linked string table
    fn parse_symbol_table(
        &self,
        sections: &SectionTable<'data>,
        sh_type: u32,
    ) -> Result<Option<SymbolTable<'data>>> {
        let symtab_section = match sections.by_type(sh_type) {
            Some(s) => s,
            None => return Ok(None),
        };

        let strtab_idx = symtab_section.header.sh_link as usize;
        let strtab_section = match sections.by_index(strtab_idx) {
            Some(s) if s.header.sh_type == SHT_STRTAB => s,
            _ => return Ok(None),
        };

        let table = SymbolTable::parse(
            symtab_section.data,
            strtab_section.data,
            self.header.ident.class,
            self.header.ident.data,
        )?;

        Ok(Some(table))
    }
}
