//! Dynamic section parsing

use crate::formats::elf::types::*;
use crate::formats::elf::utils::{read_cstring, EndianRead};

/// Dynamic section entries with their string table
pub struct DynamicSection<'a> {
    entries: Vec<DynamicEntry>,
    strings: &'a [u8],
}

impl<'a> DynamicSection<'a> {
    /// Parse dynamic entries up to `DT_NULL` or the end of the section
    pub fn parse(
        dynamic_section: &Section<'a>,
        strtab_section: Option<&Section<'a>>,
        class: ElfClass,
        endian: ElfData,
    ) -> Result<Self> {
        if dynamic_section.header.sh_type != SHT_DYNAMIC {
            return Err(ElfError::MalformedHeader(
                "Not a dynamic section".to_string(),
            ));
        }

        let data = dynamic_section.data;
        let mut entries = Vec::new();

        for entry in data.chunks_exact(class.dynamic_entry_size()) {
            let (d_tag, d_val) = match class {
                ElfClass::Elf32 => (
                    i64::from(entry.read_i32(0, endian)?),
                    u64::from(entry.read_u32(4, endian)?),
                ),
                ElfClass::Elf64 => (entry.read_i64(0, endian)?, entry.read_u64(8, endian)?),
            };

            if d_tag == DT_NULL {
                break;
            }
            entries.push(DynamicEntry { d_tag, d_val });
        }

        Ok(Self {
            entries,
            strings: strtab_section.map(|s| s.data).unwrap_or(&[]),
        })
    }

    /// Get SONAME
    pub fn soname(&self) -> Option<&'a str> {
        self.entries
            .iter()
            .find(|e| e.d_tag == DT_SONAME)
            .and_then(|e| read_cstring(self.strings, usize::try_from(e.d_val).ok()?).ok())
            .filter(|s| !s.is_empty())
    }

    pub fn entries(&self) -> &[DynamicEntry] {
        &self.entries
    }
}
