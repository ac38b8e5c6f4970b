//! Symbol table parsing

use crate::formats::elf::types::*;
use crate::formats::elf::utils::{read_cstring, EndianRead};

/// Symbol table (`.symtab` or `.dynsym`) paired with its string table
pub struct SymbolTable<'a> {
    symbols: Vec<Symbol>,
    strings: &'a [u8],
}

impl<'a> SymbolTable<'a> {
    /// Parse symbol table from section data
    ///
    /// A trailing partial entry is ignored.
    pub fn parse(
        symbol_data: &[u8],
        string_data: &'a [u8],
        class: ElfClass,
        endian: ElfData,
    ) -> Result<Self> {
        let entry_size = class.symbol_size();

        let symbols = symbol_data
            .chunks_exact(entry_size)
            .map(|entry| parse_symbol(entry, class, endian))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            symbols,
            strings: string_data,
        })
    }

    /// Get symbol name
    pub fn symbol_name(&self, symbol: &Symbol) -> Option<&'a str> {
        if symbol.st_name == 0 {
            return None;
        }
        read_cstring(self.strings, symbol.st_name as usize).ok()
    }

    /// Iterate all symbols with their names
    pub fn iter(&self) -> impl Iterator<Item = SymbolInfo<'a>> + '_ {
        self.symbols.iter().map(move |s| SymbolInfo {
            symbol: *s,
            name: self.symbol_name(s),
        })
    }

    /// Defined function symbols with a non-empty name and a non-zero address
    pub fn functions(&self) -> impl Iterator<Item = SymbolInfo<'a>> + '_ {
        self.iter().filter(|info| {
            info.symbol.is_function()
                && !info.symbol.is_undefined()
                && info.symbol.st_value != 0
                && !info.name().is_empty()
        })
    }

    /// Count total symbols
    pub fn count(&self) -> usize {
        self.symbols.len()
    }
}

/// Symbol information with name
pub struct SymbolInfo<'a> {
    pub symbol: Symbol,
    pub name: Option<&'a str>,
}

impl<'a> SymbolInfo<'a> {
    pub fn name(&self) -> &'a str {
        self.name.unwrap_or("")
    }

    pub fn value(&self) -> u64 {
        self.symbol.st_value
    }

    pub fn size(&self) -> u64 {
        self.symbol.st_size
    }
}

/// Parse a single symbol entry
fn parse_symbol(data: &[u8], class: ElfClass, endian: ElfData) -> Result<Symbol> {
    match class {
        ElfClass::Elf32 => Ok(Symbol {
            st_name: data.read_u32(0, endian)?,
            st_value: u64::from(data.read_u32(4, endian)?),
            st_size: u64::from(data.read_u32(8, endian)?),
            st_info: data[12],
            st_other: data[13],
            st_shndx: data.read_u16(14, endian)?,
        }),
        ElfClass::Elf64 => Ok(Symbol {
            st_name: data.read_u32(0, endian)?,
            st_info: data[4],
            st_other: data[5],
            st_shndx: data.read_u16(6, endian)?,
            st_value: data.read_u64(8, endian)?,
            st_size: data.read_u64(16, endian)?,
        }),
    }
}
