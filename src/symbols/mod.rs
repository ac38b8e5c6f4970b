//! # Symbols Module
//!
//! Symbol-table and source-line resolution for parsed images. Symbol tables
//! are read from `.symtab` and `.dynsym` into an address-sorted index that is
//! built once per image; DWARF line data is decoded lazily on first query.
//!
//! Queries take module-relative addresses and convert them to the image's
//! virtual addresses with its load bias.

pub mod lines;
pub mod types;

pub use lines::{resolve_declaration_site, resolve_line, DwarfTables, LineInfo, LineResolver};
pub use types::{Result, SymbolError, SymbolIndex, SymbolOrigin, SymbolRecord, SymbolSource};

use tracing::debug;

use crate::formats::elf::symbols::SymbolTable;
use crate::formats::elf::ElfParser;
use crate::image::BinaryImage;

/// Function symbols of one table, ascending by address
///
/// `DynamicOnly` is what survives in stripped binaries. Fails with
/// `NoSymbolTable` when the image lacks the requested table.
pub fn list_symbols(image: &BinaryImage, source: SymbolSource) -> Result<Vec<SymbolRecord>> {
    let present = match source {
        SymbolSource::Full => image.has_full_symbols(),
        SymbolSource::DynamicOnly => image.has_dynamic_symbols(),
    };
    if !present {
        return Err(SymbolError::NoSymbolTable);
    }

    Ok(image.symbol_index().records(source.into()).to_vec())
}

/// Symbol covering a module-relative address, if any
pub fn lookup_symbol(image: &BinaryImage, module_relative: u64) -> Result<Option<&SymbolRecord>> {
    let vaddr = image
        .vaddr_for_module_offset(module_relative)
        .ok_or(SymbolError::NoLoadableSegments)?;
    Ok(image.symbol_index().lookup(vaddr))
}

/// Read both symbol tables of an ELF image into an index
///
/// Tables that fail to parse contribute no records.
pub(crate) fn build_index(elf: &ElfParser<'_>) -> SymbolIndex {
    let sections = match elf.sections() {
        Ok(sections) => sections,
        Err(err) => {
            debug!(error = %err, "No section table; symbol index is empty");
            return SymbolIndex::default();
        }
    };

    let mut records = Vec::new();
    match elf.symbols(&sections) {
        Ok(Some(table)) => collect(&table, SymbolOrigin::Full, &mut records),
        Ok(None) => {}
        Err(err) => debug!(error = %err, "Unreadable .symtab"),
    }
    match elf.dynamic_symbols(&sections) {
        Ok(Some(table)) => collect(&table, SymbolOrigin::DynamicOnly, &mut records),
        Ok(None) => {}
        Err(err) => debug!(error = %err, "Unreadable .dynsym"),
    }

    let index = SymbolIndex::from_records(records);
    debug!(
        full = index.records(SymbolOrigin::Full).len(),
        dynamic = index.records(SymbolOrigin::DynamicOnly).len(),
        "Built symbol index"
    );
    index
}

fn collect(table: &SymbolTable<'_>, origin: SymbolOrigin, out: &mut Vec<SymbolRecord>) {
    out.extend(
        table
            .functions()
            .map(|info| SymbolRecord::new(info.name(), info.value(), info.size(), origin)),
    );
}
