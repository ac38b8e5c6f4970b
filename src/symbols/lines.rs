//! Source line and declaration lookup from DWARF
//!
//! The DWARF line programs and subprogram entries of an image are decoded
//! once, on first query, into flat address-sorted tables owned by the image.

use std::collections::HashMap;
use std::path::PathBuf;

use gimli::{
    AttributeValue, ColumnType, DebuggingInformationEntry, Dwarf, EndianSlice, LineProgramHeader,
    RunTimeEndian, SectionId, Unit,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{Result, SymbolError};
use crate::formats::elf::sections::SectionTable;
use crate::formats::elf::ElfParser;
use crate::image::BinaryImage;

type Slice<'a> = EndianSlice<'a, RunTimeEndian>;

/// A source position
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineInfo {
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
}

/// Address-to-source queries over an image's virtual addresses
pub trait LineResolver: Send + Sync {
    /// Line containing the instruction at `vaddr`
    fn line_for_vaddr(&self, vaddr: u64) -> Result<LineInfo>;

    /// Declaration of the function enclosing `vaddr`
    fn declaration_for_vaddr(&self, vaddr: u64) -> Result<LineInfo>;
}

/// Line of the instruction at a module-relative address
pub fn resolve_line(image: &BinaryImage, module_relative: u64) -> Result<LineInfo> {
    let vaddr = image
        .vaddr_for_module_offset(module_relative)
        .ok_or(SymbolError::NoLoadableSegments)?;
    image.line_for_vaddr(vaddr)
}

/// Declaration site of the function enclosing a module-relative address
///
/// Inlined frames are not consulted; the concrete function's declaration is
/// returned.
pub fn resolve_declaration_site(image: &BinaryImage, module_relative: u64) -> Result<LineInfo> {
    let vaddr = image
        .vaddr_for_module_offset(module_relative)
        .ok_or(SymbolError::NoLoadableSegments)?;
    image.declaration_for_vaddr(vaddr)
}

#[derive(Debug, Clone, Copy)]
struct LineRow {
    address: u64,
    file: u32,
    line: u32,
    column: Option<u32>,
    end_sequence: bool,
}

#[derive(Debug, Clone, Copy)]
struct Declaration {
    file: u32,
    line: u32,
}

#[derive(Debug, Clone, Copy)]
struct FunctionSpan {
    start: u64,
    end: u64,
    decl: Option<Declaration>,
}

/// Decoded DWARF line rows and function ranges
#[derive(Debug, Default)]
pub struct DwarfTables {
    files: Vec<String>,
    rows: Vec<LineRow>,
    functions: Vec<FunctionSpan>,
    // Running maximum of `functions[..=i].end`
    function_max_end: Vec<u64>,
    has_line_programs: bool,
    has_units: bool,
}

impl DwarfTables {
    /// Decode every compilation unit of `elf`
    ///
    /// Compressed debug sections are inflated first; one that cannot be is
    /// treated as absent. Units that fail to parse are skipped; a failure to
    /// walk the unit list itself is reported.
    pub fn load(elf: &ElfParser<'_>) -> Result<Self> {
        let sections = elf
            .sections()
            .map_err(|e| SymbolError::Dwarf(e.to_string()))?;
        let endian = if elf.header().ident.data.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        let inflated = inflate_debug_sections(&sections);
        let dwarf = Dwarf::load(|id: SectionId| {
            let data = match inflated.get(id.name()) {
                Some(buf) => buf.as_slice(),
                None => sections
                    .by_name(id.name())
                    .filter(|s| !s.is_compressed())
                    .map_or(&[][..], |s| s.data),
            };
            Ok::<_, gimli::Error>(EndianSlice::new(data, endian))
        })
        .map_err(dwarf_error)?;

        let mut builder = TableBuilder::default();
        let mut headers = dwarf.units();
        while let Some(header) = headers.next().map_err(dwarf_error)? {
            let unit = match dwarf.unit(header) {
                Ok(unit) => unit,
                Err(err) => {
                    debug!(error = %err, "Skipping unparsable compilation unit");
                    continue;
                }
            };
            builder.tables.has_units = true;
            if let Err(err) = builder.add_unit(&dwarf, &unit) {
                debug!(error = %err, "Compilation unit partially decoded");
            }
        }

        Ok(builder.finish())
    }

    fn file_name(&self, index: u32) -> String {
        self.files.get(index as usize).cloned().unwrap_or_default()
    }

    fn function_at(&self, vaddr: u64) -> Option<&FunctionSpan> {
        let idx = self.functions.partition_point(|f| f.start <= vaddr);
        (0..idx)
            .rev()
            .take_while(|&i| self.function_max_end[i] > vaddr)
            .map(|i| &self.functions[i])
            .find(|f| vaddr < f.end)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }
}

impl LineResolver for DwarfTables {
    fn line_for_vaddr(&self, vaddr: u64) -> Result<LineInfo> {
        if !self.has_line_programs {
            return Err(SymbolError::NoDebugInfo);
        }

        let idx = self.rows.partition_point(|r| r.address <= vaddr);
        let row = idx
            .checked_sub(1)
            .and_then(|i| self.rows.get(i))
            .filter(|r| !r.end_sequence && r.line != 0)
            .ok_or(SymbolError::AddressNotFound(vaddr))?;

        Ok(LineInfo {
            file: self.file_name(row.file),
            line: row.line,
            column: row.column,
        })
    }

    fn declaration_for_vaddr(&self, vaddr: u64) -> Result<LineInfo> {
        if !self.has_units {
            return Err(SymbolError::NoDebugInfo);
        }

        let decl = self
            .function_at(vaddr)
            .and_then(|f| f.decl)
            .ok_or(SymbolError::AddressNotFound(vaddr))?;

        Ok(LineInfo {
            file: self.file_name(decl.file),
            line: decl.line,
            column: None,
        })
    }
}

#[derive(Default)]
struct TableBuilder {
    tables: DwarfTables,
    interned: HashMap<String, u32>,
}

impl TableBuilder {
    fn intern(&mut self, name: String) -> u32 {
        if let Some(&id) = self.interned.get(&name) {
            return id;
        }
        let id = self.tables.files.len() as u32;
        self.tables.files.push(name.clone());
        self.interned.insert(name, id);
        id
    }

    /// Intern file `index` of `header`, caching per unit
    fn unit_file<'a>(
        &mut self,
        cache: &mut HashMap<u64, u32>,
        dwarf: &Dwarf<Slice<'a>>,
        unit: &Unit<Slice<'a>>,
        header: &LineProgramHeader<Slice<'a>>,
        index: u64,
    ) -> u32 {
        if let Some(&id) = cache.get(&index) {
            return id;
        }
        let id = self.intern(render_file(dwarf, unit, header, index));
        cache.insert(index, id);
        id
    }

    fn add_unit<'a>(&mut self, dwarf: &Dwarf<Slice<'a>>, unit: &Unit<Slice<'a>>) -> Result<()> {
        let mut files = HashMap::new();

        if let Some(program) = unit.line_program.clone() {
            self.tables.has_line_programs = true;
            let mut rows = program.rows();
            while let Some((header, row)) = rows.next_row().map_err(dwarf_error)? {
                if row.end_sequence() {
                    self.tables.rows.push(LineRow {
                        address: row.address(),
                        file: 0,
                        line: 0,
                        column: None,
                        end_sequence: true,
                    });
                    continue;
                }

                let file = self.unit_file(&mut files, dwarf, unit, header, row.file_index());
                let line = row.line().map_or(0, |l| clamp_u32(l.get()));
                let column = match row.column() {
                    ColumnType::LeftEdge => None,
                    ColumnType::Column(c) => Some(clamp_u32(c.get())),
                };
                self.tables.rows.push(LineRow {
                    address: row.address(),
                    file,
                    line,
                    column,
                    end_sequence: false,
                });
            }
        }

        let line_header = unit.line_program.as_ref().map(|p| p.header().clone());
        let mut entries = unit.entries();
        while let Some((_, entry)) = entries.next_dfs().map_err(dwarf_error)? {
            if entry.tag() != gimli::DW_TAG_subprogram {
                continue;
            }

            let mut spans = Vec::new();
            let mut ranges = dwarf.die_ranges(unit, entry).map_err(dwarf_error)?;
            while let Some(range) = ranges.next().map_err(dwarf_error)? {
                // Zero starts are tombstones of discarded code.
                if range.begin != 0 && range.begin < range.end {
                    spans.push((range.begin, range.end));
                }
            }
            if spans.is_empty() {
                continue;
            }

            let decl = match (declaration(unit, entry)?, &line_header) {
                (Some((file_index, line)), Some(header)) => Some(Declaration {
                    file: self.unit_file(&mut files, dwarf, unit, header, file_index),
                    line,
                }),
                _ => None,
            };

            for (start, end) in spans {
                self.tables.functions.push(FunctionSpan { start, end, decl });
            }
        }

        Ok(())
    }

    fn finish(mut self) -> DwarfTables {
        let tables = &mut self.tables;

        // End-of-sequence rows sort before rows starting at the same address.
        tables
            .rows
            .sort_by_key(|r| (r.address, !r.end_sequence));

        tables.functions.sort_by_key(|f| (f.start, f.end));
        let mut max_end = 0;
        tables.function_max_end = tables
            .functions
            .iter()
            .map(|f| {
                max_end = max_end.max(f.end);
                max_end
            })
            .collect();

        self.tables
    }
}

/// `(decl_file, decl_line)` of a subprogram, following one
/// `DW_AT_specification` or `DW_AT_abstract_origin` link when absent.
fn declaration<'a>(
    unit: &Unit<Slice<'a>>,
    entry: &DebuggingInformationEntry<'_, '_, Slice<'a>>,
) -> Result<Option<(u64, u32)>> {
    if let Some(decl) = decl_attrs(entry)? {
        return Ok(Some(decl));
    }

    for link in [gimli::DW_AT_specification, gimli::DW_AT_abstract_origin] {
        if let Some(AttributeValue::UnitRef(offset)) = entry.attr_value(link).map_err(dwarf_error)? {
            let origin = unit.entry(offset).map_err(dwarf_error)?;
            if let Some(decl) = decl_attrs(&origin)? {
                return Ok(Some(decl));
            }
        }
    }

    Ok(None)
}

fn decl_attrs(entry: &DebuggingInformationEntry<'_, '_, Slice<'_>>) -> Result<Option<(u64, u32)>> {
    let file = match entry.attr_value(gimli::DW_AT_decl_file).map_err(dwarf_error)? {
        Some(AttributeValue::FileIndex(index)) => Some(index),
        Some(other) => other.udata_value(),
        None => None,
    };
    let line = entry
        .attr_value(gimli::DW_AT_decl_line)
        .map_err(dwarf_error)?
        .and_then(|v| v.udata_value());

    Ok(match (file, line) {
        (Some(file), Some(line)) if line != 0 => Some((file, clamp_u32(line))),
        _ => None,
    })
}

/// Full path of file `index`: compilation directory, include directory, name
fn render_file<'a>(
    dwarf: &Dwarf<Slice<'a>>,
    unit: &Unit<Slice<'a>>,
    header: &LineProgramHeader<Slice<'a>>,
    index: u64,
) -> String {
    let Some(file) = header.file(index) else {
        return String::new();
    };

    let mut path = PathBuf::new();
    if let Some(comp_dir) = &unit.comp_dir {
        path.push(lossy(comp_dir));
    }
    if let Some(dir) = file.directory(header) {
        if let Ok(dir) = dwarf.attr_string(unit, dir) {
            path.push(lossy(&dir));
        }
    }
    if let Ok(name) = dwarf.attr_string(unit, file.path_name()) {
        path.push(lossy(&name));
    }

    path.to_string_lossy().into_owned()
}

fn lossy(slice: &Slice<'_>) -> String {
    String::from_utf8_lossy(slice.slice()).into_owned()
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Inflated contents of every compressed `.debug_*` section, by name
fn inflate_debug_sections<'a>(sections: &SectionTable<'a>) -> HashMap<&'a str, Vec<u8>> {
    let mut inflated = HashMap::new();
    for section in sections.sections() {
        if !section.is_compressed() || !section.name.starts_with(".debug_") {
            continue;
        }
        match sections.contents(&section) {
            Ok(contents) => {
                debug!(
                    section = section.name,
                    compressed = section.data.len(),
                    inflated = contents.len(),
                    "Inflated debug section"
                );
                inflated.insert(section.name, contents.into_owned());
            }
            Err(err) => {
                debug!(section = section.name, error = %err, "Compressed debug section unreadable");
            }
        }
    }
    inflated
}

fn dwarf_error(err: gimli::Error) -> SymbolError {
    SymbolError::Dwarf(err.to_string())
}
