//! Parsed executable images.
//!
//! A `BinaryImage` owns the bytes of one executable or shared object and the
//! layout facts derived from them at open time. It is immutable afterwards
//! and can be shared across threads; the symbol index and the DWARF tables
//! are built on first use and cached inside the image.

pub mod error;

pub use error::{ImageError, Result};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use bytes::Bytes;
use tracing::debug;

use crate::debuglink::DebugLinkInfo;
use crate::formats::elf::{self, ElfParser, ElfType};
use crate::io::{FileBytes, IOLimits};
use crate::symbols::lines::{DwarfTables, LineInfo, LineResolver};
use crate::symbols::{self, SymbolError, SymbolIndex};

/// Supported image formats, selected from the file's magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Elf,
}

impl ImageKind {
    /// Detect the format of `data`
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.starts_with(elf::ELF_MAGIC) {
            return Some(Self::Elf);
        }
        None
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Elf => "ELF",
        }
    }
}

/// Pointer width of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bitness {
    Bits32,
    Bits64,
}

/// Where loadable segments put the file in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LoadLayout {
    load_bias: u64,
    executable_segment_offset: Option<u64>,
    mapped_size: u64,
}

#[derive(Debug, Clone)]
struct ImageFacts {
    bitness: Bitness,
    build_id: Vec<u8>,
    soname: String,
    layout: Option<LoadLayout>,
    has_full_symbols: bool,
    has_dynamic_symbols: bool,
    has_debug_info: bool,
    debug_link: Option<DebugLinkInfo>,
}

/// An opened executable or shared object
pub struct BinaryImage {
    path: PathBuf,
    kind: ImageKind,
    data: FileBytes,
    facts: ImageFacts,
    symbol_index: OnceLock<SymbolIndex>,
    dwarf: OnceLock<symbols::Result<DwarfTables>>,
}

impl BinaryImage {
    /// Open and validate the image at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_limits(path, &IOLimits::default())
    }

    /// Open with explicit file-size limits
    pub fn open_with_limits(path: impl AsRef<Path>, limits: &IOLimits) -> Result<Self> {
        let path = path.as_ref();
        let data = FileBytes::open(path, limits).map_err(|source| ImageError::IoFailure {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_file_bytes(path.to_path_buf(), data)
    }

    /// Parse an image already held in memory
    ///
    /// `path` is used for diagnostics and debug-link lookup only.
    pub fn open_from_buffer(path: impl Into<PathBuf>, bytes: impl Into<Bytes>) -> Result<Self> {
        Self::from_file_bytes(path.into(), FileBytes::from_bytes(bytes))
    }

    fn from_file_bytes(path: PathBuf, data: FileBytes) -> Result<Self> {
        let kind = ImageKind::detect(&data).ok_or_else(|| ImageError::NotAnExecutable {
            path: path.clone(),
        })?;

        let facts = match kind {
            ImageKind::Elf => elf_facts(&path, &data)?,
        };

        debug!(
            path = %path.display(),
            format = kind.name(),
            size = data.len(),
            build_id = %hex::encode(&facts.build_id),
            load_bias = ?facts.layout.map(|l| l.load_bias),
            debug_info = facts.has_debug_info,
            debug_link = facts.debug_link.is_some(),
            "Opened image"
        );

        Ok(Self {
            path,
            kind,
            data,
            facts,
            symbol_index: OnceLock::new(),
            dwarf: OnceLock::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    /// Raw file contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn bitness(&self) -> Bitness {
        self.facts.bitness
    }

    pub fn is_64bit(&self) -> bool {
        self.facts.bitness == Bitness::Bits64
    }

    /// Build identifier bytes, `None` when the image has none
    pub fn build_id(&self) -> Option<&[u8]> {
        (!self.facts.build_id.is_empty()).then_some(self.facts.build_id.as_slice())
    }

    /// Lowercase hex of the build identifier
    pub fn build_id_hex(&self) -> Option<String> {
        self.build_id().map(hex::encode)
    }

    /// `DT_SONAME`, empty when absent
    pub fn soname(&self) -> &str {
        &self.facts.soname
    }

    /// Virtual address corresponding to file offset 0
    ///
    /// `None` when the image has no loadable segments.
    pub fn load_bias(&self) -> Option<u64> {
        self.facts.layout.map(|l| l.load_bias)
    }

    /// File offset of the first executable loadable segment
    pub fn executable_segment_offset(&self) -> Option<u64> {
        self.facts.layout.and_then(|l| l.executable_segment_offset)
    }

    /// Bytes spanned in memory from the mapping of file offset 0 to the end
    /// of the last loadable segment
    pub fn mapped_size(&self) -> Option<u64> {
        self.facts.layout.map(|l| l.mapped_size)
    }

    pub fn has_full_symbols(&self) -> bool {
        self.facts.has_full_symbols
    }

    pub fn has_dynamic_symbols(&self) -> bool {
        self.facts.has_dynamic_symbols
    }

    pub fn has_debug_info(&self) -> bool {
        self.facts.has_debug_info
    }

    pub fn has_debug_link(&self) -> bool {
        self.facts.debug_link.is_some()
    }

    pub fn debug_link(&self) -> Option<&DebugLinkInfo> {
        self.facts.debug_link.as_ref()
    }

    /// Virtual address of a module-relative address
    pub fn vaddr_for_module_offset(&self, module_relative: u64) -> Option<u64> {
        self.load_bias().map(|bias| module_relative.wrapping_add(bias))
    }

    /// Module-relative address of a virtual address
    pub fn module_offset_for_vaddr(&self, vaddr: u64) -> Option<u64> {
        self.load_bias().map(|bias| vaddr.wrapping_sub(bias))
    }

    /// Symbol index, built on first use
    pub fn symbol_index(&self) -> &SymbolIndex {
        self.symbol_index.get_or_init(|| match self.kind {
            ImageKind::Elf => match ElfParser::parse(&self.data) {
                Ok(elf) => symbols::build_index(&elf),
                Err(err) => {
                    debug!(path = %self.path.display(), error = %err, "Symbol tables unavailable");
                    SymbolIndex::default()
                }
            },
        })
    }

    /// DWARF tables, decoded on first use
    pub fn dwarf_tables(&self) -> symbols::Result<&DwarfTables> {
        if !self.facts.has_debug_info {
            return Err(SymbolError::NoDebugInfo);
        }

        self.dwarf
            .get_or_init(|| {
                let tables = match self.kind {
                    ImageKind::Elf => ElfParser::parse(&self.data)
                        .map_err(|e| SymbolError::Dwarf(e.to_string()))
                        .and_then(|elf| DwarfTables::load(&elf)),
                };
                match &tables {
                    Ok(t) => debug!(
                        path = %self.path.display(),
                        rows = t.row_count(),
                        functions = t.function_count(),
                        "Decoded DWARF tables"
                    ),
                    Err(err) => debug!(path = %self.path.display(), error = %err, "DWARF decoding failed"),
                }
                tables
            })
            .as_ref()
            .map_err(Clone::clone)
    }
}

impl LineResolver for BinaryImage {
    fn line_for_vaddr(&self, vaddr: u64) -> symbols::Result<LineInfo> {
        self.dwarf_tables()?.line_for_vaddr(vaddr)
    }

    fn declaration_for_vaddr(&self, vaddr: u64) -> symbols::Result<LineInfo> {
        self.dwarf_tables()?.declaration_for_vaddr(vaddr)
    }
}

impl fmt::Debug for BinaryImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryImage")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("len", &self.data.len())
            .field("facts", &self.facts)
            .finish_non_exhaustive()
    }
}

/// Validate an ELF image and derive its layout facts
///
/// Every table the image declares must lie inside `data`.
fn elf_facts(path: &Path, data: &[u8]) -> Result<ImageFacts> {
    let to_image_error = |err| ImageError::from_elf(path, err);

    let elf = ElfParser::parse(data).map_err(to_image_error)?;
    let header = elf.header();
    match header.file_type() {
        ElfType::Executable | ElfType::SharedObject => {}
        other => {
            debug!(path = %path.display(), file_type = ?other, "Not a loadable ELF image");
            return Err(ImageError::NotAnExecutable {
                path: path.to_path_buf(),
            });
        }
    }

    let segments = elf.segments().map_err(to_image_error)?;
    let sections = elf.sections().map_err(to_image_error)?;

    let layout = segments.first_load().map(|first| {
        let load_bias = first.p_vaddr.wrapping_sub(first.p_offset);
        LoadLayout {
            load_bias,
            executable_segment_offset: segments.first_executable_load().map(|ph| ph.p_offset),
            mapped_size: segments
                .max_load_end()
                .map_or(0, |end| end.wrapping_sub(load_bias)),
        }
    });

    // Beyond the leading null entry.
    let has_full_symbols = elf.symbol_count(&sections, elf::SHT_SYMTAB) > 1;
    let has_dynamic_symbols = elf.symbol_count(&sections, elf::SHT_DYNSYM) > 1;

    let endian = header.ident.data;
    let debug_link = elf
        .debug_link_section(&sections)
        .and_then(|raw| DebugLinkInfo::parse(raw, endian));

    Ok(ImageFacts {
        bitness: match header.ident.class {
            elf::ElfClass::Elf32 => Bitness::Bits32,
            elf::ElfClass::Elf64 => Bitness::Bits64,
        },
        build_id: elf.build_id(&sections).map(<[u8]>::to_vec).unwrap_or_default(),
        soname: elf.soname(&sections).unwrap_or_default().to_string(),
        layout,
        has_full_symbols,
        has_dynamic_symbols,
        has_debug_info: sections.has_debug_info(),
        debug_link,
    })
}
