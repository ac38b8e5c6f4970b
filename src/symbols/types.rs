//! Symbol types and data structures

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::demangle;

/// Symbol and line resolution errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SymbolError {
    #[error("no debug information available")]
    NoDebugInfo,
    #[error("no debug information covers address {0:#x}")]
    AddressNotFound(u64),
    #[error("requested symbol table is not present")]
    NoSymbolTable,
    #[error("image has no loadable segments")]
    NoLoadableSegments,
    #[error("malformed DWARF: {0}")]
    Dwarf(String),
}

pub type Result<T> = std::result::Result<T, SymbolError>;

/// Table a symbol record was read from
///
/// Ordered so that `Full` sorts before `DynamicOnly`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolOrigin {
    /// `.symtab`
    Full,
    /// `.dynsym`
    DynamicOnly,
}

/// Which table `list_symbols` reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolSource {
    DynamicOnly,
    Full,
}

impl From<SymbolSource> for SymbolOrigin {
    fn from(source: SymbolSource) -> Self {
        match source {
            SymbolSource::DynamicOnly => SymbolOrigin::DynamicOnly,
            SymbolSource::Full => SymbolOrigin::Full,
        }
    }
}

/// A function symbol at a virtual address of its image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    /// Name as recorded, possibly mangled
    pub name: String,
    /// Virtual address as recorded in the file
    pub address: u64,
    /// Size in bytes; 0 when unknown
    pub size: u64,
    pub origin: SymbolOrigin,
}

impl SymbolRecord {
    pub fn new(name: impl Into<String>, address: u64, size: u64, origin: SymbolOrigin) -> Self {
        Self {
            name: name.into(),
            address,
            size,
            origin,
        }
    }

    /// Exclusive end address, `None` when the size is unknown
    pub fn end(&self) -> Option<u64> {
        (self.size != 0).then(|| self.address.saturating_add(self.size))
    }

    /// Whether `vaddr` falls in this record's range
    ///
    /// A record of unknown size covers every address from its start.
    pub fn contains(&self, vaddr: u64) -> bool {
        vaddr >= self.address && self.end().map_or(true, |end| vaddr < end)
    }

    /// Demangled name, or the recorded name when it is not mangled
    pub fn demangled_name(&self) -> Cow<'_, str> {
        demangle::demangle_or_original(&self.name)
    }
}

/// Address-ordered symbol tables of one image, kept per origin
///
/// Within an origin, records never overlap: aliases at one address are
/// collapsed to a single record and a record that runs into its successor
/// is truncated at the successor's start.
#[derive(Debug, Clone, Default)]
pub struct SymbolIndex {
    full: Vec<SymbolRecord>,
    dynamic: Vec<SymbolRecord>,
}

impl SymbolIndex {
    /// Build an index from unordered records of either origin
    pub fn from_records(records: impl IntoIterator<Item = SymbolRecord>) -> Self {
        let (full, dynamic): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|r| r.origin == SymbolOrigin::Full);

        Self {
            full: normalize(full),
            dynamic: normalize(dynamic),
        }
    }

    /// Record covering `vaddr`
    ///
    /// Takes the highest-starting record of each origin at or below `vaddr`;
    /// of those that contain it, the higher start wins and `Full` wins ties.
    pub fn lookup(&self, vaddr: u64) -> Option<&SymbolRecord> {
        match (
            covering(&self.full, vaddr),
            covering(&self.dynamic, vaddr),
        ) {
            (Some(full), Some(dynamic)) if dynamic.address > full.address => Some(dynamic),
            (Some(full), _) => Some(full),
            (None, dynamic) => dynamic,
        }
    }

    /// Records of one origin, ascending by address
    pub fn records(&self, origin: SymbolOrigin) -> &[SymbolRecord] {
        match origin {
            SymbolOrigin::Full => &self.full,
            SymbolOrigin::DynamicOnly => &self.dynamic,
        }
    }

    pub fn len(&self) -> usize {
        self.full.len() + self.dynamic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.full.is_empty() && self.dynamic.is_empty()
    }
}

fn covering(records: &[SymbolRecord], vaddr: u64) -> Option<&SymbolRecord> {
    let idx = records.partition_point(|r| r.address <= vaddr);
    let candidate = records.get(idx.checked_sub(1)?)?;
    candidate.contains(vaddr).then_some(candidate)
}

fn normalize(mut records: Vec<SymbolRecord>) -> Vec<SymbolRecord> {
    // Among aliases, keep a sized record, then the lexically first name.
    records.sort_by(|a, b| {
        a.address
            .cmp(&b.address)
            .then_with(|| (a.size == 0).cmp(&(b.size == 0)))
            .then_with(|| a.name.cmp(&b.name))
    });
    records.dedup_by(|later, kept| later.address == kept.address);

    for i in 1..records.len() {
        let next_start = records[i].address;
        let prev = &mut records[i - 1];
        if prev.end().is_some_and(|end| end > next_start) {
            prev.size = next_start - prev.address;
        }
    }

    records
}
