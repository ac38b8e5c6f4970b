//! # Resolver Module
//!
//! Maps raw addresses observed in the target process to module, symbol and
//! source line.
//!
//! A module is mapped at a `base`: the runtime address of its file offset 0.
//! For a raw address inside the mapping, `address - base` is the
//! module-relative address and adding the image's load bias gives the
//! virtual address its symbol and line tables are keyed by.
//!
//! Images of unloaded modules stay in a bounded cache keyed by build id, so a
//! library that is mapped again at a new base is not parsed twice.

mod cache;
mod worker;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::capture::{ClientCaptureEvent, ModuleChange, ModuleUpdate};
use crate::config::SymbolConfig;
use crate::debuglink;
use crate::image::{BinaryImage, ImageError};
use crate::symbols::{LineInfo, LineResolver, SymbolOrigin, SymbolRecord};
use cache::LruCache;

pub use worker::{ModuleUpdates, ModuleWorker};

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("{}: image has no loadable segments", path.display())]
    NoLoadableSegments { path: PathBuf },

    #[error(
        "{}: build id {} does not match expected {expected}",
        path.display(),
        found.as_deref().unwrap_or("<none>")
    )]
    BuildIdMismatch {
        path: PathBuf,
        expected: String,
        found: Option<String>,
    },
}

pub type Result<T> = std::result::Result<T, ResolverError>;

/// Identity of a module: where it was loaded from and which build it is
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleKey {
    pub path: PathBuf,
    pub build_id: Option<String>,
}

/// An image together with the separate debug file it links to, if found
#[derive(Debug)]
struct ModuleImage {
    image: BinaryImage,
    companion: Option<BinaryImage>,
}

impl ModuleImage {
    /// Symbol covering `vaddr`, preferring the companion's full table when
    /// the image itself is stripped
    fn symbol_at(&self, vaddr: u64) -> Option<&SymbolRecord> {
        if !self.image.has_full_symbols() {
            let from_companion = self
                .companion
                .as_ref()
                .and_then(|c| c.symbol_index().lookup(vaddr));
            if from_companion.is_some() {
                return from_companion;
            }
        }
        self.image.symbol_index().lookup(vaddr)
    }

    fn line_at(&self, vaddr: u64) -> Option<LineInfo> {
        let source = if self.image.has_debug_info() {
            &self.image
        } else {
            self.companion.as_ref()?
        };
        match source.line_for_vaddr(vaddr) {
            Ok(line) => Some(line),
            Err(err) => {
                trace!(
                    path = %source.path().display(),
                    vaddr = format_args!("{:#x}", vaddr),
                    error = %err,
                    "No line information"
                );
                None
            }
        }
    }
}

/// A module currently mapped into the target process
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub key: ModuleKey,
    /// Runtime address of file offset 0
    pub base: u64,
    /// Bytes mapped from `base`
    pub size: u64,
    images: Arc<ModuleImage>,
}

impl LoadedModule {
    pub fn image(&self) -> &BinaryImage {
        &self.images.image
    }

    /// Separate debug file validated against the image's debug link
    pub fn debug_companion(&self) -> Option<&BinaryImage> {
        self.images.companion.as_ref()
    }

    /// Exclusive end of the mapping
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }
}

/// The function a resolved address falls in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSymbol {
    /// Demangled when demangling is enabled
    pub name: String,
    pub mangled_name: String,
    /// Start of the function in the image's virtual addresses
    pub address: u64,
    /// Distance of the resolved address from the function start
    pub offset: u64,
    pub origin: SymbolOrigin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedFrame {
    pub address: u64,
    pub module: PathBuf,
    pub build_id: Option<String>,
    /// Module-relative address
    pub offset: u64,
    pub symbol: Option<ResolvedSymbol>,
    pub line: Option<LineInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Resolved(ResolvedFrame),
    /// No mapped module covers the address
    Unresolved,
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    pub fn frame(&self) -> Option<&ResolvedFrame> {
        match self {
            Self::Resolved(frame) => Some(frame),
            Self::Unresolved => None,
        }
    }

    pub fn symbol_name(&self) -> Option<&str> {
        self.frame()?.symbol.as_ref().map(|s| s.name.as_str())
    }
}

struct ResolverState {
    /// Current mappings keyed by base; ranges are disjoint
    mappings: BTreeMap<u64, LoadedModule>,
    /// Unmapped images by build id
    retained: LruCache<String, Arc<ModuleImage>>,
}

/// Session-scoped module map
///
/// Safe to share between the capture consumer, which applies module
/// updates, and any number of threads resolving addresses.
pub struct ModuleResolver {
    config: SymbolConfig,
    state: RwLock<ResolverState>,
}

impl Default for ModuleResolver {
    fn default() -> Self {
        Self::new(SymbolConfig::default())
    }
}

impl ModuleResolver {
    pub fn new(config: SymbolConfig) -> Self {
        let retained = LruCache::new(config.module_cache_capacity);
        Self {
            config,
            state: RwLock::new(ResolverState {
                mappings: BTreeMap::new(),
                retained,
            }),
        }
    }

    pub fn config(&self) -> &SymbolConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, ResolverState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ResolverState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Map the module at `path` at `base`
    ///
    /// When `build_id` is given and an image with that id was retained after
    /// an earlier unload, it is reused without reading `path`. Otherwise the
    /// file at `path` must carry that build id; a different build is refused.
    pub fn load_module(
        &self,
        path: impl AsRef<Path>,
        base: u64,
        build_id: Option<&str>,
    ) -> Result<LoadedModule> {
        let path = path.as_ref();

        let reusable = {
            let mut state = self.write();
            let mapped = state
                .mappings
                .values()
                .find(|m| {
                    m.key.path == path
                        && build_id.map_or(true, |id| m.key.build_id.as_deref() == Some(id))
                })
                .map(|m| Arc::clone(&m.images));
            match mapped {
                Some(images) => Some(images),
                None => build_id.and_then(|id| state.retained.remove(&id.to_string())),
            }
        };

        let images = match reusable {
            Some(images) => {
                debug!(
                    path = %path.display(),
                    base = format_args!("{:#x}", base),
                    "Reusing parsed image"
                );
                images
            }
            None => {
                let image = BinaryImage::open_with_limits(path, &self.config.io_limits())?;
                if let Some(expected) = build_id {
                    check_build_id(&image, expected)?;
                }
                Arc::new(self.attach_companion(image))
            }
        };
        self.insert_mapping(images, base)
    }

    /// Map an image that is already parsed
    pub fn map_image(&self, image: BinaryImage, base: u64) -> Result<LoadedModule> {
        let images = Arc::new(self.attach_companion(image));
        self.insert_mapping(images, base)
    }

    fn attach_companion(&self, image: BinaryImage) -> ModuleImage {
        let companion = if image.has_debug_info() {
            None
        } else {
            self.find_companion(&image)
        };
        ModuleImage { image, companion }
    }

    fn find_companion(&self, image: &BinaryImage) -> Option<BinaryImage> {
        let link = debuglink::get_link_info(image)?;
        let Some(path) =
            debuglink::find_companion(image.path(), &link, &self.config.debug_directories)
        else {
            debug!(
                path = %image.path().display(),
                link = %link.file_name,
                "No debug companion matched"
            );
            return None;
        };

        match BinaryImage::open_with_limits(&path, &self.config.io_limits()) {
            Ok(companion) => {
                debug!(
                    path = %image.path().display(),
                    companion = %path.display(),
                    debug_info = companion.has_debug_info(),
                    "Attached debug companion"
                );
                Some(companion)
            }
            Err(err) => {
                warn!(companion = %path.display(), error = %err, "Debug companion unreadable");
                None
            }
        }
    }

    fn insert_mapping(&self, images: Arc<ModuleImage>, base: u64) -> Result<LoadedModule> {
        let image = &images.image;
        let size = image
            .mapped_size()
            .filter(|&size| size > 0)
            .ok_or_else(|| ResolverError::NoLoadableSegments {
                path: image.path().to_path_buf(),
            })?;

        let module = LoadedModule {
            key: ModuleKey {
                path: image.path().to_path_buf(),
                build_id: image.build_id_hex(),
            },
            base,
            size,
            images: Arc::clone(&images),
        };

        let mut state = self.write();
        let overlapping: Vec<u64> = state
            .mappings
            .range(..module.end())
            .filter(|(_, m)| m.end() > base)
            .map(|(&b, _)| b)
            .collect();
        for stale in overlapping {
            warn!(
                stale = format_args!("{:#x}", stale),
                base = format_args!("{:#x}", base),
                "Replacing overlapping module mapping"
            );
            Self::unmap(&mut state, stale);
        }

        debug!(
            path = %module.key.path.display(),
            base = format_args!("{:#x}", base),
            size = format_args!("{:#x}", size),
            build_id = module.key.build_id.as_deref().unwrap_or(""),
            "Module mapped"
        );
        state.mappings.insert(base, module.clone());
        Ok(module)
    }

    /// Stop resolving against the mapping at `base`
    ///
    /// Returns whether a mapping was removed.
    pub fn unload_module(&self, base: u64) -> bool {
        let mut state = self.write();
        let removed = Self::unmap(&mut state, base);
        if !removed {
            debug!(base = format_args!("{:#x}", base), "Unload of unknown mapping");
        }
        removed
    }

    /// Remove one mapping, retaining its image when nothing else maps it
    fn unmap(state: &mut ResolverState, base: u64) -> bool {
        let Some(module) = state.mappings.remove(&base) else {
            return false;
        };
        let still_mapped = state
            .mappings
            .values()
            .any(|m| Arc::ptr_eq(&m.images, &module.images));
        if let (false, Some(build_id)) = (still_mapped, module.key.build_id) {
            if let Some(evicted) = state.retained.put(build_id, module.images) {
                trace!(build_id = %evicted, "Evicted retained image");
            }
        }
        debug!(
            path = %module.key.path.display(),
            base = format_args!("{:#x}", base),
            "Module unmapped"
        );
        true
    }

    /// Apply a module load or unload notice; other events are ignored
    pub fn observe(&self, event: &ClientCaptureEvent) {
        if let ClientCaptureEvent::ModuleUpdate(update) = event {
            self.apply(update);
        }
    }

    /// Apply one module load or unload notice
    ///
    /// Failures are logged and leave the affected range unresolved.
    pub fn apply(&self, update: &ModuleUpdate) {
        let ModuleUpdate {
            change,
            path,
            base,
            build_id,
            ..
        } = update;
        match change {
            ModuleChange::Loaded => {
                if let Err(err) = self.load_module(path, *base, build_id.as_deref()) {
                    warn!(
                        path = %path.display(),
                        base = format_args!("{:#x}", base),
                        error = %err,
                        "Module will not be symbolized"
                    );
                }
            }
            ModuleChange::Unloaded => {
                self.unload_module(*base);
            }
        }
    }

    /// Module containing `address`, if any
    pub fn module_for(&self, address: u64) -> Option<LoadedModule> {
        let state = self.read();
        state
            .mappings
            .range(..=address)
            .next_back()
            .map(|(_, m)| m)
            .filter(|m| m.contains(address))
            .cloned()
    }

    /// Resolve a raw address to module, symbol and line
    pub fn resolve(&self, address: u64) -> Resolution {
        let Some(module) = self.module_for(address) else {
            return Resolution::Unresolved;
        };

        let offset = address - module.base;
        let vaddr = module.image().vaddr_for_module_offset(offset);
        let symbol = vaddr.and_then(|vaddr| {
            let record = module.images.symbol_at(vaddr)?;
            let name = if self.config.demangle {
                record.demangled_name().into_owned()
            } else {
                record.name.clone()
            };
            Some(ResolvedSymbol {
                name,
                mangled_name: record.name.clone(),
                address: record.address,
                offset: vaddr - record.address,
                origin: record.origin,
            })
        });
        let line = vaddr.and_then(|vaddr| module.images.line_at(vaddr));

        Resolution::Resolved(ResolvedFrame {
            address,
            module: module.key.path,
            build_id: module.key.build_id,
            offset,
            symbol,
            line,
        })
    }

    /// Resolve many addresses in parallel, preserving input order
    pub fn resolve_many(&self, addresses: &[u64]) -> Vec<Resolution> {
        addresses.par_iter().map(|&a| self.resolve(a)).collect()
    }

    /// Snapshot of current mappings, ascending by base
    pub fn loaded_modules(&self) -> Vec<LoadedModule> {
        self.read().mappings.values().cloned().collect()
    }

    /// Number of unmapped images kept for reuse
    pub fn retained_count(&self) -> usize {
        self.read().retained.len()
    }

    /// Drop every mapping and retained image
    pub fn clear(&self) {
        let mut state = self.write();
        let mapped = state.mappings.len();
        state.mappings.clear();
        state.retained.clear();
        debug!(mapped, "Module resolver cleared");
    }
}

fn check_build_id(image: &BinaryImage, expected: &str) -> Result<()> {
    let found = image.build_id_hex();
    if found
        .as_deref()
        .is_some_and(|found| found.eq_ignore_ascii_case(expected))
    {
        return Ok(());
    }
    warn!(
        path = %image.path().display(),
        expected,
        found = found.as_deref().unwrap_or(""),
        "Module on disk is a different build"
    );
    Err(ResolverError::BuildIdMismatch {
        path: image.path().to_path_buf(),
        expected: expected.to_string(),
        found,
    })
}
