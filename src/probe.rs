use std::ffi::CStr;

use once_cell::sync::OnceCell;

use crate::{
    arena::{self, arena_address, relative_offset},
    config::ProbeConfig,
    error::ProbeError,
    image::{find_image_base, ImageBase, LiveMemory},
    layout::LayoutGeneration,
    os::{dl, mem::page_size},
    report::ProbeReport,
    tcache::{self, looks_like_tcache_entry},
    version::LibcVersion,
};

/// A symbol that is guaranteed to be defined by the allocator image: the
/// `malloc` the dynamic loader bound for this process.
pub const ANCHOR_SYMBOL: &CStr = c"malloc";

/// Where `main_arena` was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaLocation {
    pub arena: usize,
    pub image: ImageBase,
    pub offset: isize,
}

/// One measurement context. Owns the memoized allocator version, so the
/// version is read at most once per `Probe` and never changes afterwards.
#[derive(Debug)]
pub struct Probe {
    config: ProbeConfig,
    version: OnceCell<LibcVersion>,
}

impl Probe {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            version: OnceCell::new(),
        }
    }

    /// A probe whose version is fixed up front instead of queried lazily.
    pub fn with_version(config: ProbeConfig, version: LibcVersion) -> Self {
        Self {
            config,
            version: OnceCell::with_value(version),
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn version(&self) -> &LibcVersion {
        self.version.get_or_init(|| {
            let version = LibcVersion::from_runtime();
            log::debug!("allocator version {:?} (minor {})", version.raw, version.minor);
            version
        })
    }

    pub fn generation(&self) -> LayoutGeneration {
        self.version().generation()
    }

    /// Find the allocator image by scanning down from the bound `malloc`.
    pub fn locate_image(&self) -> Result<ImageBase, ProbeError> {
        let anchor = dl::symbol_address(ANCHOR_SYMBOL)?;
        let memory = LiveMemory::snapshot();
        let image = find_image_base(&memory, anchor, page_size(), self.config.max_scan_pages)?;
        log::debug!(
            "anchor {anchor:#x} -> image base {:#x} ({:?})",
            image.addr,
            image.arch
        );
        match dl::object_containing(anchor) {
            Some(object) if object.base != image.addr => log::warn!(
                "scanned image base {:#x} differs from the loader's {:#x} for {}",
                image.addr,
                object.base,
                object.path
            ),
            Some(object) => log::debug!("allocator image is {}", object.path),
            None => log::warn!("the loader does not know the object containing {anchor:#x}"),
        }
        Ok(image)
    }

    /// Locate `main_arena`. Must be called from the main thread.
    pub fn arena(&self) -> Result<ArenaLocation, ProbeError> {
        let generation = self.generation();
        let links = arena::sample_unsorted_links()?;
        let arena = arena_address(generation, links);
        let image = self.locate_image()?;

        let owner = dl::object_containing(arena).map(|object| object.base);
        if owner != Some(image.addr) {
            return Err(ProbeError::ArenaOutsideImage {
                arena,
                base: image.addr,
            });
        }

        let offset = relative_offset(arena, image.addr);
        log::debug!("{generation:?}: arena {arena:#x}, offset {offset:#x}");
        Ok(ArenaLocation {
            arena,
            image,
            offset,
        })
    }

    pub fn arena_offset(&self) -> Result<isize, ProbeError> {
        Ok(self.arena()?.offset)
    }

    pub fn tcache_enabled(&self) -> Result<bool, ProbeError> {
        let generation = self.generation();
        let slot = tcache::sample_freed_slot()?;
        let enabled = looks_like_tcache_entry(generation, slot);
        log::debug!("{generation:?}: tcache enabled = {enabled}");
        Ok(enabled)
    }

    /// Run every measurement and collect the results.
    pub fn report(&self) -> Result<ProbeReport, ProbeError> {
        let libc_version = self.version().raw.clone();
        let main_arena_offset = self.arena_offset()?;
        let tcache_enable = self.tcache_enabled()?;
        Ok(ProbeReport {
            libc_version,
            main_arena_offset,
            tcache_enable,
        })
    }
}

impl Default for Probe {
    fn default() -> Self {
        Self::new(ProbeConfig::default())
    }
}
