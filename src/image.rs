//! Locating the start of a loaded ELF image from an address inside it.
//!
//! The loader always maps an image's ELF header at the very start of its
//! lowest segment, so walking backwards page by page from any address in the
//! image eventually lands on `\x7fELF`.
//!
//! Known limitation: a page in between that happens to start with those four
//! bytes is reported as the base.

use crate::{
    arch::mem::bytes_raw_load,
    error::ProbeError,
    os::{
        maps::{self_maps, Mapping},
        mem::is_mapped,
    },
    util::{assert::aligned_to, num::round_down},
};

pub const ELF_MAGIC: [u8; 4] = *b"\x7fELF";

/// Offset of `e_ident[EI_CLASS]` in the ELF header.
const EI_CLASS: usize = 4;

/// Bytes of the header we look at: the magic and the class byte.
pub const HEADER_PREFIX: usize = EI_CLASS + 1;

/// Default cap on how far below the anchor the scan may go. 16384 pages is
/// 64 MiB with 4 KiB pages, more than the text of any C library.
pub const DEFAULT_MAX_SCAN_PAGES: usize = 16384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86,
    X64,
}

impl Arch {
    /// The class of images this process can have loaded.
    pub const fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            Arch::X64
        } else {
            Arch::X86
        }
    }

    pub fn from_elf_class(class: u8) -> Option<Self> {
        match class {
            1 => Some(Arch::X86),
            2 => Some(Arch::X64),
            _ => None,
        }
    }

    pub fn elf_class(self) -> u8 {
        match self {
            Arch::X86 => 1,
            Arch::X64 => 2,
        }
    }
}

/// Where page headers are read from. [`LiveMemory`] is our own address space;
/// tests substitute synthetic images.
pub trait PageSource {
    /// Whether `page` can be read without faulting.
    fn is_readable(&self, page: usize) -> bool;

    /// The first [`HEADER_PREFIX`] bytes of `page`. Only called on pages for
    /// which [`PageSource::is_readable`] returned `true`.
    fn header(&self, page: usize) -> [u8; HEADER_PREFIX];
}

/// The address space of the running process.
///
/// Readability comes from a `/proc/self/maps` snapshot when one is available:
/// segments padded with `PROT_NONE` gaps are mapped but fault on read. Without
/// procfs, `mincore()` still tells mapped from unmapped pages.
#[derive(Debug, Clone)]
pub enum LiveMemory {
    Maps(Vec<Mapping>),
    Residency,
}

impl LiveMemory {
    /// Capture the current mappings. Take the snapshot right before scanning;
    /// a probe does not map or unmap images in between.
    pub fn snapshot() -> Self {
        match self_maps() {
            Ok(maps) => LiveMemory::Maps(maps),
            Err(err) => {
                log::debug!("/proc/self/maps unavailable ({err}), falling back to mincore()");
                LiveMemory::Residency
            }
        }
    }

    /// The mapping containing `addr`, if a snapshot is available.
    pub fn mapping(&self, addr: usize) -> Option<&Mapping> {
        match self {
            LiveMemory::Maps(maps) => maps.iter().find(|m| m.range.contains(&addr)),
            LiveMemory::Residency => None,
        }
    }
}

impl PageSource for LiveMemory {
    fn is_readable(&self, page: usize) -> bool {
        match self {
            LiveMemory::Maps(_) => self.mapping(page).is_some_and(Mapping::readable),
            LiveMemory::Residency => is_mapped(page),
        }
    }

    fn header(&self, page: usize) -> [u8; HEADER_PREFIX] {
        // SAFETY: `is_readable` vouched for the page and the prefix is far
        // smaller than a page.
        unsafe { bytes_raw_load(page as *const u8) }
    }
}

/// The page-aligned start of a loaded image and the class its header declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBase {
    pub addr: usize,
    pub arch: Arch,
}

/// Find the ELF header at or below `addr`, stepping back one page at a time
/// for at most `max_pages` pages.
///
/// Stops with [`ProbeError::ImageBaseNotFound`] when the budget runs out, when
/// the next candidate page is unmapped, or at address zero.
pub fn find_image_base<S>(
    source: &S,
    addr: usize,
    page_size: usize,
    max_pages: usize,
) -> Result<ImageBase, ProbeError>
where
    S: PageSource + ?Sized,
{
    debug_assert!(page_size.is_power_of_two());
    let start = round_down(addr, page_size);
    let mut page = start;
    for scanned in 0..=max_pages {
        if !source.is_readable(page) {
            return Err(ProbeError::ImageBaseNotFound {
                start,
                stopped_at: page,
                scanned,
            });
        }
        let header = source.header(page);
        if header[..ELF_MAGIC.len()] == ELF_MAGIC {
            debug_assert!(aligned_to(page, page_size));
            return image_at(page, header[EI_CLASS]);
        }
        if page < page_size {
            return Err(ProbeError::ImageBaseNotFound {
                start,
                stopped_at: page,
                scanned,
            });
        }
        page -= page_size;
    }
    Err(ProbeError::ImageBaseNotFound {
        start,
        stopped_at: page + page_size,
        scanned: max_pages,
    })
}

fn image_at(base: usize, class: u8) -> Result<ImageBase, ProbeError> {
    let arch = Arch::from_elf_class(class).ok_or(ProbeError::BadElfClass { base, class })?;
    if arch != Arch::native() {
        return Err(ProbeError::ArchMismatch {
            base,
            found: arch,
            expected: Arch::native(),
        });
    }
    Ok(ImageBase { addr: base, arch })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rstest::rstest;

    use super::*;
    use crate::os::{
        dl::{object_containing, symbol_address},
        mem::{page_size, MmapRegion},
    };

    const PAGE: usize = 0x1000;
    const BASE: usize = 0x3400_0000;

    /// A run of readable pages, some of which carry a header prefix.
    struct SyntheticImage {
        lo: usize,
        hi: usize,
        headers: BTreeMap<usize, [u8; HEADER_PREFIX]>,
    }

    impl SyntheticImage {
        fn new(base: usize, pages: usize) -> Self {
            let mut headers = BTreeMap::new();
            headers.insert(base, elf_header(Arch::native().elf_class()));
            Self {
                lo: base,
                hi: base + pages * PAGE,
                headers,
            }
        }
    }

    impl PageSource for SyntheticImage {
        fn is_readable(&self, page: usize) -> bool {
            (self.lo..self.hi).contains(&page)
        }

        fn header(&self, page: usize) -> [u8; HEADER_PREFIX] {
            self.headers.get(&page).copied().unwrap_or_default()
        }
    }

    fn elf_header(class: u8) -> [u8; HEADER_PREFIX] {
        let [a, b, c, d] = ELF_MAGIC;
        [a, b, c, d, class]
    }

    #[rstest]
    #[case(0, 0)]
    #[case(0, 0x123)]
    #[case(1, 0)]
    #[case(7, 0xfff)]
    #[case(300, 0x8)]
    fn scan_steps_back_exactly_k_pages(#[case] k: usize, #[case] within: usize) {
        let image = SyntheticImage::new(BASE, 512);
        let addr = BASE + k * PAGE + within;
        let found = find_image_base(&image, addr, PAGE, DEFAULT_MAX_SCAN_PAGES).unwrap();
        assert_eq!(found.addr, addr - within - k * PAGE);
        assert_eq!(found.addr, BASE);
        assert!(aligned_to(found.addr, PAGE));
        assert_eq!(found.arch, Arch::native());
    }

    #[test]
    fn nearest_header_wins() {
        let mut image = SyntheticImage::new(BASE, 64);
        let spurious = BASE + 10 * PAGE;
        image
            .headers
            .insert(spurious, elf_header(Arch::native().elf_class()));
        let found = find_image_base(&image, BASE + 20 * PAGE, PAGE, 64).unwrap();
        assert_eq!(found.addr, spurious);
    }

    #[test]
    fn scan_budget_is_enforced() {
        let image = SyntheticImage::new(BASE, 64);
        let err = find_image_base(&image, BASE + 40 * PAGE, PAGE, 39).unwrap_err();
        match err {
            ProbeError::ImageBaseNotFound {
                start,
                stopped_at,
                scanned,
            } => {
                assert_eq!(start, BASE + 40 * PAGE);
                assert_eq!(stopped_at, BASE + PAGE);
                assert_eq!(scanned, 39);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(find_image_base(&image, BASE + 40 * PAGE, PAGE, 40).is_ok());
    }

    #[test]
    fn unmapped_page_stops_the_scan() {
        let mut image = SyntheticImage::new(BASE, 64);
        image.headers.clear();
        let err = find_image_base(&image, BASE + 3 * PAGE, PAGE, 100).unwrap_err();
        assert!(matches!(
            err,
            ProbeError::ImageBaseNotFound {
                stopped_at,
                scanned: 4,
                ..
            } if stopped_at == BASE - PAGE
        ));
    }

    #[test]
    fn foreign_and_broken_classes_are_rejected() {
        let mut image = SyntheticImage::new(BASE, 4);
        image.headers.insert(BASE, elf_header(9));
        let err = find_image_base(&image, BASE + PAGE, PAGE, 4).unwrap_err();
        assert!(matches!(err, ProbeError::BadElfClass { class: 9, .. }));

        let foreign = match Arch::native() {
            Arch::X64 => Arch::X86,
            Arch::X86 => Arch::X64,
        };
        image.headers.insert(BASE, elf_header(foreign.elf_class()));
        let err = find_image_base(&image, BASE + PAGE, PAGE, 4).unwrap_err();
        assert!(matches!(err, ProbeError::ArchMismatch { found, .. } if found == foreign));
    }

    #[test]
    fn live_scan_finds_a_planted_header() {
        let ps = page_size();
        let region = MmapRegion::map_noreserve(4 * ps).unwrap();
        let header = elf_header(Arch::native().elf_class());
        // SAFETY: the region is ours, writable, and at least a page long.
        unsafe {
            region
                .as_mut_ptr()
                .copy_from_nonoverlapping(header.as_ptr(), header.len())
        };
        for memory in [LiveMemory::snapshot(), LiveMemory::Residency] {
            let found = find_image_base(&memory, region.addr() + 3 * ps + 17, ps, 8).unwrap();
            assert_eq!(found.addr, region.addr());
        }
    }

    #[test]
    fn live_scan_respects_the_budget() {
        let ps = page_size();
        let region = MmapRegion::map_noreserve(4 * ps).unwrap();
        let memory = LiveMemory::snapshot();
        let err = find_image_base(&memory, region.addr() + 3 * ps, ps, 3).unwrap_err();
        assert!(matches!(err, ProbeError::ImageBaseNotFound { scanned: 3, .. }));
    }

    #[test]
    fn live_scan_from_malloc_agrees_with_the_loader() {
        let anchor = symbol_address(c"malloc").unwrap();
        let memory = LiveMemory::snapshot();
        let found =
            find_image_base(&memory, anchor, page_size(), DEFAULT_MAX_SCAN_PAGES).unwrap();
        let object = object_containing(anchor).unwrap();
        assert_eq!(found.addr, object.base);
        let mapping = memory.mapping(found.addr).unwrap();
        assert_eq!(mapping.range.start, found.addr);
    }
}
