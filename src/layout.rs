//! The `malloc_state` and tcache layouts the probe knows how to read.
//!
//! Only two facts change between the supported releases: the distance from
//! the start of `main_arena` to the unsorted bin header, and whether tcache
//! links are mangled with safe-linking.

use crate::alloc::manual::WORD;

/// Number of fastbin slots in `malloc_state` (`NFASTBINS`) on both 32- and
/// 64-bit targets.
pub const NFASTBINS: usize = 10;

/// `PROTECT_PTR()` shifts the storage address by this much, independent of
/// the actual page size.
pub const SAFE_LINKING_SHIFT: u32 = 12;

/// Entries a tcache bin holds by default (`TCACHE_FILL_COUNT`).
pub const TCACHE_FILL_COUNT: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutGeneration {
    /// Before 2.26 (and any unparseable version): `mutex`, `flags`, fastbins,
    /// no tcache.
    Classic,
    /// 2.26: tcache appears, arena layout unchanged.
    ThreadCache,
    /// 2.27 to 2.31: `have_fastchunks` is added after `flags`, pushing the
    /// bins down by one word.
    FastchunksFlag,
    /// 2.32 onwards: tcache and fastbin links are protected with
    /// `PROTECT_PTR(pos, ptr) = (pos >> 12) ^ ptr`.
    SafeLinking,
}

impl LayoutGeneration {
    pub const ALL: [LayoutGeneration; 4] = [
        LayoutGeneration::Classic,
        LayoutGeneration::ThreadCache,
        LayoutGeneration::FastchunksFlag,
        LayoutGeneration::SafeLinking,
    ];

    pub fn from_minor(minor: u32) -> Self {
        match minor {
            0..=25 => LayoutGeneration::Classic,
            26 => LayoutGeneration::ThreadCache,
            27..=31 => LayoutGeneration::FastchunksFlag,
            _ => LayoutGeneration::SafeLinking,
        }
    }

    /// Whether `malloc_state` carries the `have_fastchunks` word.
    pub fn has_fastchunks_flag(self) -> bool {
        matches!(
            self,
            LayoutGeneration::FastchunksFlag | LayoutGeneration::SafeLinking
        )
    }

    /// Bytes between the start of `malloc_state` and the address a chunk in
    /// the unsorted bin links back to (`bin_at(av, 1)`).
    ///
    /// `mutex` and `flags` are two `int`s, then the fastbin array; the bin
    /// header sits two words before `bins[0]`, which cancels `top` and
    /// `last_remainder`.
    pub fn unsorted_link_delta(self) -> usize {
        let classic = 4 + 4 + WORD * NFASTBINS;
        if self.has_fastchunks_flag() {
            classic + WORD
        } else {
            classic
        }
    }

    /// Whether freed tcache entries store their `next` link mangled.
    pub fn safe_linking(self) -> bool {
        matches!(self, LayoutGeneration::SafeLinking)
    }

    /// `PROTECT_PTR(pos, ptr)` for this generation; the identity on
    /// generations without safe-linking.
    pub fn protect_ptr(self, pos: usize, ptr: usize) -> usize {
        if self.safe_linking() {
            (pos >> SAFE_LINKING_SHIFT) ^ ptr
        } else {
            ptr
        }
    }
}
