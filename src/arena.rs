//! Recovering the address of `main_arena` from a chunk in the unsorted bin.
//!
//! A freed chunk that is too big for tcache and fastbins, and not adjacent to
//! the top chunk, is pushed onto the unsorted bin. Its `bk` link then points
//! at the bin header `bin_at(av, 1)`, which lives inside the arena at a
//! distance fixed by the layout generation. Its `fd` link points at the same
//! header when the bin was empty, or at the previous first chunk otherwise.

use crate::{
    alloc::manual::{FreedBlock, RawBlock, WORD},
    error::ProbeError,
    layout::LayoutGeneration,
};

/// Request size of the measured block: `0x800` bytes on 64-bit. Above the
/// tcache and fastbin limits, far below the mmap threshold.
pub const LARGE_REQUEST: usize = WORD * 128 * 2;

/// Request size of the block that separates the measured block from the top
/// chunk.
pub const GUARD_REQUEST: usize = WORD;

/// Give up looking for an adjacent guard after this many small blocks.
pub const MAX_GUARDS: usize = 64;

/// The two free-list links of a chunk sitting in the unsorted bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsortedLinks {
    pub fd: usize,
    pub bk: usize,
}

impl UnsortedLinks {
    /// `bin_at(av, 1)`. Insertion at the head always leaves `bk` pointing at
    /// the header.
    pub fn header(&self) -> usize {
        self.bk
    }

    /// `true` if the bin held other chunks before ours was freed.
    pub fn bin_was_occupied(&self) -> bool {
        self.fd != self.bk
    }

    /// Accept the links only if the allocator actually wrote them. A block
    /// folded into the top chunk still holds `marker`, the word written
    /// through it before the free.
    pub fn written_over(self, chunk: usize, marker: usize) -> Result<Self, ProbeError> {
        if self.fd == marker {
            return Err(ProbeError::UnsortedLinkMissing { chunk });
        }
        Ok(self)
    }
}

/// Address of the arena whose unsorted bin `links` were read from.
pub fn arena_address(generation: LayoutGeneration, links: UnsortedLinks) -> usize {
    links
        .header()
        .wrapping_sub(generation.unsorted_link_delta())
}

/// Signed distance from `base` to `arena`.
pub fn relative_offset(arena: usize, base: usize) -> isize {
    arena.wrapping_sub(base) as isize
}

/// Run the allocation sequence and read the freed block's links.
///
/// Must run on the main thread: any other thread may be served by a secondary
/// arena, whose address says nothing about the allocator image.
pub fn sample_unsorted_links() -> Result<UnsortedLinks, ProbeError> {
    let mut guards = Vec::with_capacity(MAX_GUARDS);
    let result = guarded_sample(&mut guards);
    for guard in guards {
        guard.free();
    }
    let (freed, links) = result?;
    log::debug!(
        "unsorted chunk {:#x}: fd={:#x} bk={:#x}",
        freed.addr(),
        links.fd,
        links.bk
    );
    if links.bin_was_occupied() {
        log::warn!(
            "unsorted bin was not empty (fd={:#x}), using bk={:#x} as the bin header",
            links.fd,
            links.bk
        );
    }
    Ok(links)
}

fn guarded_sample(guards: &mut Vec<RawBlock>) -> Result<(FreedBlock, UnsortedLinks), ProbeError> {
    let mut large = RawBlock::alloc(LARGE_REQUEST)?;
    let boundary = large.next_block_addr();
    // Small requests are served from tcache and fastbins first; keep asking
    // until one comes from right behind the large block.
    while guards.len() < MAX_GUARDS {
        let guard = match RawBlock::alloc(GUARD_REQUEST) {
            Ok(guard) => guard,
            Err(err) => {
                large.free();
                return Err(err);
            }
        };
        let adjacent = guard.addr() == boundary;
        guards.push(guard);
        if adjacent {
            break;
        }
    }
    let marker = guards.last().map_or(boundary, RawBlock::addr);
    large.write_word(0, marker);
    let freed = large.free();
    // SAFETY: nothing has been allocated since the free, and both words lie
    // within the `LARGE_REQUEST` bytes of the block.
    let links = unsafe {
        UnsortedLinks {
            fd: freed.read_word(0),
            bk: freed.read_word(1),
        }
    };
    Ok((freed, links.written_over(freed.addr(), marker)?))
}
