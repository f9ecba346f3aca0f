//! Deciding whether the per-thread cache (tcache) is in use.
//!
//! A freed small block that lands in an empty tcache bin stores a null `next`
//! link in its first word, mangled with `PROTECT_PTR()` on safe-linking
//! releases. Without tcache the same block goes to the unsorted bin (first word
//! becomes a bin link) or merges into the top chunk (first word keeps the
//! sentinel). Neither of those can look like a null link.

use crate::{
    alloc::manual::{RawBlock, WORD},
    error::ProbeError,
    layout::{LayoutGeneration, TCACHE_FILL_COUNT},
};

/// Request size of the measured block: 256 bytes on 64-bit. Eligible for
/// tcache, too large for the default fastbins.
pub const SMALL_REQUEST: usize = WORD * 32;

pub const SENTINEL: usize = 0xdead_beef;

/// The first word of the probe block after it was freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreedSlot {
    /// Address of the word, i.e. the block's data pointer.
    pub addr: usize,
    pub word: usize,
}

/// Classify a freed slot for the given layout generation.
pub fn looks_like_tcache_entry(generation: LayoutGeneration, slot: FreedSlot) -> bool {
    slot.word == generation.protect_ptr(slot.addr, 0)
}

/// Run the allocation sequence and read the probe block's first word.
///
/// Up to [`TCACHE_FILL_COUNT`] blocks of the same size are taken first, so
/// that the probe block becomes the only entry of its bin even if the runtime
/// left some behind. They are released after the measurement.
pub fn sample_freed_slot() -> Result<FreedSlot, ProbeError> {
    let mut drained = Vec::with_capacity(TCACHE_FILL_COUNT);
    let result = drain_and_sample(&mut drained);
    for block in drained {
        block.free();
    }
    let slot = result?;
    log::debug!("small chunk {:#x}: first word {:#x}", slot.addr, slot.word);
    Ok(slot)
}

fn drain_and_sample(drained: &mut Vec<RawBlock>) -> Result<FreedSlot, ProbeError> {
    for _ in 0..TCACHE_FILL_COUNT {
        drained.push(RawBlock::alloc(SMALL_REQUEST)?);
    }
    let mut probe = RawBlock::alloc(SMALL_REQUEST)?;
    probe.write_word(0, SENTINEL);
    let freed = probe.free();
    // SAFETY: nothing has been allocated since the free, and word 0 is inside
    // the block.
    let word = unsafe { freed.read_word(0) };
    Ok(FreedSlot {
        addr: freed.addr(),
        word,
    })
}
