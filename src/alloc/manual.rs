//! Direct `malloc()`/`free()` calls against whatever allocator the dynamic
//! loader bound, bypassing Rust's `GlobalAlloc` so that the exact request
//! sizes reach the allocator untouched.

use std::{mem::size_of, ptr::NonNull};

use crate::{arch::mem::usize_raw_load, error::ProbeError, util::hint::cold};

pub(crate) mod c {
    use libc::{c_void, size_t};

    extern "C" {
        pub fn malloc(size: size_t) -> *mut c_void;
        pub fn free(ptr: *mut c_void);
    }
}

/// The pointer width of this process, `SIZE_SZ` in the allocator's terms.
pub const WORD: usize = size_of::<usize>();

/// `PREV_INUSE | IS_MMAPPED | NON_MAIN_ARENA`
const CHUNK_FLAGS: usize = 0b111;

/// A live, owning heap block with no RAII. It must be given back with
/// [`RawBlock::free`] (or deliberately leaked).
#[derive(Debug)]
pub struct RawBlock {
    data: NonNull<usize>,
    size: usize,
}

impl RawBlock {
    /// `malloc(size)`. A null return is reported as
    /// [`ProbeError::AllocationFailed`]; the caller is expected to give up.
    pub fn alloc(size: usize) -> Result<Self, ProbeError> {
        debug_assert!(size >= WORD);
        // SAFETY: `malloc()` has no preconditions.
        let data = unsafe { c::malloc(size) } as *mut usize;
        match NonNull::new(data) {
            Some(data) => Ok(Self { data, size }),
            None => cold(|| Err(ProbeError::AllocationFailed { size })),
        }
    }

    /// Address of the first data byte (the chunk's `fd` slot once freed).
    pub fn addr(&self) -> usize {
        self.data.as_ptr() as usize
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Size of the chunk backing this block, from the size word the allocator
    /// keeps right before the data (`chunksize()`: the low three bits are
    /// flags).
    pub fn chunk_size(&self) -> usize {
        // SAFETY: every live glibc chunk has its size word one word before
        // the data pointer.
        unsafe { usize_raw_load(self.data.as_ptr().sub(1)) & !CHUNK_FLAGS }
    }

    /// Data address of the chunk physically following this one.
    pub fn next_block_addr(&self) -> usize {
        self.addr() + self.chunk_size()
    }

    /// Store `value` into the `index`th word of the block.
    pub fn write_word(&mut self, index: usize, value: usize) {
        assert!((index + 1) * WORD <= self.size);
        // SAFETY:
        // - `malloc()` returns memory aligned for any fundamental type
        // - the assertion keeps the write inside the `size` bytes we asked for
        // - the block is uniquely owned by `self`
        unsafe { self.data.as_ptr().add(index).write_volatile(value) }
    }

    /// Hand the block back to the allocator. The returned handle only allows
    /// looking at what the allocator wrote into it.
    pub fn free(self) -> FreedBlock {
        let addr = self.addr();
        // SAFETY: `data` came from `malloc()` and is freed exactly once,
        // because `free()` consumes `self`.
        unsafe { c::free(self.data.as_ptr() as _) };
        FreedBlock { addr }
    }
}

/// The address of a block that has been `free()`d. The allocator now owns the
/// memory and has written its free-list links into the first words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreedBlock {
    addr: usize,
}

impl FreedBlock {
    pub fn addr(&self) -> usize {
        self.addr
    }

    /// Read the `index`th word of the freed block.
    ///
    /// # Safety
    ///
    /// - No allocation may have happened since the block was freed, or the
    ///   words may already belong to someone else.
    /// - `index` must be within the size the block was allocated with. The
    ///   allocator never unmaps the first page of a freed chunk, even when it
    ///   merges the chunk into the top of the heap and trims.
    pub unsafe fn read_word(&self, index: usize) -> usize {
        usize_raw_load((self.addr as *const usize).add(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_word_aligned_and_writable() {
        let mut block = RawBlock::alloc(4 * WORD).unwrap();
        assert_eq!(block.addr() % WORD, 0);
        assert_eq!(block.size(), 4 * WORD);
        block.write_word(3, 0xabad1dea);
        let freed = block.free();
        assert_ne!(freed.addr(), 0);
    }

    #[test]
    fn chunk_size_covers_the_request() {
        let block = RawBlock::alloc(32 * WORD).unwrap();
        let chunk = block.chunk_size();
        assert!(chunk >= 32 * WORD);
        assert!(chunk <= 32 * WORD + 4 * WORD);
        assert_eq!(chunk % (2 * WORD), 0);
        assert_eq!(block.next_block_addr(), block.addr() + chunk);
        block.free();
    }

    #[test]
    #[should_panic]
    fn writes_past_the_block_are_rejected() {
        let mut block = RawBlock::alloc(2 * WORD).unwrap();
        block.write_word(2, 1);
    }

    #[test]
    fn absurd_requests_fail_without_aborting() {
        let err = RawBlock::alloc(usize::MAX - 4096).unwrap_err();
        assert!(matches!(err, ProbeError::AllocationFailed { .. }));
    }
}
