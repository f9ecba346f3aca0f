//! Loads from memory we do not own in the Rust sense: freed heap blocks and
//! the header pages of the allocator image. These locations have **no
//! provenance** as far as the abstract machine is concerned, so every read goes
//! through a single instruction the compiler cannot reason about.

/// Read a single byte from `src`. `src` can have **no provenance**
///
/// # Safety
/// - `src` must be mapped and readable, otherwise you get a SIGSEGV.
#[inline(always)]
pub unsafe fn u8_raw_load(src: *const u8) -> u8 {
    debug_assert!(!src.is_null());

    #[cfg(target_arch = "x86_64")]
    {
        use std::arch::asm;

        let dst: u8;
        unsafe {
            asm! {
                "mov {dst}, byte ptr [{src}]",
                src = in(reg) src,
                dst = out(reg_byte) dst,
                options(nostack, preserves_flags, readonly),
            }
        }
        dst
    }

    #[cfg(not(target_arch = "x86_64"))]
    unsafe {
        std::ptr::read_volatile(src)
    }
}

/// Read a single `usize` from `src`. `src` can have **no provenance**
///
/// # Safety
/// - `src` must be mapped and readable.
/// - Reading a freed heap block is fine here: the allocator still owns the
///   memory and keeps it mapped, we just look at what it wrote.
///
/// # Panics
/// - In debug mode if `src` is `NULL`
/// - In debug mode if `src` is misaligned
#[inline(always)]
pub unsafe fn usize_raw_load(src: *const usize) -> usize {
    debug_assert!(src.is_aligned());
    debug_assert!(!src.is_null());

    #[cfg(target_arch = "x86_64")]
    {
        use std::arch::asm;

        let dst: usize;
        unsafe {
            asm! {
                "mov {dst}, qword ptr [{src}]",
                src = in(reg) src,
                dst = out(reg) dst,
                options(nostack, preserves_flags, readonly),
            }
        }
        dst
    }

    #[cfg(not(target_arch = "x86_64"))]
    unsafe {
        std::ptr::read_volatile(src)
    }
}

/// Copy `N` bytes starting at `src` out of memory we have no provenance for.
///
/// # Safety
/// - All of `src..src + N` must be mapped and readable.
#[inline(always)]
pub unsafe fn bytes_raw_load<const N: usize>(src: *const u8) -> [u8; N] {
    let mut dst = [0u8; N];
    for (i, byte) in dst.iter_mut().enumerate() {
        *byte = u8_raw_load(src.add(i));
    }
    dst
}
