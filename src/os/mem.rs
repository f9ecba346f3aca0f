use std::{
    io,
    ptr::{self, NonNull},
    sync::LazyLock,
};

use libc::{
    c_void, mincore, mmap, munmap, MAP_ANONYMOUS, MAP_FAILED, MAP_NORESERVE, MAP_PRIVATE,
    PROT_READ, PROT_WRITE,
};

use crate::util::{assert::aligned_to, hint::cold, num::round_up};

static PAGE_SIZE: LazyLock<usize> = LazyLock::new(page_size::get);

/// The system page size, queried once.
pub fn page_size() -> usize {
    *PAGE_SIZE
}

/// Test whether the page starting at `page` is mapped in our address space.
///
/// `mincore()` fails with `ENOMEM` for unmapped ranges and never touches the
/// page itself, so this is safe to call on any address. A mapped page may
/// still be `PROT_NONE`; callers only use this on ranges where that does not
/// happen (the text and header segments of a loaded image).
pub fn is_mapped(page: usize) -> bool {
    let page_size = page_size();
    debug_assert!(aligned_to(page, page_size));
    let mut residency = 0u8;
    // SAFETY:
    // - `page` is page-aligned, as `mincore()` requires
    // - the length covers exactly one page, so the kernel writes exactly one
    //   byte into `residency`
    let rc = unsafe { mincore(page as *mut c_void, page_size, &mut residency) };
    rc == 0
}

/// An anonymous read/write mapping, unmapped on drop.
pub struct MmapRegion {
    ptr: NonNull<u8>,
    size: usize,
}

impl MmapRegion {
    /// `mmap()` a read/write, page-aligned region of at least `size` bytes
    /// (rounded up to whole pages, and never less than one page).
    pub fn map_noreserve(size: usize) -> io::Result<MmapRegion> {
        let size = round_up(size.max(1), page_size());
        // SAFETY: anonymous private mapping, no file descriptor involved and
        // no existing memory is replaced because we pass a null hint.
        let ptr = unsafe {
            mmap(
                ptr::null_mut(),
                size,
                PROT_READ | PROT_WRITE,
                MAP_NORESERVE | MAP_ANONYMOUS | MAP_PRIVATE,
                -1,
                0,
            )
        };
        if ptr == MAP_FAILED {
            return cold(|| Err(io::Error::last_os_error()));
        }
        let ptr = NonNull::new(ptr as *mut u8).ok_or_else(|| io::Error::from(io::ErrorKind::Other))?;
        Ok(MmapRegion { ptr, size })
    }

    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY:
        // - The address must be a multiple of the page size, which `mmap()`
        //   guarantees.
        // - We unmap exactly the range we mapped and nobody else unmaps it.
        unsafe {
            munmap(self.ptr.as_ptr() as *mut c_void, self.size);
        }
    }
}
