//! Thin wrappers around the dynamic loader's introspection calls.

use std::{ffi::CStr, mem::MaybeUninit};

use libc::{c_void, dladdr, dlsym, Dl_info, RTLD_DEFAULT};

use crate::error::ProbeError;

/// What the loader knows about the object containing some address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedObject {
    /// Lowest mapped address of the object (`dli_fbase`).
    pub base: usize,
    /// Path the object was loaded from (`dli_fname`).
    pub path: String,
}

/// Resolve `name` in the global scope, the way an undefined reference in the
/// executable would be bound.
pub fn symbol_address(name: &'static CStr) -> Result<usize, ProbeError> {
    // SAFETY: `name` is a valid NUL-terminated string; `RTLD_DEFAULT` is a
    // pseudo-handle that is always valid.
    let addr = unsafe { dlsym(RTLD_DEFAULT, name.as_ptr()) };
    if addr.is_null() {
        let name = name.to_str().unwrap_or("<non-utf8>");
        return Err(ProbeError::SymbolNotFound(name));
    }
    Ok(addr as usize)
}

/// Ask the loader which object `addr` belongs to. Returns `None` for
/// addresses outside every loaded object (heap, stack, anonymous maps).
pub fn object_containing(addr: usize) -> Option<LoadedObject> {
    let mut info = MaybeUninit::<Dl_info>::zeroed();
    // SAFETY: `dladdr()` only inspects loader bookkeeping for `addr` and fills
    // `info` on success.
    let found = unsafe { dladdr(addr as *const c_void, info.as_mut_ptr()) };
    if found == 0 {
        return None;
    }
    // SAFETY: `dladdr()` returned non-zero, so `info` is initialized.
    let info = unsafe { info.assume_init() };
    let path = if info.dli_fname.is_null() {
        String::new()
    } else {
        // SAFETY: the loader hands back a NUL-terminated path that lives as
        // long as the object stays loaded.
        unsafe { CStr::from_ptr(info.dli_fname) }
            .to_string_lossy()
            .into_owned()
    };
    Some(LoadedObject {
        base: info.dli_fbase as usize,
        path,
    })
}
