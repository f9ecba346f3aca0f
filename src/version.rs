//! Reading the glibc version the process is actually running against.

use std::ffi::CStr;

use crate::layout::LayoutGeneration;

mod c {
    use libc::c_char;

    extern "C" {
        pub fn gnu_get_libc_version() -> *const c_char;
    }
}

/// The runtime-reported allocator version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibcVersion {
    /// The string exactly as `gnu_get_libc_version()` reports it.
    pub raw: String,
    /// Minor component of `raw`; `0` if `raw` could not be parsed.
    pub minor: u32,
}

impl LibcVersion {
    /// Query the version string from the C library linked into this process.
    pub fn from_runtime() -> Self {
        // SAFETY: `gnu_get_libc_version()` returns a pointer to a static,
        // NUL-terminated string.
        let raw = unsafe { CStr::from_ptr(c::gnu_get_libc_version()) }
            .to_string_lossy()
            .into_owned();
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let minor = parse_minor(&raw);
        if minor == 0 {
            log::warn!("could not read a minor version from {raw:?}, assuming the legacy layout");
        }
        Self { raw, minor }
    }

    pub fn generation(&self) -> LayoutGeneration {
        LayoutGeneration::from_minor(self.minor)
    }
}

/// Extract `<minor>` from `"<major>.<minor>[...]"`.
///
/// Mirrors `sscanf(s, "%*u.%u")`: leading whitespace is skipped, the major must
/// be digits, then a literal `.`, then the leading digits of the minor. Any
/// mismatch yields `0`.
pub fn parse_minor(version: &str) -> u32 {
    let Some((major, rest)) = version.trim_start().split_once('.') else {
        return 0;
    };
    if major.is_empty() || !major.bytes().all(|b| b.is_ascii_digit()) {
        return 0;
    }
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    rest[..digits].parse().unwrap_or(0)
}
