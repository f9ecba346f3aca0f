//! Measure the glibc allocator this process is running against: where its
//! `main_arena` lives relative to the library's load address, and whether the
//! per-thread cache is active. Everything is derived from the side effects of
//! ordinary `malloc()`/`free()` calls, without debug symbols.

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
compile_error!("mallocprobe measures glibc and only builds for linux-gnu targets.");

pub mod alloc;
pub mod arch;
pub mod arena;
pub mod config;
pub mod error;
pub mod image;
pub mod layout;
pub mod os;
pub mod probe;
pub mod report;
pub mod serialize;
pub mod tcache;
pub mod util;
pub mod version;

pub use config::{OutputFormat, ProbeConfig};
pub use error::ProbeError;
pub use probe::{ArenaLocation, Probe};
pub use report::ProbeReport;
