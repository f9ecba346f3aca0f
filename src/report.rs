use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{config::OutputFormat, error::ProbeError, serialize::serde_hex};

/// Everything the probe reports about the allocator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Version string exactly as the C library reports it.
    pub libc_version: String,
    /// Offset of `main_arena` from the start of the allocator image.
    #[serde(with = "serde_hex")]
    pub main_arena_offset: isize,
    pub tcache_enable: bool,
}

impl ProbeReport {
    /// The single output line, without the trailing newline.
    pub fn render(&self, format: OutputFormat) -> Result<String, ProbeError> {
        match format {
            OutputFormat::Compact => Ok(self.to_string()),
            OutputFormat::Json => Ok(serde_json::to_string(self)?),
        }
    }
}

/// The compact form is object-shaped but not strict JSON: the version and
/// offset are printed bare, the way `printf("%s", ...)` and `%p` would.
impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{\"libc_version\": {},\"main_arena_offset\": {},\"tcache_enable\": {}}}",
            self.libc_version,
            serde_hex::format(self.main_arena_offset),
            self.tcache_enable
        )
    }
}
