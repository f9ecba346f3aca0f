use thiserror::Error;

use crate::image::Arch;

/// Exit status used when the allocator itself refuses to hand out memory.
pub const EXIT_ALLOCATION_FAILED: i32 = 2;

/// Exit status for every other failed measurement.
pub const EXIT_PROBE_FAILED: i32 = 1;

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProbeError {
    /// `malloc()` returned null. The process cannot continue measuring.
    #[error("malloc({size}) failed: out of memory")]
    AllocationFailed { size: usize },

    /// The backward page scan gave up before finding an ELF header.
    #[error(
        "no ELF header found within {scanned} pages below {start:#x} (stopped at {stopped_at:#x})"
    )]
    ImageBaseNotFound {
        start: usize,
        stopped_at: usize,
        scanned: usize,
    },

    #[error("ELF header at {base:#x} has invalid EI_CLASS byte {class:#04x}")]
    BadElfClass { base: usize, class: u8 },

    #[error("ELF header at {base:#x} is {found:?}, but this probe is {expected:?}")]
    ArchMismatch {
        base: usize,
        found: Arch,
        expected: Arch,
    },

    /// The dynamic loader does not know the requested symbol.
    #[error("symbol `{0}` not found by the dynamic loader")]
    SymbolNotFound(&'static str),

    /// The arena derived from the freed block does not live in the allocator
    /// image, e.g. because the probe ran on a thread bound to a secondary
    /// arena.
    #[error("computed arena {arena:#x} does not belong to the allocator image at {base:#x}")]
    ArenaOutsideImage { arena: usize, base: usize },

    /// The measured block merged into the top chunk instead of entering the
    /// unsorted bin, so it carries no bin links.
    #[error("block {chunk:#x} was not linked into the unsorted bin")]
    UnsortedLinkMissing { chunk: usize },

    #[error("could not serialize the probe report")]
    Serialize(#[from] serde_json::Error),
}

impl ProbeError {
    /// The process exit status the binary reports for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProbeError::AllocationFailed { .. } => EXIT_ALLOCATION_FAILED,
            _ => EXIT_PROBE_FAILED,
        }
    }
}
