//! `/proc/self/maps`, reduced to what the image scan needs: which ranges are
//! readable.

use std::ops::Range;

use procfs::{
    process::{MMPermissions, MMapPath, MemoryMap, Process},
    ProcResult,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub range: Range<usize>,
    pub perms: MMPermissions,
    pub pathname: MMapPath,
}

impl Mapping {
    pub fn readable(&self) -> bool {
        self.perms.contains(MMPermissions::READ)
    }

    pub fn writable(&self) -> bool {
        self.perms.contains(MMPermissions::WRITE)
    }
}

impl From<MemoryMap> for Mapping {
    fn from(map: MemoryMap) -> Self {
        // Addresses of our own mappings always fit the native word.
        let (start, end) = map.address;
        Mapping {
            range: start as usize..end as usize,
            perms: map.perms,
            pathname: map.pathname,
        }
    }
}

/// Snapshot of the current process's mappings.
pub fn self_maps() -> ProcResult<Vec<Mapping>> {
    let maps = Process::myself()?.maps()?;
    Ok(maps.into_iter().map(Mapping::from).collect())
}
