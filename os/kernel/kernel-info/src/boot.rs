//! # Boot Loader Hand-off
//!
//! The boot loader reports usable RAM as a list of disjoint regions plus the
//! physical bounds of the loaded kernel image. Both are consumed exactly once,
//! by the physical page allocator during early boot.

use crate::memory::MAX_MEMORY_REGIONS;
use kernel_memory_addresses::PhysicalAddress;

/// One usable physical memory region as reported by the boot loader.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MemoryRegion {
    /// First byte of the region.
    pub base: PhysicalAddress,
    /// Length of the region in bytes.
    pub length: u64,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(base: PhysicalAddress, length: u64) -> Self {
        Self { base, length }
    }

    /// One past the last byte of the region.
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base.as_u64() + self.length)
    }
}

/// Fixed-capacity list of usable memory regions.
///
/// Kept allocation-free because it is consumed before the heap exists.
#[repr(C)]
#[derive(Clone, Debug)]
pub struct BootMemoryMap {
    regions: [MemoryRegion; MAX_MEMORY_REGIONS],
    len: usize,
}

impl Default for BootMemoryMap {
    fn default() -> Self {
        Self::new()
    }
}

impl BootMemoryMap {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            regions: [MemoryRegion::new(PhysicalAddress::zero(), 0); MAX_MEMORY_REGIONS],
            len: 0,
        }
    }

    /// Append a region. Zero-length regions are ignored.
    ///
    /// Returns `false` if the map is already full.
    pub fn push(&mut self, region: MemoryRegion) -> bool {
        if region.length == 0 {
            return true;
        }
        if self.len == MAX_MEMORY_REGIONS {
            return false;
        }
        self.regions[self.len] = region;
        self.len += 1;
        true
    }

    #[must_use]
    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions[..self.len]
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Link-time bounds of the kernel image in physical memory.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct KernelImage {
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
}

/// Everything the memory core needs from the boot loader.
#[repr(C)]
#[derive(Clone, Debug, Default)]
pub struct BootInfo {
    pub memory_map: BootMemoryMap,
    pub kernel_image: KernelImage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_skips_empty_regions_and_stops_when_full() {
        let mut map = BootMemoryMap::new();
        assert!(map.push(MemoryRegion::new(PhysicalAddress::new(0x1000), 0)));
        assert!(map.is_empty());

        for i in 0..MAX_MEMORY_REGIONS as u64 {
            assert!(map.push(MemoryRegion::new(PhysicalAddress::new(i << 20), 4096)));
        }
        assert!(!map.push(MemoryRegion::new(PhysicalAddress::new(0xdead_0000), 4096)));
        assert_eq!(map.len(), MAX_MEMORY_REGIONS);
        assert_eq!(map.regions()[1].end().as_u64(), (1 << 20) + 4096);
    }
}
