use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// CR3, the address-space root register (PCID disabled).
///
/// Holds the physical base of the top-level page table plus cache-control
/// flags for the table walk. A task's saved register file keeps one of these
/// so that switching to the task also switches its address space.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Cr3 {
    /// Bits 0-2: reserved, must be 0.
    #[bits(3)]
    __: u8,

    /// Bit 3, PWT: write-through caching for the root table.
    pub pwt: bool,

    /// Bit 4, PCD: cache disable for the root table.
    pub pcd: bool,

    /// Bits 5-11: reserved, must be 0 when written.
    #[bits(7)]
    __: u8,

    /// Bits 12-51: root table physical base >> 12.
    #[bits(40)]
    root_base_4k: u64,

    /// Bits 52-63: reserved.
    #[bits(12)]
    __: u16,
}

impl Cr3 {
    /// Build a `Cr3` value from the physical base of a root table.
    ///
    /// `root` must be 4 KiB-aligned.
    #[must_use]
    pub fn from_root(root: PhysicalAddress) -> Self {
        debug_assert!(root.is_page_aligned(), "root table must be 4K-aligned");
        Self::new().with_root_base_4k(root.as_u64() >> 12)
    }

    /// Physical base of the root table.
    #[must_use]
    pub fn root(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.root_base_4k() << 12)
    }
}
