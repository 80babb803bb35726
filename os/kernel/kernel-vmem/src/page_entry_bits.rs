use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// One raw hardware page-table entry.
///
/// The same layout serves every level: a non-leaf entry stores the physical
/// address of the next table, a leaf entry the physical address of the mapped
/// 4 KiB frame. Only 4 KiB leaves are used, so `large_page` stays clear.
///
/// | Bits  | Field              |
/// |-------|--------------------|
/// | 0     | `present`          |
/// | 1     | `writable`         |
/// | 2     | `user_access`      |
/// | 3     | `write_through`    |
/// | 4     | `cache_disabled`   |
/// | 5     | `accessed`         |
/// | 6     | `dirty`            |
/// | 7     | `large_page`       |
/// | 8     | `global_translation` |
/// | 9–11  | `os_available_low` |
/// | 12–51 | frame address      |
/// | 52–62 | `os_available_high` |
/// | 63    | `no_execute`       |
///
/// ```rust
/// # use kernel_memory_addresses::PhysicalAddress;
/// # use kernel_vmem::PageEntryBits;
/// let e = PageEntryBits::leaf(PhysicalAddress::new(0x0040_3000), true);
/// assert!(e.present() && e.writable() && e.user_access());
/// assert_eq!(e.physical_address().as_u64(), 0x0040_3000);
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Valid entry if set.
    pub present: bool,
    /// Writes allowed if set.
    pub writable: bool,
    /// Ring 3 may access the mapping if set (on every level of the walk).
    pub user_access: bool,
    pub write_through: bool,
    pub cache_disabled: bool,
    /// Set by the CPU on first access.
    pub accessed: bool,
    /// Set by the CPU on first write (leaf only).
    pub dirty: bool,
    /// PS bit; always clear here.
    pub large_page: bool,
    /// Survives CR3 reloads in the TLB (leaf only).
    pub global_translation: bool,
    #[bits(3)]
    pub os_available_low: u8,
    /// Physical address bits [51:12].
    #[bits(40)]
    phys_addr_bits_51_12: u64,
    #[bits(11)]
    pub os_available_high: u16,
    /// Instruction fetches fault if set (requires `EFER.NXE`).
    pub no_execute: bool,
}

impl PageEntryBits {
    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_phys_addr_bits_51_12(phys.as_u64() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_addr_bits_51_12() << 12)
    }

    /// Entry pointing at a next-level table.
    ///
    /// Intermediate entries are always writable; `user` must be set on every
    /// level above a user-accessible leaf.
    #[inline]
    #[must_use]
    pub const fn table(phys: PhysicalAddress, user: bool) -> Self {
        let mut e = Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(user);
        e.set_physical_address(phys);
        e
    }

    /// Writable 4 KiB leaf mapping `phys`.
    #[inline]
    #[must_use]
    pub const fn leaf(phys: PhysicalAddress, user: bool) -> Self {
        let mut e = Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(user)
            .with_no_execute(false);
        e.set_physical_address(phys);
        e
    }
}
