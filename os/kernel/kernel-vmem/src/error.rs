use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Failures of the page-table layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VmemError {
    /// The bootstrap node pool has no free node left.
    #[error("page-table node pool exhausted")]
    OutOfNodes,
    /// A node was freed that the pool does not consider allocated.
    #[error("page-table node pool corrupt: node {index} is not allocated")]
    CorruptNodePool { index: usize },
    /// More nodes were supplied than the pool's bitmap can track.
    #[error("node pool of {given} nodes exceeds capacity {capacity}")]
    PoolTooLarge { given: usize, capacity: usize },
    #[error("virtual address {0} is not page aligned")]
    UnalignedVirtual(VirtualAddress),
    #[error("physical address {0} is not page aligned")]
    UnalignedPhysical(PhysicalAddress),
    /// The address range wraps around the top of the address space.
    #[error("range of {count} pages at {start} overflows the address space")]
    RangeOverflow { start: VirtualAddress, count: u64 },
    #[error("virtual address {0} is not mapped")]
    NotMapped(VirtualAddress),
    /// User-accessible mappings are refused inside the shared kernel slot.
    #[error("virtual address {0} lies in the shared kernel region")]
    KernelRegion(VirtualAddress),
    /// The address-space handle does not name a live root table.
    #[error("address space handle is stale")]
    StaleAddressSpace,
}
