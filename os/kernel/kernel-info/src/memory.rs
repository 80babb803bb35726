//! # Memory Layout
//!
//! Every address space uses the same 4-level, 512-entry layout. The last
//! top-level slot is the shared kernel region; everything below it belongs
//! to the task that owns the address space.
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │   User mappings                 │
//! KERNEL_STACK_BASE     ├─────────────────────────────────┤
//!                       │   Per-task kernel stack (RW, S) │
//! KERNEL_STACK_TOP      ├─────────────────────────────────┤
//!                       │   ...                           │
//! USER_STACK_BASE       ├─────────────────────────────────┤
//!                       │   Per-task user stack (RW, U)   │
//! USER_STACK_TOP        ├─────────────────────────────────┤
//!                       │   (non-canonical hole)          │
//! KERNEL_REGION_BASE    ├─────────────────────────────────┤ top-level slot 511
//!                       │   Shared kernel region          │
//! KERNEL_HEAP_BASE      │   ├ kernel heap window          │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```

use kernel_memory_addresses::PAGE_SIZE;

/// Physical memory below this bound is reserved for the kernel image,
/// legacy BIOS areas and early boot structures and is never handed out.
pub const RESERVED_LOW_BYTES: u64 = 4 * 1024 * 1024;

/// Number of paging levels of the hardware layout.
pub const PAGING_LEVELS: usize = 4;

/// Entries per page-table node in the hardware layout.
pub const ENTRIES_PER_TABLE: usize = 512;

/// Top-level slot whose subtree is shared by every address space.
pub const KERNEL_ROOT_INDEX: usize = 511;

/// First virtual address covered by [`KERNEL_ROOT_INDEX`].
pub const KERNEL_REGION_BASE: u64 = 0xFFFF_FF80_0000_0000;

/// Base of the kernel heap window inside the shared kernel region.
pub const KERNEL_HEAP_BASE: u64 = 0xFFFF_FF80_4000_0000;

/// Pages committed to the kernel heap during boot.
pub const HEAP_INITIAL_PAGES: u64 = 256;

/// Upper bound on the kernel heap window, in pages.
pub const HEAP_MAX_PAGES: u64 = 16 * 1024;

/// Pages of the per-task user stack.
pub const USER_STACK_PAGES: u64 = 16;

/// One past the highest byte of the user stack (the initial user `rsp`).
pub const USER_STACK_TOP: u64 = 0x0000_7FFF_FFFF_0000;

/// Lowest byte of the user stack.
pub const USER_STACK_BASE: u64 = USER_STACK_TOP - USER_STACK_PAGES * PAGE_SIZE;

/// Pages of the per-task kernel stack.
pub const KERNEL_STACK_PAGES: u64 = 4;

/// One past the highest byte of the per-task kernel stack.
pub const KERNEL_STACK_TOP: u64 = 0x0000_7F80_0000_0000;

/// Lowest byte of the per-task kernel stack.
pub const KERNEL_STACK_BASE: u64 = KERNEL_STACK_TOP - KERNEL_STACK_PAGES * PAGE_SIZE;

/// Capacity of the bootstrap page-table node pool.
pub const NODE_POOL_CAPACITY: usize = 256;

/// Maximum number of usable regions accepted from the boot loader.
pub const MAX_MEMORY_REGIONS: usize = 32;

/// Timer ticks a task may run before it is preempted.
pub const QUANTUM_TICKS: u32 = 10;

/// Capacity of the queue of terminated tasks awaiting reclamation.
pub const RECLAIM_QUEUE_CAPACITY: usize = 64;

const _: () = {
    assert!(RESERVED_LOW_BYTES.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_HEAP_BASE >= KERNEL_REGION_BASE);
    assert!(KERNEL_HEAP_BASE.is_multiple_of(PAGE_SIZE));
    assert!(HEAP_INITIAL_PAGES <= HEAP_MAX_PAGES);
    assert!(USER_STACK_TOP.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_STACK_TOP.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_STACK_TOP <= USER_STACK_BASE);
    assert!(ENTRIES_PER_TABLE.is_power_of_two());
    assert!(KERNEL_ROOT_INDEX < ENTRIES_PER_TABLE);
};
