//! # Kernel Memory Allocation
//!
//! The three memory layers of the kernel, initialized strictly bottom-up:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Heap (free_list)                    │
//! │   • first-fit, split / coalesce, address ordered    │
//! │   • lives in the kernel heap window                 │
//! │   • GlobalAlloc via LockedHeap                      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ pages mapped by
//! ┌─────────────────▼───────────────────────────────────┐
//! │        Virtual Memory Manager (vmm)                 │
//! │   • address spaces with fixed user/kernel stacks    │
//! │   • alloc_pages / unmap_and_free / clone / destroy  │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ frames from
//! ┌─────────────────▼───────────────────────────────────┐
//! │      Physical Page Allocator (frame_alloc)          │
//! │   • one bit per page over the boot memory map       │
//! │   • low memory and kernel image reserved            │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! None of the layers uses global state: each is a value the caller owns,
//! so tests build as many independent instances as they like. The kernel
//! wires them together in `kernel-core`.
//!
//! ## Backing memory
//!
//! The heap never dereferences raw pointers itself. Chunk headers are read
//! and written through [`HeapMemory`]:
//!
//! * [`DirectMemory`]: plain loads and stores, used on the target.
//! * [`SimulatedMemory`]: a sparse word map, used by host tests.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::{FreeListHeap, SimulatedMemory};
//! use kernel_memory_addresses::VirtualAddress;
//!
//! let base = VirtualAddress::new(0xFFFF_FF80_4000_0000);
//! let mut heap = FreeListHeap::new(SimulatedMemory::new(), base, 64 * 1024).unwrap();
//! let p = heap.alloc(4000).unwrap();
//! assert!(heap.contains(p));
//! heap.free(p).unwrap();
//! assert_eq!(heap.stats().free_chunks, 1);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod frame_alloc;
pub mod free_list;
pub mod heap_memory;
pub mod locked_heap;
pub mod phys_mapper;
pub mod vmm;

pub use frame_alloc::{FrameAllocError, FrameAllocator, PageUsage};
pub use free_list::{FreeListHeap, HEADER_SIZE, HeapError, HeapStats};
pub use heap_memory::{DirectMemory, HeapMemory, SimulatedMemory};
pub use locked_heap::LockedHeap;
pub use phys_mapper::OffsetPhysMapper;
pub use vmm::{Vmm, VmmError};
