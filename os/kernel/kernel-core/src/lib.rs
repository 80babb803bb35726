//! # Kernel Core
//!
//! Ties the memory layers and the scheduler into one [`KernelContext`] and
//! brings it up in a fixed order:
//!
//! ```text
//!  BootInfo ─▶ validate KernelConfig
//!                     │
//!                     ▼
//!          FrameAllocator (PMM)  ◀── memory map, kernel image, low reservation
//!                     │ frames
//!                     ▼
//!               Vmm (page tables) ◀── bootstrap node pool
//!                     │ heap_initial_pages at KERNEL_HEAP_BASE
//!                     ▼
//!           FreeListHeap in LockedHeap
//!                     │ idle + reclaimer stacks
//!                     ▼
//!                 Scheduler
//! ```
//!
//! Each stage logs one `... ready` line. Any failure aborts the boot with a
//! [`KernelError`] and the caller halts.
//!
//! ## Heap growth
//!
//! [`KernelContext::kmalloc`] extends the heap at its tail when nothing
//! fits, one request at a time, until
//! [`KernelConfig::heap_max_pages`] is reached. Allocations through
//! `GlobalAlloc` never grow the heap: they cannot reach the page tables.
//!
//! ## Publishing
//!
//! On the target the context is published once in a [`GlobalKernel`] so the
//! timer interrupt and the task trampoline can reach it. Host tests skip
//! that and own their contexts directly:
//!
//! ```
//! use kernel_alloc::{FrameAllocator, LockedHeap, SimulatedMemory};
//! use kernel_core::{BootResources, KernelConfig, KernelContext, SimulatedPlatform};
//! use kernel_info::boot::{BootInfo, KernelImage, MemoryRegion};
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_sched::SimulatedSwitch;
//! use kernel_vmem::{Node, SimulatedPhys};
//!
//! let mut info = BootInfo::default();
//! info.memory_map.push(MemoryRegion::new(PhysicalAddress::zero(), 16 << 20));
//! info.kernel_image = KernelImage {
//!     start: PhysicalAddress::new(0x10_0000),
//!     end: PhysicalAddress::new(0x20_0000),
//! };
//!
//! let words = FrameAllocator::bitmap_words(&info.memory_map);
//! let heap: &'static LockedHeap<SimulatedMemory> = Box::leak(Box::new(LockedHeap::empty()));
//! let resources = BootResources::<SimulatedPlatform> {
//!     bitmap: Box::leak(vec![0; words].into_boxed_slice()),
//!     nodes: Box::leak(vec![Node::<512>::EMPTY; 16].into_boxed_slice()),
//!     nodes_phys: PhysicalAddress::new(0x20_0000),
//!     heap,
//!     memory: SimulatedMemory::new(),
//!     phys: SimulatedPhys::new(),
//!     switch: SimulatedSwitch::new(),
//! };
//!
//! let mut kernel = KernelContext::boot(KernelConfig::default(), &info, resources).unwrap();
//! let p = kernel.kmalloc(4000).unwrap();
//! kernel.kfree(p).unwrap();
//! kernel.verify_heap().unwrap();
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod config;
mod context;
mod error;
mod global;
pub mod logging;
mod platform;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod bare_metal;

pub use config::{ConfigError, KernelConfig};
pub use context::{BootResources, KernelContext};
pub use error::{ErrorKind, KernelError};
pub use global::GlobalKernel;
pub use platform::{Platform, SimulatedPlatform};
