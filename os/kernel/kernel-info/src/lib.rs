//! # Kernel Layout and Boot Interface
//!
//! Single source of truth for the constants the memory and task core agree
//! on, and for the data the boot loader hands to the kernel.
//!
//! ## Modules
//!
//! ### Boot Information ([`boot`])
//! * **Memory map**: disjoint usable RAM regions, consumed once by the
//!   physical page allocator.
//! * **Kernel image**: physical start/end of the loaded kernel, reserved
//!   together with the low [`RESERVED_LOW_BYTES`](memory::RESERVED_LOW_BYTES).
//!
//! ### Memory Layout ([`memory`])
//! * **Shared kernel slot**: one top-level page-table entry linked into every
//!   address space.
//! * **Fixed stack windows**: user and kernel stacks sit at the same virtual
//!   addresses in every address space.
//! * **Heap window**: base and growth ceiling of the kernel heap.
//! * **Scheduling**: the default time quantum.
//!
//! All layout constants are validated by `const` assertions, so an
//! inconsistent edit fails the build instead of the boot.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
