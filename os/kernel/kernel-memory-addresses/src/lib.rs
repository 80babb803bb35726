//! # Physical and Virtual Memory Address Types
//!
//! Zero-cost wrappers that keep physical addresses, virtual addresses and
//! physical page indices apart at the type level.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in physical memory (RAM or MMIO). |
//! | [`VirtualAddress`] | A byte address translated through the page tables. |
//! | [`PageIndex`] | The number of a 4 KiB physical page frame (`address >> 12`). |
//!
//! The physical page allocator speaks in [`PageIndex`] values, the page-table
//! code stores [`PhysicalAddress`] values in hardware entries, and callers of
//! the mapping API hand in [`VirtualAddress`] values. Conversions between the
//! three are explicit:
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let page = PageIndex::new(0x1234);
//! let pa = page.base();
//! assert_eq!(pa.as_u64(), 0x1234 * PAGE_SIZE);
//! assert_eq!(PageIndex::containing(pa + 17), page);
//!
//! let va = VirtualAddress::new(0xFFFF_FF80_0000_1234);
//! assert_eq!(va.page_offset(), 0x234);
//! assert_eq!(va.align_down().as_u64(), 0xFFFF_FF80_0000_1000);
//! ```
//!
//! All types are `#[repr(transparent)]` over `u64` and derive `Copy`, `Eq`,
//! `Ord` and `Hash`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod page_index;
mod physical_address;
mod virtual_address;

pub use page_index::PageIndex;
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// Size of the base page in bytes (4 KiB).
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`, the number of in-page offset bits.
pub const PAGE_SHIFT: u32 = 12;

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(8191, 4096), 4096);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two and `x + a - 1` must not overflow.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(1, 4096), 4096);
/// assert_eq!(align_up(4096, 4096), 4096);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    (x + a - 1) & !(a - 1)
}

/// Number of whole pages needed to hold `bytes`.
#[inline(always)]
#[must_use]
pub const fn pages_for(bytes: u64) -> u64 {
    bytes.div_ceil(PAGE_SIZE)
}
