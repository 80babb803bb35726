//! # Page Tables
//!
//! Software model of the multi-level translation tree the MMU walks, built
//! from a bootstrap pool of nodes that does not depend on the kernel heap.
//!
//! ## Layout
//!
//! With the hardware shape (4 levels, 512 entries) a 48-bit virtual address
//! splits into four 9-bit table indices and a 12-bit offset:
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  L0   |  L1   |  L2   |  L3   | Offset |
//! ```
//!
//! [`PageTables`] is generic over the number of levels and entries, so the
//! same walk also drives a 2-level, 1024-entry layout (10 + 10 + 12 bits).
//!
//! ## Nodes
//!
//! ```text
//!            Node<N>
//! ┌──────────────────────────┐
//! │ entries:  [PageEntryBits; N]  ← what the MMU reads (physical addresses)
//! │ children: [Option<NodeHandle>; N] ← what the kernel follows
//! └──────────────────────────┘
//! ```
//!
//! Every node lives in a [`NodePool`], a flat array with a bitmap of used
//! slots. A node's physical address is derived from its slot, so storing a
//! child in `entries[i]` and `children[i]` happens together.
//!
//! ## Shared kernel subtree
//!
//! The last top-level slot of every root references one subtree created with
//! [`PageTables::new`]. Mapping the kernel heap through any address space
//! makes it visible in all of them. [`PageTables::destroy`] skips it.
//!
//! ## Frames
//!
//! Leaf frames are owned by the caller; the tree only records them.
//! [`PhysMapper`] reaches frame contents when they have to be zeroed or
//! copied. [`SimulatedPhys`] is the host implementation used by tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

extern crate alloc;

mod bitmap;
mod error;
mod node_pool;
mod page_entry_bits;
mod page_tables;
mod phys_mapper;

pub use crate::bitmap::{Bitmap, words_for};
pub use crate::error::VmemError;
pub use crate::node_pool::{Node, NodeHandle, NodePool};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_tables::{AddressSpace, PageTables, X86PageTables};
pub use crate::phys_mapper::{Frame, PhysMapper, SimulatedPhys};

/// Re-export of the memory layout constants.
pub use kernel_info::memory as info;
