//! Generic multi-level page-table tree.

use crate::node_pool::{NodeHandle, NodePool};
use crate::{PageEntryBits, VmemError};
use kernel_info::memory::{ENTRIES_PER_TABLE, PAGING_LEVELS};
use kernel_memory_addresses::{PAGE_SHIFT, PAGE_SIZE, PhysicalAddress, VirtualAddress};
use log::{debug, trace, warn};

/// The hardware layout: four levels of 512 entries.
pub type X86PageTables<'a> = PageTables<'a, PAGING_LEVELS, ENTRIES_PER_TABLE>;

/// Handle to the root table of one address space.
///
/// Carries the root node's generation, so the handle goes stale for good
/// once the space is destroyed, even after the node is reused.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct AddressSpace {
    root: NodeHandle,
    generation: u32,
}

impl AddressSpace {
    #[inline]
    #[must_use]
    pub const fn root(self) -> NodeHandle {
        self.root
    }
}

/// Every address space built from one node pool, plus the shared kernel subtree.
///
/// `LEVELS` tables of `N` entries each translate `PAGE_SHIFT + LEVELS * log2(N)`
/// bits of virtual address. The last top-level slot (`N - 1`) of every root
/// points at the same subtree, so kernel mappings made through any address
/// space are visible in all of them. That subtree is never freed.
pub struct PageTables<'a, const LEVELS: usize, const N: usize> {
    pool: NodePool<'a, N>,
    shared: NodeHandle,
}

impl<'a, const LEVELS: usize, const N: usize> PageTables<'a, LEVELS, N> {
    const SHAPE_OK: () = assert!(N.is_power_of_two() && N > 1 && LEVELS >= 2);

    /// Top-level slot holding the shared kernel subtree.
    pub const SHARED_INDEX: usize = N - 1;

    #[allow(clippy::cast_possible_truncation)]
    const INDEX_BITS: u32 = N.trailing_zeros();

    /// Sets up the shared kernel subtree.
    ///
    /// # Errors
    /// [`VmemError::OutOfNodes`] if the pool is empty.
    pub fn new(mut pool: NodePool<'a, N>) -> Result<Self, VmemError> {
        let () = Self::SHAPE_OK;
        let shared = pool.alloc_node()?;
        debug!(
            "page tables: {LEVELS} levels x {N} entries, {} nodes in pool",
            pool.capacity()
        );
        Ok(Self { pool, shared })
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn shift(level: usize) -> u32 {
        PAGE_SHIFT + Self::INDEX_BITS * (LEVELS - 1 - level) as u32
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn index(va: VirtualAddress, level: usize) -> usize {
        ((va.as_u64() >> Self::shift(level)) as usize) & (N - 1)
    }

    /// Whether `va` falls into the shared kernel slot.
    #[must_use]
    pub const fn is_shared(va: VirtualAddress) -> bool {
        Self::index(va, 0) == Self::SHARED_INDEX
    }

    /// Allocates a new root with the shared kernel subtree linked in.
    ///
    /// # Errors
    /// [`VmemError::OutOfNodes`] if the pool is exhausted.
    pub fn create_root(&mut self) -> Result<AddressSpace, VmemError> {
        let root = self.pool.alloc_node()?;
        let shared_phys = self.pool.phys(self.shared);
        let node = self.pool.node_mut(root);
        node.entries[Self::SHARED_INDEX] = PageEntryBits::table(shared_phys, false);
        node.children[Self::SHARED_INDEX] = Some(self.shared);
        Ok(AddressSpace {
            root,
            generation: self.pool.generation(root),
        })
    }

    fn is_live(&self, space: AddressSpace) -> bool {
        self.pool.contains(space.root) && self.pool.generation(space.root) == space.generation
    }

    fn check_space(&self, space: AddressSpace) -> Result<(), VmemError> {
        if self.is_live(space) {
            Ok(())
        } else {
            Err(VmemError::StaleAddressSpace)
        }
    }

    fn check_range(virt: VirtualAddress, count: u64) -> Result<(), VmemError> {
        if !virt.is_page_aligned() {
            return Err(VmemError::UnalignedVirtual(virt));
        }
        count
            .checked_mul(PAGE_SIZE)
            .and_then(|bytes| virt.as_u64().checked_add(bytes))
            .map(|_| ())
            .ok_or(VmemError::RangeOverflow { start: virt, count })
    }

    /// Physical address of the root table (the value loaded into CR3).
    ///
    /// # Errors
    /// [`VmemError::StaleAddressSpace`] if `space` was destroyed.
    pub fn root_phys(&self, space: AddressSpace) -> Result<PhysicalAddress, VmemError> {
        self.check_space(space)?;
        Ok(self.pool.phys(space.root))
    }

    /// Last-level table covering `va`, creating missing levels on the way.
    fn ensure_leaf_table(
        &mut self,
        space: AddressSpace,
        va: VirtualAddress,
        user: bool,
    ) -> Result<NodeHandle, VmemError> {
        let mut node = space.root;
        for level in 0..LEVELS - 1 {
            let idx = Self::index(va, level);
            node = if let Some(child) = self.pool.node(node).children[idx] {
                if user {
                    self.pool.node_mut(node).entries[idx].set_user_access(true);
                }
                child
            } else {
                let child = self.pool.alloc_node()?;
                let phys = self.pool.phys(child);
                let parent = self.pool.node_mut(node);
                parent.entries[idx] = PageEntryBits::table(phys, user);
                parent.children[idx] = Some(child);
                child
            };
        }
        Ok(node)
    }

    fn find_leaf_table(&self, space: AddressSpace, va: VirtualAddress) -> Option<NodeHandle> {
        let mut node = space.root;
        for level in 0..LEVELS - 1 {
            node = self.pool.node(node).children[Self::index(va, level)]?;
        }
        Some(node)
    }

    fn map_one(
        &mut self,
        space: AddressSpace,
        phys: PhysicalAddress,
        virt: VirtualAddress,
        user: bool,
    ) -> Result<(), VmemError> {
        if user && Self::is_shared(virt) {
            return Err(VmemError::KernelRegion(virt));
        }
        let table = self.ensure_leaf_table(space, virt, user)?;
        let slot = &mut self.pool.node_mut(table).entries[Self::index(virt, LEVELS - 1)];
        if slot.present() {
            trace!("remapping {virt}: {} -> {phys}", slot.physical_address());
        }
        *slot = PageEntryBits::leaf(phys, user);
        Ok(())
    }

    /// Maps `count` pages starting at `virt` onto consecutive frames starting at `phys`.
    ///
    /// Missing intermediate tables are taken from the node pool. An existing
    /// mapping of a page is replaced. The call is all-or-nothing: on error the
    /// pages it already mapped are cleared again (tables it created stay, empty).
    ///
    /// # Errors
    /// Alignment and range errors, [`VmemError::KernelRegion`] for user
    /// mappings in the shared slot, [`VmemError::OutOfNodes`].
    pub fn map(
        &mut self,
        space: AddressSpace,
        phys: PhysicalAddress,
        virt: VirtualAddress,
        count: u64,
        user: bool,
    ) -> Result<(), VmemError> {
        self.check_space(space)?;
        Self::check_range(virt, count)?;
        if !phys.is_page_aligned() {
            return Err(VmemError::UnalignedPhysical(phys));
        }
        for i in 0..count {
            let va = virt.add_pages(i);
            if let Err(e) = self.map_one(space, phys + i * PAGE_SIZE, va, user) {
                warn!("map of {count} pages at {virt} failed at {va}: {e}");
                self.clear_range(space, virt, i);
                return Err(e);
            }
        }
        trace!("mapped {count} pages {virt} -> {phys} (user: {user})");
        Ok(())
    }

    fn clear_range(&mut self, space: AddressSpace, virt: VirtualAddress, count: u64) {
        for i in 0..count {
            let va = virt.add_pages(i);
            if let Some(table) = self.find_leaf_table(space, va) {
                self.pool.node_mut(table).entries[Self::index(va, LEVELS - 1)] =
                    PageEntryBits::new();
            }
        }
    }

    /// Removes `count` mappings starting at `virt`. The frames are not freed.
    ///
    /// # Errors
    /// [`VmemError::NotMapped`] if any page of the range is unmapped; nothing
    /// is changed in that case.
    pub fn unmap(
        &mut self,
        space: AddressSpace,
        virt: VirtualAddress,
        count: u64,
    ) -> Result<(), VmemError> {
        self.check_space(space)?;
        Self::check_range(virt, count)?;
        for i in 0..count {
            let va = virt.add_pages(i);
            if self.leaf_entry(space, va).is_none() {
                return Err(VmemError::NotMapped(va));
            }
        }
        self.clear_range(space, virt, count);
        trace!("unmapped {count} pages at {virt}");
        Ok(())
    }

    /// The present leaf entry for `virt`, if any.
    #[must_use]
    pub fn leaf_entry(&self, space: AddressSpace, virt: VirtualAddress) -> Option<PageEntryBits> {
        if !self.is_live(space) {
            return None;
        }
        let table = self.find_leaf_table(space, virt)?;
        let entry = self.pool.node(table).entries[Self::index(virt, LEVELS - 1)];
        entry.present().then_some(entry)
    }

    /// Physical address `virt` translates to, including the page offset.
    #[must_use]
    pub fn translate(&self, space: AddressSpace, virt: VirtualAddress) -> Option<PhysicalAddress> {
        let entry = self.leaf_entry(space, virt)?;
        Some(entry.physical_address() + virt.page_offset())
    }

    /// First present leaf at or above `from`, outside the shared slot.
    ///
    /// Returned addresses are not sign-extended; only the lower half is searched.
    #[must_use]
    pub fn next_user_leaf(
        &self,
        space: AddressSpace,
        from: VirtualAddress,
    ) -> Option<(VirtualAddress, PageEntryBits)> {
        if !self.is_live(space) {
            return None;
        }
        self.search(space.root, 0, 0, from.as_u64())
    }

    fn search(
        &self,
        node: NodeHandle,
        level: usize,
        base: u64,
        from: u64,
    ) -> Option<(VirtualAddress, PageEntryBits)> {
        let shift = Self::shift(level);
        let last_in_slot = (1u64 << shift) - 1;
        let table = self.pool.node(node);
        for idx in 0..N {
            if level == 0 && idx == Self::SHARED_INDEX {
                continue;
            }
            let start = base | ((idx as u64) << shift);
            if start + last_in_slot < from {
                continue;
            }
            if level == LEVELS - 1 {
                let entry = table.entries[idx];
                if entry.present() {
                    return Some((VirtualAddress::new(start), entry));
                }
            } else if let Some(child) = table.children[idx]
                && let Some(hit) = self.search(child, level + 1, start, from)
            {
                return Some(hit);
            }
        }
        None
    }

    /// Frees every node of `space` except the shared subtree.
    ///
    /// `on_frame` is called with the frame of every present leaf first, so the
    /// caller can return user pages to the physical allocator.
    ///
    /// # Errors
    /// [`VmemError::StaleAddressSpace`], or [`VmemError::CorruptNodePool`] if
    /// the tree references a node the pool considers free.
    pub fn destroy<F: FnMut(PhysicalAddress)>(
        &mut self,
        space: AddressSpace,
        mut on_frame: F,
    ) -> Result<(), VmemError> {
        self.check_space(space)?;
        for idx in 0..N {
            if idx == Self::SHARED_INDEX {
                continue;
            }
            if let Some(child) = self.pool.node(space.root).children[idx] {
                self.destroy_subtree(child, 1, &mut on_frame)?;
            }
        }
        self.pool.free_node(space.root)
    }

    fn destroy_subtree<F: FnMut(PhysicalAddress)>(
        &mut self,
        node: NodeHandle,
        level: usize,
        on_frame: &mut F,
    ) -> Result<(), VmemError> {
        if level == LEVELS - 1 {
            for entry in self.pool.node(node).entries.iter().filter(|e| e.present()) {
                on_frame(entry.physical_address());
            }
        } else {
            for idx in 0..N {
                if let Some(child) = self.pool.node(node).children[idx] {
                    self.destroy_subtree(child, level + 1, on_frame)?;
                }
            }
        }
        self.pool.free_node(node)
    }

    /// Nodes currently allocated, including the shared subtree's.
    #[must_use]
    pub const fn nodes_in_use(&self) -> usize {
        self.pool.in_use()
    }

    #[must_use]
    pub const fn pool(&self) -> &NodePool<'a, N> {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Node;
    use kernel_info::memory::{KERNEL_HEAP_BASE, KERNEL_REGION_BASE};

    const POOL_BASE: u64 = 0x0020_0000;

    fn pa(v: u64) -> PhysicalAddress {
        PhysicalAddress::new(v)
    }

    fn va(v: u64) -> VirtualAddress {
        VirtualAddress::new(v)
    }

    #[test]
    fn map_translate_unmap_four_levels() {
        let mut nodes = vec![Node::<512>::EMPTY; 16];
        let pool = NodePool::new(&mut nodes, pa(POOL_BASE)).unwrap();
        let mut pt = X86PageTables::new(pool).unwrap();
        let space = pt.create_root().unwrap();

        pt.map(space, pa(0x0050_0000), va(0x0040_0000), 3, true).unwrap();
        // root + shared + one table per lower level
        assert_eq!(pt.nodes_in_use(), 5);
        assert_eq!(pt.translate(space, va(0x0040_1234)), Some(pa(0x0050_1234)));
        assert!(pt.leaf_entry(space, va(0x0040_2000)).unwrap().user_access());
        assert_eq!(pt.translate(space, va(0x0040_3000)), None);

        pt.unmap(space, va(0x0040_0000), 2).unwrap();
        assert_eq!(pt.translate(space, va(0x0040_0000)), None);
        assert_eq!(pt.translate(space, va(0x0040_2000)), Some(pa(0x0050_2000)));
    }

    #[test]
    fn unmap_of_partially_mapped_range_changes_nothing() {
        let mut nodes = vec![Node::<512>::EMPTY; 16];
        let mut pt = X86PageTables::new(NodePool::new(&mut nodes, pa(0)).unwrap()).unwrap();
        let space = pt.create_root().unwrap();
        pt.map(space, pa(0x0080_0000), va(0x1000), 1, false).unwrap();

        assert_eq!(
            pt.unmap(space, va(0x1000), 2),
            Err(VmemError::NotMapped(va(0x2000)))
        );
        assert!(pt.translate(space, va(0x1000)).is_some());
    }

    #[test]
    fn kernel_mappings_are_shared_between_spaces() {
        let mut nodes = vec![Node::<512>::EMPTY; 16];
        let mut pt = X86PageTables::new(NodePool::new(&mut nodes, pa(0)).unwrap()).unwrap();
        let a = pt.create_root().unwrap();
        let b = pt.create_root().unwrap();
        assert!(X86PageTables::is_shared(va(KERNEL_REGION_BASE)));

        pt.map(a, pa(0x0090_0000), va(KERNEL_HEAP_BASE), 1, false).unwrap();
        assert_eq!(pt.translate(b, va(KERNEL_HEAP_BASE)), Some(pa(0x0090_0000)));

        let c = pt.create_root().unwrap();
        assert_eq!(pt.translate(c, va(KERNEL_HEAP_BASE)), Some(pa(0x0090_0000)));
    }

    #[test]
    fn user_mapping_in_kernel_slot_is_refused() {
        let mut nodes = vec![Node::<512>::EMPTY; 16];
        let mut pt = X86PageTables::new(NodePool::new(&mut nodes, pa(0)).unwrap()).unwrap();
        let space = pt.create_root().unwrap();
        assert_eq!(
            pt.map(space, pa(0x1000), va(KERNEL_HEAP_BASE), 1, true),
            Err(VmemError::KernelRegion(va(KERNEL_HEAP_BASE)))
        );
    }

    #[test]
    fn failed_map_rolls_back_pages_of_the_call() {
        // root + shared + 3 tables for the first 2 MiB window; the next window
        // needs another last-level table, which does not exist.
        let mut nodes = vec![Node::<512>::EMPTY; 5];
        let mut pt = X86PageTables::new(NodePool::new(&mut nodes, pa(0)).unwrap()).unwrap();
        let space = pt.create_root().unwrap();
        let start = va(0x0020_0000 - 2 * PAGE_SIZE);

        assert_eq!(
            pt.map(space, pa(0x0100_0000), start, 4, false),
            Err(VmemError::OutOfNodes)
        );
        assert_eq!(pt.translate(space, start), None);
        assert_eq!(pt.translate(space, start.add_pages(1)), None);
    }

    #[test]
    fn unaligned_and_overflowing_ranges_are_rejected() {
        let mut nodes = vec![Node::<512>::EMPTY; 4];
        let mut pt = X86PageTables::new(NodePool::new(&mut nodes, pa(0)).unwrap()).unwrap();
        let space = pt.create_root().unwrap();
        assert_eq!(
            pt.map(space, pa(0), va(0x1001), 1, false),
            Err(VmemError::UnalignedVirtual(va(0x1001)))
        );
        assert_eq!(
            pt.map(space, pa(0x10), va(0x1000), 1, false),
            Err(VmemError::UnalignedPhysical(pa(0x10)))
        );
        assert!(matches!(
            pt.map(space, pa(0), va(0xFFFF_FFFF_FFFF_F000), 2, false),
            Err(VmemError::RangeOverflow { .. })
        ));
    }

    #[test]
    fn destroy_reports_frames_and_keeps_shared_subtree() {
        let mut nodes = vec![Node::<512>::EMPTY; 16];
        let mut pt = X86PageTables::new(NodePool::new(&mut nodes, pa(0)).unwrap()).unwrap();
        let kernel = pt.create_root().unwrap();
        pt.map(kernel, pa(0x0090_0000), va(KERNEL_HEAP_BASE), 1, false).unwrap();
        let before = pt.nodes_in_use();

        let space = pt.create_root().unwrap();
        pt.map(space, pa(0x0050_0000), va(0x0040_0000), 2, true).unwrap();
        pt.map(space, pa(0x0070_0000), va(0x7F00_0000_0000), 1, true).unwrap();

        let mut frames = Vec::new();
        pt.destroy(space, |f| frames.push(f.as_u64())).unwrap();
        frames.sort_unstable();
        assert_eq!(frames, vec![0x0050_0000, 0x0050_1000, 0x0070_0000]);
        assert_eq!(pt.nodes_in_use(), before);
        assert_eq!(pt.translate(kernel, va(KERNEL_HEAP_BASE)), Some(pa(0x0090_0000)));
        assert_eq!(pt.root_phys(space), Err(VmemError::StaleAddressSpace));
    }

    #[test]
    fn destroyed_space_stays_stale_when_its_root_becomes_a_table() {
        let mut nodes = vec![Node::<512>::EMPTY; 8];
        let mut pt = X86PageTables::new(NodePool::new(&mut nodes, pa(0)).unwrap()).unwrap();
        let old = pt.create_root().unwrap();
        let live = pt.create_root().unwrap();
        pt.destroy(old, |_| {}).unwrap();

        pt.map(live, pa(0x0050_0000), va(0x0040_0000), 1, false).unwrap();
        assert_eq!(pt.pool().node(live.root()).children[0], Some(old.root()));

        assert_eq!(pt.root_phys(old), Err(VmemError::StaleAddressSpace));
        assert_eq!(
            pt.map(old, pa(0x0060_0000), va(0x1000), 1, false),
            Err(VmemError::StaleAddressSpace)
        );
        assert_eq!(pt.unmap(old, va(0x0040_0000), 1), Err(VmemError::StaleAddressSpace));
        assert_eq!(pt.translate(old, va(0x0040_0000)), None);
        assert_eq!(pt.destroy(old, |_| {}), Err(VmemError::StaleAddressSpace));
        assert_eq!(pt.translate(live, va(0x0040_0000)), Some(pa(0x0050_0000)));
    }

    #[test]
    fn destroyed_space_does_not_alias_a_new_root_in_its_node() {
        let mut nodes = vec![Node::<512>::EMPTY; 8];
        let mut pt = X86PageTables::new(NodePool::new(&mut nodes, pa(0)).unwrap()).unwrap();
        let old = pt.create_root().unwrap();
        pt.destroy(old, |_| {}).unwrap();
        let new = pt.create_root().unwrap();

        assert_eq!(new.root(), old.root());
        assert_ne!(new, old);
        assert_eq!(pt.root_phys(old), Err(VmemError::StaleAddressSpace));
        assert!(pt.root_phys(new).is_ok());
    }

    #[test]
    fn next_user_leaf_walks_in_address_order() {
        let mut nodes = vec![Node::<512>::EMPTY; 16];
        let mut pt = X86PageTables::new(NodePool::new(&mut nodes, pa(0)).unwrap()).unwrap();
        let space = pt.create_root().unwrap();
        pt.map(space, pa(0x0070_0000), va(0x7F00_0000_0000), 1, true).unwrap();
        pt.map(space, pa(0x0050_0000), va(0x0040_0000), 1, true).unwrap();
        pt.map(space, pa(0x0090_0000), va(KERNEL_HEAP_BASE), 1, false).unwrap();

        let mut seen = Vec::new();
        let mut cursor = va(0);
        while let Some((v, e)) = pt.next_user_leaf(space, cursor) {
            seen.push((v.as_u64(), e.physical_address().as_u64()));
            cursor = v.add_pages(1);
        }
        assert_eq!(
            seen,
            vec![(0x0040_0000, 0x0050_0000), (0x7F00_0000_0000, 0x0070_0000)]
        );
    }

    #[test]
    fn two_level_layout_with_1024_entries() {
        let mut nodes = vec![Node::<1024>::EMPTY; 8];
        let pool = NodePool::new(&mut nodes, pa(0x0010_0000)).unwrap();
        let mut pt = PageTables::<2, 1024>::new(pool).unwrap();
        let space = pt.create_root().unwrap();

        assert!(PageTables::<2, 1024>::is_shared(va(0xFFC0_0000)));
        pt.map(space, pa(0x0040_0000), va(0x0804_8000), 2, true).unwrap();
        assert_eq!(pt.translate(space, va(0x0804_9010)), Some(pa(0x0040_1010)));
        // root + shared + one page table
        assert_eq!(pt.nodes_in_use(), 3);

        pt.map(space, pa(0x0060_0000), va(0xFFC0_0000), 1, false).unwrap();
        let other = pt.create_root().unwrap();
        assert_eq!(pt.translate(other, va(0xFFC0_0000)), Some(pa(0x0060_0000)));
        assert_eq!(pt.translate(other, va(0x0804_8000)), None);
    }
}
