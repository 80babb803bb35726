//! Address spaces on top of the page-table tree and the physical allocator.

use crate::frame_alloc::{FrameAllocError, FrameAllocator};
use kernel_info::memory::{KERNEL_STACK_BASE, KERNEL_STACK_PAGES, USER_STACK_BASE, USER_STACK_PAGES};
use kernel_memory_addresses::{PageIndex, PhysicalAddress, VirtualAddress};
use kernel_vmem::{AddressSpace, NodePool, PhysMapper, VmemError, X86PageTables};
use log::{debug, info, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmmError {
    #[error("out of physical memory")]
    OutOfMemory,
    #[error("the kernel address space cannot be destroyed")]
    KernelSpace,
    #[error(transparent)]
    Vmem(#[from] VmemError),
    #[error(transparent)]
    Frame(#[from] FrameAllocError),
}

/// Virtual memory manager: every address space, plus the kernel's own.
///
/// The kernel address space is created at construction and is what the
/// kernel heap is mapped through; since the heap lives in the shared kernel
/// slot, those mappings appear in every task's address space as well.
pub struct Vmm<'a> {
    tables: X86PageTables<'a>,
    kernel_space: AddressSpace,
}

impl<'a> Vmm<'a> {
    /// # Errors
    /// [`VmemError::OutOfNodes`] if `pool` cannot hold the shared subtree and
    /// the kernel root.
    pub fn new(pool: NodePool<'a, 512>) -> Result<Self, VmmError> {
        let mut tables = X86PageTables::new(pool)?;
        let kernel_space = tables.create_root()?;
        info!("VMM ready: kernel root at {}", tables.root_phys(kernel_space)?);
        Ok(Self {
            tables,
            kernel_space,
        })
    }

    #[must_use]
    pub const fn kernel_space(&self) -> AddressSpace {
        self.kernel_space
    }

    #[must_use]
    pub const fn tables(&self) -> &X86PageTables<'a> {
        &self.tables
    }

    /// See [`X86PageTables::map`]. The caller owns `phys`.
    ///
    /// # Errors
    /// Propagates [`VmemError`].
    pub fn map(
        &mut self,
        space: AddressSpace,
        phys: PhysicalAddress,
        virt: VirtualAddress,
        count: u64,
        user: bool,
    ) -> Result<(), VmmError> {
        Ok(self.tables.map(space, phys, virt, count, user)?)
    }

    /// Removes mappings; the frames stay allocated.
    ///
    /// # Errors
    /// Propagates [`VmemError`].
    pub fn unmap(
        &mut self,
        space: AddressSpace,
        virt: VirtualAddress,
        count: u64,
    ) -> Result<(), VmmError> {
        Ok(self.tables.unmap(space, virt, count)?)
    }

    #[must_use]
    pub fn translate(&self, space: AddressSpace, virt: VirtualAddress) -> Option<PhysicalAddress> {
        self.tables.translate(space, virt)
    }

    /// Physical address of the root table, for CR3.
    ///
    /// # Errors
    /// [`VmemError::StaleAddressSpace`].
    pub fn root_phys(&self, space: AddressSpace) -> Result<PhysicalAddress, VmmError> {
        Ok(self.tables.root_phys(space)?)
    }

    /// Backs `count` pages at `virt` with fresh zeroed frames.
    ///
    /// On failure every page this call mapped is unmapped and its frame freed.
    ///
    /// # Errors
    /// [`VmmError::OutOfMemory`] when the physical allocator runs dry, or a
    /// mapping error.
    pub fn alloc_pages(
        &mut self,
        pmm: &mut FrameAllocator<'_>,
        phys: &mut impl PhysMapper,
        space: AddressSpace,
        virt: VirtualAddress,
        count: u64,
        user: bool,
    ) -> Result<(), VmmError> {
        for i in 0..count {
            let va = virt.add_pages(i);
            let result = match pmm.alloc_one() {
                None => Err(VmmError::OutOfMemory),
                Some(frame) => {
                    phys.zero_frame(frame.base());
                    self.tables
                        .map(space, frame.base(), va, 1, user)
                        .map_err(|e| {
                            // never mapped, so it cannot be reported as such
                            let _ = pmm.free_one(frame);
                            VmmError::from(e)
                        })
                }
            };
            if let Err(e) = result {
                warn!("alloc_pages: {count} pages at {virt} failed at {va}: {e}");
                if i > 0 {
                    self.unmap_and_free(pmm, space, virt, i)?;
                }
                return Err(e);
            }
        }
        debug!("{count} pages backed at {virt}");
        Ok(())
    }

    /// Unmaps `count` pages and returns their frames to `pmm`.
    ///
    /// # Errors
    /// [`VmemError::NotMapped`] if any page is unmapped (nothing changes), or
    /// a [`FrameAllocError`] for a frame the allocator refuses.
    pub fn unmap_and_free(
        &mut self,
        pmm: &mut FrameAllocator<'_>,
        space: AddressSpace,
        virt: VirtualAddress,
        count: u64,
    ) -> Result<(), VmmError> {
        for i in 0..count {
            let va = virt.add_pages(i);
            if self.tables.translate(space, va).is_none() {
                return Err(VmemError::NotMapped(va).into());
            }
        }
        let mut first_error = None;
        for i in 0..count {
            let va = virt.add_pages(i);
            if let Some(frame) = self.tables.translate(space, va) {
                self.tables.unmap(space, va, 1)?;
                if let Err(e) = pmm.free_one(PageIndex::containing(frame)) {
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), |e| Err(e.into()))
    }

    /// New address space with the shared kernel slot and both fixed stacks mapped.
    ///
    /// # Errors
    /// Node pool or physical memory exhaustion; nothing is leaked on failure.
    pub fn create_address_space(
        &mut self,
        pmm: &mut FrameAllocator<'_>,
        phys: &mut impl PhysMapper,
    ) -> Result<AddressSpace, VmmError> {
        let space = self.tables.create_root()?;
        let stacks = self
            .alloc_pages(
                pmm,
                phys,
                space,
                VirtualAddress::new(USER_STACK_BASE),
                USER_STACK_PAGES,
                true,
            )
            .and_then(|()| {
                self.alloc_pages(
                    pmm,
                    phys,
                    space,
                    VirtualAddress::new(KERNEL_STACK_BASE),
                    KERNEL_STACK_PAGES,
                    false,
                )
            });
        if let Err(e) = stacks {
            self.destroy_address_space(pmm, space)?;
            return Err(e);
        }
        debug!("address space created at {}", self.tables.root_phys(space)?);
        Ok(space)
    }

    /// Frees every frame mapped outside the shared kernel slot, then every node.
    ///
    /// # Errors
    /// [`VmmError::KernelSpace`] for the kernel's own space; otherwise the
    /// first allocator or pool error (teardown still runs to the end).
    pub fn destroy_address_space(
        &mut self,
        pmm: &mut FrameAllocator<'_>,
        space: AddressSpace,
    ) -> Result<(), VmmError> {
        if space == self.kernel_space {
            return Err(VmmError::KernelSpace);
        }
        let mut first_error = None;
        self.tables.destroy(space, |frame| {
            if let Err(e) = pmm.free_one(PageIndex::containing(frame)) {
                first_error.get_or_insert(e);
            }
        })?;
        debug!("address space destroyed");
        first_error.map_or(Ok(()), |e| Err(e.into()))
    }

    /// Deep copy of every mapping of `src` outside the shared kernel slot.
    ///
    /// Each page gets a fresh frame holding a copy of the original's contents
    /// and the same user flag.
    ///
    /// # Errors
    /// Exhaustion of frames or nodes; the partial copy is destroyed.
    pub fn clone_address_space(
        &mut self,
        pmm: &mut FrameAllocator<'_>,
        phys: &mut impl PhysMapper,
        src: AddressSpace,
    ) -> Result<AddressSpace, VmmError> {
        self.tables.root_phys(src)?;
        let dst = self.tables.create_root()?;
        let mut cursor = VirtualAddress::new(0);
        while let Some((va, entry)) = self.tables.next_user_leaf(src, cursor) {
            let copied = match pmm.alloc_one() {
                None => Err(VmmError::OutOfMemory),
                Some(frame) => {
                    phys.copy_frame(entry.physical_address(), frame.base());
                    self.tables
                        .map(dst, frame.base(), va, 1, entry.user_access())
                        .map_err(|e| {
                            let _ = pmm.free_one(frame);
                            VmmError::from(e)
                        })
                }
            };
            if let Err(e) = copied {
                warn!("clone of address space failed at {va}: {e}");
                self.destroy_address_space(pmm, dst)?;
                return Err(e);
            }
            cursor = va.add_pages(1);
        }
        Ok(dst)
    }
}
