use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::platform::Platform;
use alloc::string::String;
use alloc::vec::Vec;
use kernel_alloc::{
    FrameAllocator, FreeListHeap, HEADER_SIZE, HeapError, HeapStats, LockedHeap, Vmm,
};
use kernel_info::boot::BootInfo;
use kernel_info::memory::{KERNEL_HEAP_BASE, KERNEL_STACK_PAGES};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress, align_down, pages_for};
use kernel_sched::{
    KernelThread, Registers, Ring, SchedError, Scheduler, SchedulerConfig, TaskId, TaskSpace,
};
use kernel_vmem::{AddressSpace, Node, NodePool};
use log::{debug, error, info, warn};

/// Memory the kernel core is built from, handed over once at boot.
pub struct BootResources<'a, P: Platform> {
    /// Frame bitmap storage, at least
    /// [`FrameAllocator::bitmap_words`] long.
    pub bitmap: &'a mut [u64],
    /// Page-table nodes; the only source of nodes, before and after the heap exists.
    pub nodes: &'a mut [Node<512>],
    /// Physical address of `nodes[0]`.
    pub nodes_phys: PhysicalAddress,
    /// Receives the kernel heap. On the target this is the global allocator.
    pub heap: &'a LockedHeap<P::Memory>,
    pub memory: P::Memory,
    pub phys: P::Phys,
    pub switch: P::Switch,
}

/// Every piece of kernel-core state, owned in one place.
///
/// Built by [`KernelContext::boot`] in dependency order: physical
/// allocator, page tables, heap, scheduler. Nothing in here is global; the
/// target publishes one instance through [`GlobalKernel`](crate::GlobalKernel).
pub struct KernelContext<'a, P: Platform> {
    config: KernelConfig,
    pmm: FrameAllocator<'a>,
    vmm: Vmm<'a>,
    phys: P::Phys,
    heap: &'a LockedHeap<P::Memory>,
    heap_pages: u64,
    sched: Scheduler<P::Switch>,
}

impl<'a, P: Platform> KernelContext<'a, P> {
    /// Bring up the kernel core.
    ///
    /// # Errors
    /// An invalid `config`, or a memory map too small to supply the first
    /// page-table nodes and heap pages. The caller is expected to halt.
    pub fn boot(
        config: KernelConfig,
        info: &BootInfo,
        resources: BootResources<'a, P>,
    ) -> Result<Self, KernelError> {
        config.validate()?;
        let BootResources {
            bitmap,
            nodes,
            nodes_phys,
            heap,
            memory,
            mut phys,
            switch,
        } = resources;

        let mut pmm = FrameAllocator::new(
            &info.memory_map,
            info.kernel_image,
            config.reserved_low_bytes,
            bitmap,
        )?;
        let mut vmm = Vmm::new(NodePool::new(nodes, nodes_phys)?)?;
        let kernel_space = vmm.kernel_space();

        let heap_base = VirtualAddress::new(KERNEL_HEAP_BASE);
        vmm.alloc_pages(
            &mut pmm,
            &mut phys,
            kernel_space,
            heap_base,
            config.heap_initial_pages,
            false,
        )?;
        let seeded = FreeListHeap::new(memory, heap_base, config.heap_initial_pages * PAGE_SIZE)?;
        if heap.install(seeded).is_some() {
            warn!("Replaced a previously installed heap");
        }
        info!(
            "heap ready: {} pages at {heap_base}, ceiling {} pages",
            config.heap_initial_pages, config.heap_max_pages
        );

        let idle = kernel_thread(heap, P::idle_entry())?;
        let reclaimer = kernel_thread(heap, P::reclaimer_entry())?;
        let kernel = TaskSpace {
            space: kernel_space,
            root: vmm.root_phys(kernel_space)?,
        };
        let sched = Scheduler::new(
            switch,
            kernel,
            SchedulerConfig {
                quantum: config.quantum_ticks,
                reclaim_capacity: config.reclaim_queue_capacity,
                idle,
                reclaimer,
            },
        )?;
        info!("scheduler ready: {} ticks per slice", config.quantum_ticks);

        Ok(Self {
            config,
            pmm,
            vmm,
            phys,
            heap,
            heap_pages: config.heap_initial_pages,
            sched,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[must_use]
    pub const fn pmm(&self) -> &FrameAllocator<'a> {
        &self.pmm
    }

    #[must_use]
    pub const fn vmm(&self) -> &Vmm<'a> {
        &self.vmm
    }

    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler<P::Switch> {
        &self.sched
    }

    pub const fn scheduler_mut(&mut self) -> &mut Scheduler<P::Switch> {
        &mut self.sched
    }

    pub const fn phys_mut(&mut self) -> &mut P::Phys {
        &mut self.phys
    }

    #[must_use]
    pub const fn kernel_space(&self) -> AddressSpace {
        self.vmm.kernel_space()
    }

    /// Pages currently backing the heap.
    #[must_use]
    pub const fn heap_pages(&self) -> u64 {
        self.heap_pages
    }

    /// Allocate `size` bytes from the kernel heap.
    ///
    /// When no free chunk fits, the heap grows at its tail by as many pages
    /// as the request needs, up to [`KernelConfig::heap_max_pages`].
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`] past the ceiling, or the VMM error that
    /// stopped the growth.
    pub fn kmalloc(&mut self, size: u64) -> Result<VirtualAddress, KernelError> {
        match self.heap.with_heap(|heap| heap.alloc(size)) {
            Err(HeapError::OutOfMemory { .. }) => {
                self.grow_heap(size)?;
                Ok(self.heap.with_heap(|heap| heap.alloc(size))?)
            }
            result => Ok(result?),
        }
    }

    /// Return an allocation made by [`kmalloc`](Self::kmalloc).
    ///
    /// # Errors
    /// [`HeapError::InvalidPointer`] or [`HeapError::DoubleFree`].
    pub fn kfree(&mut self, ptr: VirtualAddress) -> Result<(), KernelError> {
        Ok(self.heap.with_heap(|heap| heap.free(ptr))?)
    }

    /// # Errors
    /// Only if no heap is installed.
    pub fn heap_stats(&self) -> Result<HeapStats, KernelError> {
        Ok(self.heap.with_heap(|heap| Ok(heap.stats()))?)
    }

    /// Walk the free list and check its ordering and bounds.
    ///
    /// # Errors
    /// [`HeapError::Corrupt`] at the first bad chunk.
    pub fn verify_heap(&self) -> Result<(), KernelError> {
        Ok(self.heap.with_heap(|heap| heap.verify())?)
    }

    fn grow_heap(&mut self, size: u64) -> Result<(), KernelError> {
        let pages = pages_for(size.saturating_add(HEADER_SIZE));
        let target = self.heap_pages.saturating_add(pages);
        if target > self.config.heap_max_pages {
            warn!(
                "heap cannot grow by {pages} pages past its {}-page ceiling",
                self.config.heap_max_pages
            );
            return Err(HeapError::OutOfMemory { requested: size }.into());
        }

        let space = self.vmm.kernel_space();
        let tail = VirtualAddress::new(KERNEL_HEAP_BASE).add_pages(self.heap_pages);
        self.vmm
            .alloc_pages(&mut self.pmm, &mut self.phys, space, tail, pages, false)?;
        if let Err(e) = self.heap.with_heap(|heap| heap.extend(pages * PAGE_SIZE)) {
            self.vmm.unmap_and_free(&mut self.pmm, space, tail, pages)?;
            return Err(e.into());
        }
        self.heap_pages = target;
        debug!("heap grown by {pages} pages to {target}");
        Ok(())
    }

    /// See [`Vmm::map`].
    ///
    /// # Errors
    /// Propagates the mapping error.
    pub fn map(
        &mut self,
        space: AddressSpace,
        phys: PhysicalAddress,
        virt: VirtualAddress,
        count: u64,
        user: bool,
    ) -> Result<(), KernelError> {
        Ok(self.vmm.map(space, phys, virt, count, user)?)
    }

    /// See [`Vmm::unmap`].
    ///
    /// # Errors
    /// Propagates the mapping error.
    pub fn unmap(
        &mut self,
        space: AddressSpace,
        virt: VirtualAddress,
        count: u64,
    ) -> Result<(), KernelError> {
        Ok(self.vmm.unmap(space, virt, count)?)
    }

    #[must_use]
    pub fn translate(&self, space: AddressSpace, virt: VirtualAddress) -> Option<PhysicalAddress> {
        self.vmm.translate(space, virt)
    }

    /// Back `count` pages at `virt` with fresh zeroed frames.
    ///
    /// # Errors
    /// Physical or node exhaustion; nothing stays mapped on failure.
    pub fn alloc_pages(
        &mut self,
        space: AddressSpace,
        virt: VirtualAddress,
        count: u64,
        user: bool,
    ) -> Result<(), KernelError> {
        Ok(self
            .vmm
            .alloc_pages(&mut self.pmm, &mut self.phys, space, virt, count, user)?)
    }

    /// # Errors
    /// See [`Vmm::unmap_and_free`].
    pub fn unmap_and_free(
        &mut self,
        space: AddressSpace,
        virt: VirtualAddress,
        count: u64,
    ) -> Result<(), KernelError> {
        Ok(self.vmm.unmap_and_free(&mut self.pmm, space, virt, count)?)
    }

    /// # Errors
    /// Physical or node exhaustion.
    pub fn create_address_space(&mut self) -> Result<AddressSpace, KernelError> {
        Ok(self
            .vmm
            .create_address_space(&mut self.pmm, &mut self.phys)?)
    }

    /// # Errors
    /// See [`Vmm::destroy_address_space`].
    pub fn destroy_address_space(&mut self, space: AddressSpace) -> Result<(), KernelError> {
        Ok(self.vmm.destroy_address_space(&mut self.pmm, space)?)
    }

    /// Create a task with a fresh address space of its own.
    ///
    /// # Errors
    /// Physical or node exhaustion while building the address space, or heap
    /// exhaustion while creating the task; the address space is released
    /// then.
    pub fn spawn(
        &mut self,
        entry: VirtualAddress,
        ring: Ring,
        args: Vec<String>,
    ) -> Result<TaskId, KernelError> {
        let space = self.create_address_space()?;
        let root = self.vmm.root_phys(space)?;
        match self
            .sched
            .create_task(entry, TaskSpace { space, root }, ring, args)
        {
            Ok(id) => Ok(id),
            Err(e) => {
                self.vmm.destroy_address_space(&mut self.pmm, space)?;
                Err(e.into())
            }
        }
    }

    /// Copy the current task, including a deep copy of its address space.
    ///
    /// `frame` is the register state the caller entered the kernel with.
    ///
    /// # Errors
    /// Exhaustion while copying; the partial copy is released.
    pub fn fork(&mut self, frame: &Registers) -> Result<TaskId, KernelError> {
        let current = self.sched.current();
        let parent = self
            .sched
            .task(current)
            .ok_or(SchedError::NoSuchTask(current))?
            .space();
        let space = self
            .vmm
            .clone_address_space(&mut self.pmm, &mut self.phys, parent.space)?;
        let root = self.vmm.root_phys(space)?;
        match self.sched.copy_task(TaskSpace { space, root }, frame) {
            Ok(child) => Ok(child),
            Err(e) => {
                self.vmm.destroy_address_space(&mut self.pmm, space)?;
                Err(e.into())
            }
        }
    }

    /// Terminate the current task.
    ///
    /// If the reclaim queue is full, the backlog is reclaimed right here
    /// first.
    ///
    /// # Errors
    /// [`SchedError::CannotTerminate`] for the idle and reclaimer tasks.
    pub fn exit(&mut self) -> Result<(), KernelError> {
        match self.sched.terminate_current() {
            Err(SchedError::ReclaimQueueFull) => {
                self.drain_reclaim()?;
                Ok(self.sched.terminate_current()?)
            }
            result => Ok(result?),
        }
    }

    /// Release every terminated task's address space. Returns how many
    /// tasks were reclaimed.
    ///
    /// # Errors
    /// The first teardown error; the remaining tasks are still reclaimed.
    pub fn drain_reclaim(&mut self) -> Result<usize, KernelError> {
        let kernel = self.vmm.kernel_space();
        let mut reclaimed = 0;
        let mut first_error = None;
        while let Some(task) = self.sched.take_reclaimable() {
            reclaimed += 1;
            if task.space.space == kernel {
                continue;
            }
            if let Err(e) = self.vmm.destroy_address_space(&mut self.pmm, task.space.space) {
                error!("teardown of {} failed: {e}", task.id);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(reclaimed), |e| Err(e.into()))
    }

    /// One pass of the reclaimer task: drain the queue, then park until
    /// the next task terminates.
    ///
    /// # Errors
    /// See [`drain_reclaim`](Self::drain_reclaim).
    pub fn reclaim(&mut self) -> Result<usize, KernelError> {
        let reclaimed = self.drain_reclaim()?;
        self.sched.park_reclaimer();
        Ok(reclaimed)
    }

    /// Timer tick.
    pub fn tick(&mut self) {
        self.sched.tick();
    }

    pub fn yield_now(&mut self) {
        self.sched.yield_now();
    }
}

fn kernel_thread<M: kernel_alloc::HeapMemory>(
    heap: &LockedHeap<M>,
    entry: VirtualAddress,
) -> Result<KernelThread, HeapError> {
    let bytes = KERNEL_STACK_PAGES * PAGE_SIZE;
    let stack = heap.with_heap(|heap| heap.alloc(bytes))?;
    Ok(KernelThread {
        entry,
        stack_top: VirtualAddress::new(align_down(stack.as_u64() + bytes, 16)),
    })
}
