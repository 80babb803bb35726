#![allow(dead_code)]

use kernel_alloc::{FrameAllocator, LockedHeap, SimulatedMemory};
use kernel_core::{BootResources, KernelConfig, KernelContext, KernelError, SimulatedPlatform};
use kernel_info::boot::{BootInfo, KernelImage, MemoryRegion};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};
use kernel_sched::SimulatedSwitch;
use kernel_vmem::{Node, SimulatedPhys};

/// One region of `pages` pages starting at zero, kernel image at 1 MiB.
pub fn boot_info(pages: u64) -> BootInfo {
    let mut info = BootInfo::default();
    assert!(
        info.memory_map
            .push(MemoryRegion::new(PhysicalAddress::zero(), pages * PAGE_SIZE))
    );
    info.kernel_image = KernelImage {
        start: PhysicalAddress::new(0x0010_0000),
        end: PhysicalAddress::new(0x0020_0000),
    };
    info
}

/// Fresh leaked resources; the node pool sits in the reserved low region.
pub fn resources(info: &BootInfo) -> BootResources<'static, SimulatedPlatform> {
    let words = FrameAllocator::bitmap_words(&info.memory_map);
    let heap: &'static LockedHeap<SimulatedMemory> = Box::leak(Box::new(LockedHeap::empty()));
    BootResources {
        bitmap: Box::leak(vec![0; words].into_boxed_slice()),
        nodes: Box::leak(vec![Node::<512>::EMPTY; 64].into_boxed_slice()),
        nodes_phys: PhysicalAddress::new(0x0020_0000),
        heap,
        memory: SimulatedMemory::new(),
        phys: SimulatedPhys::new(),
        switch: SimulatedSwitch::new(),
    }
}

pub fn boot_with(
    pages: u64,
    config: KernelConfig,
) -> Result<KernelContext<'static, SimulatedPlatform>, KernelError> {
    let info = boot_info(pages);
    let resources = resources(&info);
    KernelContext::boot(config, &info, resources)
}

/// 16 MiB of RAM and the default configuration.
pub fn boot() -> KernelContext<'static, SimulatedPlatform> {
    boot_with(4096, KernelConfig::default()).unwrap()
}
