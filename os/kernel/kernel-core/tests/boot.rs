mod common;

use common::{boot, boot_with};
use kernel_alloc::HeapError;
use kernel_core::{ConfigError, ErrorKind, KernelConfig, KernelError};
use kernel_info::memory::{KERNEL_HEAP_BASE, RESERVED_LOW_BYTES, USER_STACK_BASE};
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_sched::{Registers, Ring, SchedError, TaskState};
use kernel_vmem::PhysMapper;

#[test]
fn boots_and_serves_small_allocations_from_the_initial_heap() {
    let config = KernelConfig {
        heap_initial_pages: 256,
        heap_max_pages: 256,
        ..KernelConfig::default()
    };
    let mut kernel = boot_with(4096, config).unwrap();

    let p = kernel.kmalloc(4000).unwrap();
    let window = KERNEL_HEAP_BASE..KERNEL_HEAP_BASE + 256 * PAGE_SIZE;
    assert!(window.contains(&p.as_u64()));
    assert_eq!(p.as_u64() % 8, 0);

    let err = kernel.kmalloc(2_000_000).unwrap_err();
    assert_eq!(err, KernelError::Heap(HeapError::OutOfMemory { requested: 2_000_000 }));
    assert_eq!(err.kind(), ErrorKind::OutOfMemory);
    assert_eq!(kernel.heap_pages(), 256);

    kernel.verify_heap().unwrap();
    assert!(kernel.kmalloc(100).is_ok());
    let stats = kernel.heap_stats().unwrap();
    assert_eq!(stats.accounted(), stats.capacity);
}

#[test]
fn boot_reserves_low_memory_and_the_heap_pages() {
    let kernel = boot();
    let reserved = RESERVED_LOW_BYTES / PAGE_SIZE;
    assert_eq!(kernel.pmm().total_count(), 4096);
    assert_eq!(kernel.pmm().free_count(), 4096 - reserved - 256);

    let base = VirtualAddress::new(KERNEL_HEAP_BASE);
    let space = kernel.kernel_space();
    assert!(kernel.translate(space, base).is_some());
    assert!(kernel.translate(space, base.add_pages(255)).is_some());
    assert!(kernel.translate(space, base.add_pages(256)).is_none());
}

#[test]
fn heap_grows_at_its_tail_when_nothing_fits() {
    let mut kernel = boot();
    let before = kernel.pmm().free_count();

    let p = kernel.kmalloc(2_000_000).unwrap();
    assert_eq!(kernel.heap_pages(), 256 + 489);
    assert_eq!(kernel.pmm().free_count(), before - 489);
    assert!(p.as_u64() + 2_000_000 <= KERNEL_HEAP_BASE + 745 * PAGE_SIZE);
    kernel.verify_heap().unwrap();

    kernel.kfree(p).unwrap();
    let stats = kernel.heap_stats().unwrap();
    assert_eq!(stats.capacity, 745 * PAGE_SIZE);
    assert_eq!(stats.accounted(), stats.capacity);
}

#[test]
fn growth_stops_at_the_ceiling() {
    let config = KernelConfig {
        heap_max_pages: 300,
        ..KernelConfig::default()
    };
    let mut kernel = boot_with(4096, config).unwrap();
    kernel.kmalloc(1_000_000).unwrap();
    assert_eq!(kernel.heap_pages(), 256);

    kernel.kmalloc(100_000).unwrap();
    assert_eq!(kernel.heap_pages(), 256 + 25);

    assert!(kernel.kmalloc(200_000).is_err());
    assert_eq!(kernel.heap_pages(), 281);
    kernel.verify_heap().unwrap();
}

#[test]
fn invalid_configuration_is_rejected_before_anything_is_built() {
    let config = KernelConfig {
        quantum_ticks: 0,
        ..KernelConfig::default()
    };
    assert_eq!(
        boot_with(4096, config).err(),
        Some(KernelError::Config(ConfigError::ZeroQuantum))
    );
}

#[test]
fn boot_fails_when_memory_cannot_hold_the_heap() {
    let err = boot_with(1100, KernelConfig::default()).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::OutOfMemory);
}

#[test]
fn double_free_is_reported() {
    let mut kernel = boot();
    let p = kernel.kmalloc(64).unwrap();
    kernel.kfree(p).unwrap();
    let err = kernel.kfree(p).unwrap_err();
    assert_eq!(err, KernelError::Heap(HeapError::DoubleFree(p)));
    assert_eq!(err.kind(), ErrorKind::AlreadyInUse);
}

#[test]
fn exited_task_returns_every_frame() {
    let mut kernel = boot();
    let free = kernel.pmm().free_count();

    let task = kernel
        .spawn(VirtualAddress::new(0x0040_0000), Ring::User, vec!["init".into()])
        .unwrap();
    assert!(kernel.pmm().free_count() < free);
    kernel.yield_now();
    assert_eq!(kernel.scheduler().current(), task);

    kernel.exit().unwrap();
    assert_eq!(kernel.scheduler().state(task), Some(TaskState::Terminated));
    assert_eq!(kernel.drain_reclaim().unwrap(), 1);
    assert_eq!(kernel.scheduler().state(task), None);
    assert_eq!(kernel.pmm().free_count(), free);
}

#[test]
fn idle_task_cannot_exit() {
    let mut kernel = boot();
    let boot_task = kernel.scheduler().boot_task();
    kernel.scheduler_mut().block_current().unwrap();
    let idle = kernel.scheduler().idle_task();
    assert_eq!(kernel.scheduler().current(), idle);

    let err = kernel.exit().unwrap_err();
    assert_eq!(err, KernelError::Sched(SchedError::CannotTerminate(idle)));
    kernel.scheduler_mut().unblock(boot_task).unwrap();
}

#[test]
fn reclaimer_drains_then_parks() {
    let config = KernelConfig {
        reclaim_queue_capacity: 1,
        ..KernelConfig::default()
    };
    let mut kernel = boot_with(4096, config).unwrap();
    let free = kernel.pmm().free_count();
    let a = kernel.spawn(VirtualAddress::new(0x0040_0000), Ring::User, Vec::new()).unwrap();
    let b = kernel.spawn(VirtualAddress::new(0x0040_0000), Ring::User, Vec::new()).unwrap();

    kernel.yield_now();
    assert_eq!(kernel.scheduler().current(), a);
    kernel.exit().unwrap();
    while kernel.scheduler().current() != b {
        kernel.yield_now();
    }
    // queue is full, so the second exit reclaims `a` inline
    kernel.exit().unwrap();
    assert_eq!(kernel.scheduler().state(a), None);
    assert_eq!(kernel.scheduler().pending_reclaim(), 1);

    let reclaimer = kernel.scheduler().reclaimer_task();
    while kernel.scheduler().current() != reclaimer {
        kernel.yield_now();
    }
    assert_eq!(kernel.reclaim().unwrap(), 1);
    assert_eq!(kernel.scheduler().state(reclaimer), Some(TaskState::Blocked));
    assert_eq!(kernel.pmm().free_count(), free);
}

#[test]
fn fork_copies_the_address_space() {
    let mut kernel = boot();
    let parent = kernel
        .spawn(VirtualAddress::new(0x0040_0000), Ring::User, Vec::new())
        .unwrap();
    kernel.yield_now();
    assert_eq!(kernel.scheduler().current(), parent);

    let stack = VirtualAddress::new(USER_STACK_BASE);
    let parent_space = kernel.scheduler().task(parent).unwrap().space().space;
    let parent_frame = kernel.translate(parent_space, stack).unwrap();
    kernel.phys_mut().frame_mut(parent_frame)[0] = 0xAB;

    let frame = Registers {
        rax: 7,
        rip: 0x0040_0123,
        ..Registers::default()
    };
    let child = kernel.fork(&frame).unwrap();
    let child_space = kernel.scheduler().task(child).unwrap().space().space;
    let child_frame = kernel.translate(child_space, stack).unwrap();

    assert_ne!(child_frame, parent_frame);
    assert_eq!(kernel.phys_mut().frame(child_frame).unwrap()[0], 0xAB);
    assert_eq!(kernel.scheduler().task(child).unwrap().registers().rax, 0);
    assert_eq!(kernel.scheduler().task(child).unwrap().parent(), Some(parent));
}

#[test]
fn kernel_space_cannot_be_destroyed() {
    let mut kernel = boot();
    let space = kernel.kernel_space();
    let err = kernel.destroy_address_space(space).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
}

#[test]
fn pages_can_be_backed_and_released_in_a_new_space() {
    let mut kernel = boot();
    let free = kernel.pmm().free_count();
    let space = kernel.create_address_space().unwrap();
    let va = VirtualAddress::new(0x0060_0000);

    kernel.alloc_pages(space, va, 3, true).unwrap();
    assert!(kernel.translate(space, va.add_pages(2)).is_some());
    kernel.unmap_and_free(space, va, 3).unwrap();
    assert!(kernel.translate(space, va).is_none());

    kernel.destroy_address_space(space).unwrap();
    assert_eq!(kernel.pmm().free_count(), free);
}
