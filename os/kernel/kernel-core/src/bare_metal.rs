//! Wiring for bare-metal `x86_64`.

use crate::context::{BootResources, KernelContext};
use crate::error::KernelError;
use crate::global::GlobalKernel;
use crate::platform::Platform;
use crate::{KernelConfig, logging};
use kernel_alloc::{DirectMemory, LockedHeap, OffsetPhysMapper};
use kernel_info::boot::BootInfo;
use kernel_memory_addresses::VirtualAddress;
use kernel_sched::X86Switch;
use log::{error, warn};

pub struct BareMetal;

impl Platform for BareMetal {
    type Memory = DirectMemory;
    type Phys = OffsetPhysMapper;
    type Switch = X86Switch;

    fn idle_entry() -> VirtualAddress {
        VirtualAddress::new(idle_loop as usize as u64)
    }

    fn reclaimer_entry() -> VirtualAddress {
        VirtualAddress::new(reclaimer_loop as usize as u64)
    }
}

#[global_allocator]
pub static HEAP: LockedHeap<DirectMemory> = LockedHeap::empty();

pub static KERNEL: GlobalKernel<BareMetal> = GlobalKernel::new();

/// Boot the kernel core and publish it in [`KERNEL`].
///
/// # Errors
/// Any boot failure; the caller halts with the diagnostic.
pub fn start(
    config: KernelConfig,
    info: &BootInfo,
    resources: BootResources<'static, BareMetal>,
) -> Result<(), KernelError> {
    if logging::init(config.log_level).is_err() {
        warn!("Logger was already installed");
    }
    let context = KernelContext::boot(config, info, resources)?;
    KERNEL.publish(context)
}

/// Call from the timer interrupt handler.
pub fn timer_tick() {
    KERNEL.tick();
}

pub fn halt() -> ! {
    loop {
        // SAFETY: waits for the next interrupt.
        unsafe { core::arch::asm!("hlt", options(nomem, nostack, preserves_flags)) };
    }
}

extern "C" fn idle_loop() -> ! {
    halt()
}

extern "C" fn reclaimer_loop() -> ! {
    loop {
        if let Err(e) = KERNEL.try_with(KernelContext::reclaim) {
            error!("Reclaim pass failed: {e}");
        }
    }
}

#[unsafe(no_mangle)]
extern "C" fn kernel_task_started() {
    // SAFETY: only called by the task trampoline on a task's first run.
    unsafe { KERNEL.release_after_switch() };
}

#[unsafe(no_mangle)]
extern "C" fn kernel_task_returned() -> ! {
    if let Err(e) = KERNEL.try_with(KernelContext::exit) {
        error!("Kernel task could not terminate: {e}");
    }
    halt()
}
