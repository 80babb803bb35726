//! What the kernel core needs from the machine it runs on.

use kernel_alloc::{HeapMemory, SimulatedMemory};
use kernel_memory_addresses::VirtualAddress;
use kernel_sched::{ContextSwitch, SimulatedSwitch};
use kernel_vmem::{PhysMapper, SimulatedPhys};

/// Machine-specific pieces plugged into [`KernelContext`](crate::KernelContext).
pub trait Platform: 'static {
    /// Word access to the heap window.
    type Memory: HeapMemory + Send + 'static;
    /// Access to physical frames for zeroing and copying.
    type Phys: PhysMapper + Send + 'static;
    type Switch: ContextSwitch + Send + 'static;

    /// Entry point of the idle task.
    fn idle_entry() -> VirtualAddress;

    /// Entry point of the reclaimer task.
    fn reclaimer_entry() -> VirtualAddress;
}

/// Host platform: sparse simulated memory, recorded context switches.
#[derive(Debug, Default)]
pub struct SimulatedPlatform;

impl Platform for SimulatedPlatform {
    type Memory = SimulatedMemory;
    type Phys = SimulatedPhys;
    type Switch = SimulatedSwitch;

    fn idle_entry() -> VirtualAddress {
        VirtualAddress::new(0xFFFF_FFFF_8000_2000)
    }

    fn reclaimer_entry() -> VirtualAddress {
        VirtualAddress::new(0xFFFF_FFFF_8000_3000)
    }
}
