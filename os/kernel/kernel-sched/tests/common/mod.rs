#![allow(dead_code)]

use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_sched::{Scheduler, SchedulerConfig, SimulatedSwitch, TaskSpace};
use kernel_vmem::{Node, NodePool, X86PageTables};

/// Source of distinct address spaces for tasks.
pub struct Spaces {
    tables: X86PageTables<'static>,
}

impl Spaces {
    pub fn new() -> Self {
        let nodes = Box::leak(vec![Node::<512>::EMPTY; 16].into_boxed_slice());
        let pool = NodePool::new(nodes, PhysicalAddress::new(0x0010_0000)).unwrap();
        Self {
            tables: X86PageTables::new(pool).unwrap(),
        }
    }

    pub fn next(&mut self) -> TaskSpace {
        let space = self.tables.create_root().unwrap();
        TaskSpace {
            space,
            root: self.tables.root_phys(space).unwrap(),
        }
    }
}

pub fn scheduler(spaces: &mut Spaces) -> Scheduler<SimulatedSwitch> {
    scheduler_with(spaces, SchedulerConfig::default())
}

pub fn scheduler_with(spaces: &mut Spaces, config: SchedulerConfig) -> Scheduler<SimulatedSwitch> {
    Scheduler::new(SimulatedSwitch::new(), spaces.next(), config).unwrap()
}

pub fn entry(n: u64) -> VirtualAddress {
    VirtualAddress::new(0x0040_0000 + n * 0x1000)
}
