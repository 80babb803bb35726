//! # Kernel Task Scheduler
//!
//! Round-robin preemptive scheduling for one CPU, plus the blocking
//! primitives built on it.
//!
//! ```text
//!                 ┌──────────── ready (FIFO) ────────────┐
//!  create_task ──▶│  T3  │  T7  │  T2  │ ...              │──▶ dispatch ──▶ current
//!  unblock     ──▶└──────────────────────────────────────┘        ▲           │
//!                                                                  │           │ tick / yield
//!     idle: runs when the queue is empty and current cannot go on ─┘           ▼
//!                                                                     back to the tail
//! ```
//!
//! ## Time slices
//!
//! Every task gets [`SchedulerConfig::quantum`] timer ticks. [`Scheduler::tick`]
//! counts them down; at zero the task yields and goes to the tail of the
//! queue with a fresh quantum.
//!
//! ## Locks
//!
//! [`Scheduler::lock_scheduler`] holds off preemption,
//! [`Scheduler::lock_task_switches`] holds off every switch. Both return
//! RAII guards and nest; a switch requested under a lock happens when the
//! last guard drops.
//!
//! ## Blocking
//!
//! [`Semaphore`] and [`WaitQueue`] park tasks in FIFO order. Destroying one
//! while tasks wait on it wakes them with [`SyncError::Destroyed`]. A task
//! cannot block while it holds either lock.
//!
//! ## Termination
//!
//! A terminating task closes its files and wakes tasks in
//! [`Scheduler::wait_for`]. It then lands in a bounded reclaim queue. The
//! reclaimer task drains it with [`Scheduler::take_reclaimable`] and releases
//! the address space of each task it takes.
//!
//! ## Context switches
//!
//! The scheduler itself never touches machine state. It hands two register
//! files to a [`ContextSwitch`]: [`SimulatedSwitch`] on the host, and
//! `X86Switch` when built for bare-metal `x86_64`.
//!
//! ```
//! use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
//! use kernel_sched::{Ring, Scheduler, SchedulerConfig, SimulatedSwitch, TaskSpace, TaskState};
//!
//! # fn space() -> TaskSpace {
//! #     let nodes = Box::leak(vec![kernel_vmem::Node::<512>::EMPTY; 2].into_boxed_slice());
//! #     let pool = kernel_vmem::NodePool::new(nodes, PhysicalAddress::new(0x10_0000)).unwrap();
//! #     let mut tables = kernel_vmem::X86PageTables::new(pool).unwrap();
//! #     let space = tables.create_root().unwrap();
//! #     TaskSpace { space, root: tables.root_phys(space).unwrap() }
//! # }
//! let kernel = space();
//! let mut sched = Scheduler::new(SimulatedSwitch::new(), kernel, SchedulerConfig::default())?;
//! let worker = sched.create_task(VirtualAddress::new(0x40_0000), kernel, Ring::Kernel, Vec::new())?;
//!
//! sched.yield_now();
//! assert_eq!(sched.current(), worker);
//! assert_eq!(sched.state(sched.boot_task()), Some(TaskState::Ready));
//! # Ok::<(), kernel_sched::SchedError>(())
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod arena;
mod error;
mod guard;
mod registers;
mod scheduler;
mod switch;
mod sync;
mod task;

pub use error::{SchedError, SyncError};
pub use guard::{SchedulerLock, TaskSwitchLock};
pub use registers::{KERNEL_CS, KERNEL_SS, Registers, USER_CS, USER_SS};
pub use scheduler::{KernelThread, Scheduler, SchedulerConfig};
pub use switch::{ContextSwitch, SimulatedSwitch};
pub use sync::{Semaphore, WaitQueue};
pub use task::{Fd, FdTable, OpenFile, Pid, Reclaimed, Ring, Task, TaskId, TaskSpace, TaskState};

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use switch::X86Switch;
