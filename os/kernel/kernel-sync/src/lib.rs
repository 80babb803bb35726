//! # Kernel synchronization primitives
//!
//! Low-level building blocks that do not depend on the scheduler:
//!
//! * [`SpinLock`]: test-and-test-and-set lock with an RAII guard. Guards the
//!   global kernel context and the allocator behind `GlobalAlloc`. On the
//!   single core this kernel targets it never actually spins unless an
//!   interrupt handler re-enters a held lock, which is a bug the guard makes
//!   visible instead of silently corrupting state.
//! * [`SyncOnceCell`]: write-once cell used to publish the kernel context
//!   after boot.
//!
//! Blocking primitives (semaphores, wait queues) park tasks and therefore
//! live next to the scheduler in `kernel-sched`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;
mod sync_once_cell;

pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
