//! Blocking primitives.
//!
//! Handles are plain copyable indices into tables owned by the
//! [`Scheduler`]. Destroying a primitive wakes every waiter with
//! [`SyncError::Destroyed`] and turns the handle stale, so a task that
//! holds on to it afterwards gets the same error instead of touching freed
//! state.
//!
//! A task that has to wait is queued and marked blocked under the
//! scheduler lock, but the lock is released before it switches away.
//! Waiting while the caller itself holds a scheduler or task switch lock is
//! refused with [`SyncError::Locked`].

use crate::arena::Index;
use crate::error::SyncError;
use crate::scheduler::{Scheduler, SemaphoreState, WaitQueueState};
use crate::switch::ContextSwitch;
use crate::task::WakeReason;
use alloc::collections::VecDeque;

/// Counting semaphore with a fixed capacity.
///
/// `count` is the number of current holders. A release with waiters hands
/// the unit straight to the oldest waiter instead of decrementing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Semaphore(pub(crate) Index);

impl Semaphore {
    /// Semaphore admitting up to `max` holders at once.
    ///
    /// # Errors
    /// [`SyncError::ZeroCapacity`] if `max` is zero,
    /// [`SyncError::OutOfMemory`] if the semaphore table cannot grow.
    pub fn create<S: ContextSwitch>(sched: &mut Scheduler<S>, max: u32) -> Result<Self, SyncError> {
        if max == 0 {
            return Err(SyncError::ZeroCapacity);
        }
        sched
            .semaphores
            .insert(SemaphoreState {
                max,
                count: 0,
                waiters: VecDeque::new(),
            })
            .map(Self)
            .map_err(|_| SyncError::OutOfMemory)
    }

    /// Take one unit, blocking while all are held.
    ///
    /// # Errors
    /// [`SyncError::Destroyed`] if the semaphore is gone or is destroyed
    /// while waiting. [`SyncError::Locked`] or [`SyncError::OutOfMemory`]
    /// if the caller would have to wait but cannot; it is not queued then.
    pub fn acquire<S: ContextSwitch>(self, sched: &mut Scheduler<S>) -> Result<(), SyncError> {
        let nested = sched.is_scheduler_locked();
        let mut locked = sched.lock_scheduler();
        let me = locked.current();
        let state = locked
            .semaphores
            .get_mut(self.0)
            .ok_or(SyncError::Destroyed)?;
        if state.count < state.max {
            state.count += 1;
            return Ok(());
        }
        if nested {
            return Err(SyncError::Locked);
        }
        state.waiters.try_reserve(1)?;
        state.waiters.push_back(me);
        locked.park_current();
        drop(locked);
        sched.finish_block(me)
    }

    /// Take one unit if one is free.
    ///
    /// # Errors
    /// [`SyncError::Destroyed`] if the semaphore is gone.
    pub fn try_acquire<S: ContextSwitch>(self, sched: &mut Scheduler<S>) -> Result<bool, SyncError> {
        let state = sched
            .semaphores
            .get_mut(self.0)
            .ok_or(SyncError::Destroyed)?;
        if state.count < state.max {
            state.count += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Give back one unit.
    ///
    /// # Errors
    /// [`SyncError::Destroyed`] if the semaphore is gone,
    /// [`SyncError::NotHeld`] if no unit is held.
    pub fn release<S: ContextSwitch>(self, sched: &mut Scheduler<S>) -> Result<(), SyncError> {
        let mut sched = sched.lock_scheduler();
        loop {
            let state = sched
                .semaphores
                .get_mut(self.0)
                .ok_or(SyncError::Destroyed)?;
            let Some(next) = state.waiters.pop_front() else {
                break;
            };
            if sched.wake(next, WakeReason::Signaled) {
                return Ok(());
            }
        }

        let state = sched
            .semaphores
            .get_mut(self.0)
            .ok_or(SyncError::Destroyed)?;
        if state.count == 0 {
            return Err(SyncError::NotHeld);
        }
        state.count -= 1;
        Ok(())
    }

    /// Destroy the semaphore and wake its waiters with
    /// [`SyncError::Destroyed`]. Returns the number of tasks woken.
    ///
    /// # Errors
    /// [`SyncError::Destroyed`] if it was already destroyed.
    pub fn destroy<S: ContextSwitch>(self, sched: &mut Scheduler<S>) -> Result<usize, SyncError> {
        let state = sched
            .semaphores
            .remove(self.0)
            .ok_or(SyncError::Destroyed)?;
        Ok(state
            .waiters
            .into_iter()
            .filter(|&t| sched.wake(t, WakeReason::Destroyed))
            .count())
    }

    /// Current holders.
    ///
    /// # Errors
    /// [`SyncError::Destroyed`] if the semaphore is gone.
    pub fn count<S: ContextSwitch>(self, sched: &Scheduler<S>) -> Result<u32, SyncError> {
        sched
            .semaphores
            .get(self.0)
            .map(|s| s.count)
            .ok_or(SyncError::Destroyed)
    }

    /// Tasks blocked in [`Semaphore::acquire`].
    ///
    /// # Errors
    /// [`SyncError::Destroyed`] if the semaphore is gone.
    pub fn waiting<S: ContextSwitch>(self, sched: &Scheduler<S>) -> Result<usize, SyncError> {
        sched
            .semaphores
            .get(self.0)
            .map(|s| s.waiters.len())
            .ok_or(SyncError::Destroyed)
    }
}

/// FIFO queue of blocked tasks waiting for a condition.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct WaitQueue(pub(crate) Index);

impl WaitQueue {
    /// # Errors
    /// [`SyncError::OutOfMemory`] if the queue table cannot grow.
    pub fn create<S: ContextSwitch>(sched: &mut Scheduler<S>) -> Result<Self, SyncError> {
        sched
            .queues
            .insert(WaitQueueState::default())
            .map(Self)
            .map_err(|_| SyncError::OutOfMemory)
    }

    /// Block the current task until signaled.
    ///
    /// # Errors
    /// [`SyncError::Destroyed`] if the queue is gone or is destroyed while
    /// waiting. [`SyncError::Locked`] or [`SyncError::OutOfMemory`] if the
    /// caller cannot wait; it is not queued then.
    pub fn wait<S: ContextSwitch>(self, sched: &mut Scheduler<S>) -> Result<(), SyncError> {
        if sched.is_scheduler_locked() {
            return Err(SyncError::Locked);
        }
        let mut locked = sched.lock_scheduler();
        let me = locked.current();
        let waiters = &mut locked
            .queues
            .get_mut(self.0)
            .ok_or(SyncError::Destroyed)?
            .waiters;
        waiters.try_reserve(1)?;
        waiters.push_back(me);
        locked.park_current();
        drop(locked);
        sched.finish_block(me)
    }

    /// Wake the longest waiting task. Returns whether one was woken.
    ///
    /// # Errors
    /// [`SyncError::Destroyed`] if the queue is gone.
    pub fn signal<S: ContextSwitch>(self, sched: &mut Scheduler<S>) -> Result<bool, SyncError> {
        loop {
            let queue = sched.queues.get_mut(self.0).ok_or(SyncError::Destroyed)?;
            let Some(next) = queue.waiters.pop_front() else {
                return Ok(false);
            };
            if sched.wake(next, WakeReason::Signaled) {
                return Ok(true);
            }
        }
    }

    /// Wake every waiting task in arrival order. Returns how many were woken.
    ///
    /// # Errors
    /// [`SyncError::Destroyed`] if the queue is gone.
    pub fn wake_all<S: ContextSwitch>(self, sched: &mut Scheduler<S>) -> Result<usize, SyncError> {
        let queue = sched.queues.get_mut(self.0).ok_or(SyncError::Destroyed)?;
        let waiters = core::mem::take(&mut queue.waiters);
        Ok(waiters
            .into_iter()
            .filter(|&t| sched.wake(t, WakeReason::Signaled))
            .count())
    }

    /// Destroy the queue and wake its waiters with [`SyncError::Destroyed`].
    /// Returns the number of tasks woken.
    ///
    /// # Errors
    /// [`SyncError::Destroyed`] if it was already destroyed.
    pub fn destroy<S: ContextSwitch>(self, sched: &mut Scheduler<S>) -> Result<usize, SyncError> {
        let queue = sched.queues.remove(self.0).ok_or(SyncError::Destroyed)?;
        Ok(queue
            .waiters
            .into_iter()
            .filter(|&t| sched.wake(t, WakeReason::Destroyed))
            .count())
    }

    /// Number of blocked waiters.
    ///
    /// # Errors
    /// [`SyncError::Destroyed`] if the queue is gone.
    pub fn waiting<S: ContextSwitch>(self, sched: &Scheduler<S>) -> Result<usize, SyncError> {
        sched
            .queues
            .get(self.0)
            .map(|q| q.waiters.len())
            .ok_or(SyncError::Destroyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Ring, SchedulerConfig, SimulatedSwitch, TaskSpace, TaskState};
    use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
    use kernel_vmem::{Node, NodePool, X86PageTables};

    fn scheduler() -> Scheduler<SimulatedSwitch> {
        let nodes = Box::leak(vec![Node::<512>::EMPTY; 2].into_boxed_slice());
        let pool = NodePool::new(nodes, PhysicalAddress::new(0x0010_0000)).unwrap();
        let mut tables = X86PageTables::new(pool).unwrap();
        let space = tables.create_root().unwrap();
        let kernel = TaskSpace {
            space,
            root: tables.root_phys(space).unwrap(),
        };
        Scheduler::new(SimulatedSwitch::new(), kernel, SchedulerConfig::default()).unwrap()
    }

    #[test]
    fn waiter_of_destroyed_queue_resumes_with_error() {
        let mut sched = scheduler();
        let kernel = sched.kernel_space();
        let waiter = sched
            .create_task(VirtualAddress::new(0x1000), kernel, Ring::Kernel, vec![])
            .unwrap();
        let queue = WaitQueue::create(&mut sched).unwrap();
        sched.yield_now();
        queue.wait(&mut sched).unwrap();

        queue.destroy(&mut sched).unwrap();
        assert_eq!(sched.state(waiter), Some(TaskState::Ready));
        assert_eq!(sched.take_wake_result(waiter), Err(SyncError::Destroyed));
        assert_eq!(sched.take_wake_result(waiter), Ok(()));
    }

    #[test]
    fn signaled_semaphore_waiter_resumes_normally() {
        let mut sched = scheduler();
        let kernel = sched.kernel_space();
        let waiter = sched
            .create_task(VirtualAddress::new(0x1000), kernel, Ring::Kernel, vec![])
            .unwrap();
        let sem = Semaphore::create(&mut sched, 1).unwrap();
        sem.acquire(&mut sched).unwrap();
        sched.yield_now();
        sem.acquire(&mut sched).unwrap();

        sem.release(&mut sched).unwrap();
        assert_eq!(sched.take_wake_result(waiter), Ok(()));
        assert_eq!(sem.count(&sched), Ok(1));
    }
}
