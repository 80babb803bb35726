//! Scoped scheduler locks.
//!
//! Both locks are counters, so they nest. A yield or preemption requested
//! while a lock is held is remembered and carried out when the last lock is
//! released.

use crate::scheduler::Scheduler;
use crate::switch::ContextSwitch;
use core::ops::{Deref, DerefMut};

/// Suppresses preemption by the timer. Voluntary yields still switch.
pub struct SchedulerLock<'a, S: ContextSwitch> {
    sched: &'a mut Scheduler<S>,
}

/// Suppresses every task switch, voluntary or not.
pub struct TaskSwitchLock<'a, S: ContextSwitch> {
    sched: &'a mut Scheduler<S>,
}

impl<S: ContextSwitch> Scheduler<S> {
    pub fn lock_scheduler(&mut self) -> SchedulerLock<'_, S> {
        self.scheduler_locks += 1;
        SchedulerLock { sched: self }
    }

    /// Also locks the scheduler.
    pub fn lock_task_switches(&mut self) -> TaskSwitchLock<'_, S> {
        self.scheduler_locks += 1;
        self.switch_locks += 1;
        TaskSwitchLock { sched: self }
    }
}

impl<S: ContextSwitch> Deref for SchedulerLock<'_, S> {
    type Target = Scheduler<S>;

    fn deref(&self) -> &Self::Target {
        self.sched
    }
}

impl<S: ContextSwitch> DerefMut for SchedulerLock<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.sched
    }
}

impl<S: ContextSwitch> Drop for SchedulerLock<'_, S> {
    fn drop(&mut self) {
        self.sched.scheduler_locks -= 1;
        self.sched.run_postponed();
    }
}

impl<S: ContextSwitch> Deref for TaskSwitchLock<'_, S> {
    type Target = Scheduler<S>;

    fn deref(&self) -> &Self::Target {
        self.sched
    }
}

impl<S: ContextSwitch> DerefMut for TaskSwitchLock<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.sched
    }
}

impl<S: ContextSwitch> Drop for TaskSwitchLock<'_, S> {
    fn drop(&mut self) {
        self.sched.switch_locks -= 1;
        self.sched.scheduler_locks -= 1;
        self.sched.run_postponed();
    }
}
