use crate::arena::Arena;
use crate::error::{SchedError, SyncError};
use crate::registers::Registers;
use crate::switch::ContextSwitch;
use crate::sync::WaitQueue;
use crate::task::{
    try_string, try_strings, Fd, FdTable, OpenFile, Pid, Reclaimed, Ring, Task, TaskId, TaskSpace,
    TaskState, WakeReason,
};
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;
use kernel_info::memory::{KERNEL_STACK_TOP, QUANTUM_TICKS, RECLAIM_QUEUE_CAPACITY, USER_STACK_TOP};
use kernel_memory_addresses::VirtualAddress;
use log::{debug, trace, warn};

/// Entry point and stack of a task that lives in the kernel address space.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KernelThread {
    pub entry: VirtualAddress,
    pub stack_top: VirtualAddress,
}

impl KernelThread {
    /// Placeholder for hosts where the thread never actually runs.
    pub const NONE: Self = Self {
        entry: VirtualAddress::new(0),
        stack_top: VirtualAddress::new(0),
    };
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Timer ticks per time slice.
    pub quantum: u32,
    /// Terminated tasks that may wait for reclamation at once.
    pub reclaim_capacity: usize,
    /// Runs when nothing else is ready.
    pub idle: KernelThread,
    /// Tears down terminated tasks.
    pub reclaimer: KernelThread,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            quantum: QUANTUM_TICKS,
            reclaim_capacity: RECLAIM_QUEUE_CAPACITY,
            idle: KernelThread::NONE,
            reclaimer: KernelThread::NONE,
        }
    }
}

pub(crate) struct SemaphoreState {
    pub(crate) max: u32,
    pub(crate) count: u32,
    pub(crate) waiters: VecDeque<TaskId>,
}

#[derive(Default)]
pub(crate) struct WaitQueueState {
    pub(crate) waiters: VecDeque<TaskId>,
}

/// Round-robin scheduler for a single CPU.
///
/// Owns every task, semaphore and wait queue. Exactly one task is
/// [`TaskState::Running`] at a time; ready tasks wait in FIFO order. The
/// idle task never enters the ready queue and runs only when the queue is
/// empty and the current task cannot continue.
pub struct Scheduler<S> {
    switch: S,
    pub(crate) tasks: Arena<Task>,
    pub(crate) semaphores: Arena<SemaphoreState>,
    pub(crate) queues: Arena<WaitQueueState>,
    ready: VecDeque<TaskId>,
    current: TaskId,
    boot: TaskId,
    idle: TaskId,
    reclaimer: TaskId,
    reclaim: VecDeque<TaskId>,
    config: SchedulerConfig,
    kernel_space: TaskSpace,
    next_pid: u32,
    pub(crate) scheduler_locks: u32,
    pub(crate) switch_locks: u32,
    pub(crate) postponed: bool,
}

impl<S: ContextSwitch> Scheduler<S> {
    /// Scheduler whose current task is the caller (the boot task).
    ///
    /// The idle and reclaimer tasks are created in `kernel_space`; the
    /// reclaimer starts blocked until the first task terminates.
    ///
    /// # Errors
    /// [`SchedError::OutOfMemory`] if the heap cannot hold the initial tasks.
    pub fn new(
        switch: S,
        kernel_space: TaskSpace,
        config: SchedulerConfig,
    ) -> Result<Self, SchedError> {
        let mut tasks = Arena::new();
        let mut queues = Arena::new();
        let trampoline = switch.trampoline();
        let mut kernel_task = |tasks: &mut Arena<Task>,
                               regs: Registers,
                               state: TaskState|
         -> Result<TaskId, SchedError> {
            let termination = queues
                .insert(WaitQueueState::default())
                .map_err(|_| SchedError::OutOfMemory)?;
            tasks
                .insert(Task {
                    regs,
                    state,
                    ticks_remaining: config.quantum,
                    wake_reason: None,
                    on_wait_list: false,
                    termination: WaitQueue(termination),
                    pid: None,
                    ring: Ring::Kernel,
                    space: kernel_space,
                    parent: None,
                    files: FdTable::new(),
                    cwd: try_string("/")?,
                    args: Vec::new(),
                })
                .map(TaskId)
                .map_err(|_| SchedError::OutOfMemory)
        };
        let thread_regs = |thread: KernelThread| {
            Registers::initial(
                trampoline,
                thread.entry.as_u64(),
                Ring::Kernel.level(),
                thread.stack_top.as_u64(),
                0,
                kernel_space.root,
            )
        };

        let mut boot_regs = Registers::default();
        boot_regs.set_root(kernel_space.root);
        let boot = kernel_task(&mut tasks, boot_regs, TaskState::Running)?;
        let idle = kernel_task(&mut tasks, thread_regs(config.idle), TaskState::Ready)?;
        let reclaimer = kernel_task(&mut tasks, thread_regs(config.reclaimer), TaskState::Blocked)?;
        let mut ready = VecDeque::new();
        ready.try_reserve(tasks.len())?;
        let mut reclaim = VecDeque::new();
        reclaim.try_reserve_exact(config.reclaim_capacity)?;
        debug!("Scheduler ready: boot {boot}, idle {idle}, reclaimer {reclaimer}");

        Ok(Self {
            switch,
            tasks,
            semaphores: Arena::new(),
            queues,
            ready,
            current: boot,
            boot,
            idle,
            reclaimer,
            reclaim,
            config,
            kernel_space,
            next_pid: 1,
            scheduler_locks: 0,
            switch_locks: 0,
            postponed: false,
        })
    }

    #[must_use]
    pub const fn current(&self) -> TaskId {
        self.current
    }

    #[must_use]
    pub const fn boot_task(&self) -> TaskId {
        self.boot
    }

    #[must_use]
    pub const fn idle_task(&self) -> TaskId {
        self.idle
    }

    #[must_use]
    pub const fn reclaimer_task(&self) -> TaskId {
        self.reclaimer
    }

    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[must_use]
    pub const fn kernel_space(&self) -> TaskSpace {
        self.kernel_space
    }

    #[must_use]
    pub const fn switch(&self) -> &S {
        &self.switch
    }

    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.0)
    }

    #[must_use]
    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.task(id).map(Task::state)
    }

    /// Ready tasks in the order they will run.
    pub fn ready_tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.ready.iter().copied()
    }

    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub const fn is_scheduler_locked(&self) -> bool {
        self.scheduler_locks > 0
    }

    #[must_use]
    pub const fn are_task_switches_locked(&self) -> bool {
        self.switch_locks > 0
    }

    /// Create a task that starts at `entry` in `space` and append it to the
    /// ready queue.
    ///
    /// User tasks get a fresh [`Pid`]; the working directory is inherited
    /// from the creating task.
    ///
    /// # Errors
    /// [`SchedError::OutOfMemory`] if the heap cannot hold the task. Nothing
    /// is left behind in that case.
    pub fn create_task(
        &mut self,
        entry: VirtualAddress,
        space: TaskSpace,
        ring: Ring,
        args: Vec<String>,
    ) -> Result<TaskId, SchedError> {
        let regs = Registers::initial(
            self.switch.trampoline(),
            entry.as_u64(),
            ring.level(),
            KERNEL_STACK_TOP,
            USER_STACK_TOP,
            space.root,
        );
        let cwd = try_string(self.task(self.current).map_or("/", Task::cwd))?;
        self.reserve_ready()?;
        let pid = self.peek_pid(ring);
        let termination = WaitQueue::create(self)?;
        let id = self.insert_ready(Task {
            regs,
            state: TaskState::Ready,
            ticks_remaining: self.config.quantum,
            wake_reason: None,
            on_wait_list: false,
            termination,
            pid,
            ring,
            space,
            parent: Some(self.current),
            files: FdTable::new(),
            cwd,
            args,
        })?;
        debug!("Created {id} ({ring:?}, pid {pid:?}) at {entry}");
        Ok(id)
    }

    /// Duplicate the current task into `space`.
    ///
    /// The copy resumes from `frame` (the register state the current task
    /// entered the kernel with) but sees `rax = 0`. Open files are
    /// duplicated; arguments and working directory are copied.
    ///
    /// # Errors
    /// [`SchedError::NoSuchTask`] if the current task has already been
    /// reclaimed, [`SchedError::OutOfMemory`] if the heap cannot hold the
    /// copy.
    pub fn copy_task(&mut self, space: TaskSpace, frame: &Registers) -> Result<TaskId, SchedError> {
        let parent = self.current;
        let source = self.task(parent).ok_or(SchedError::NoSuchTask(parent))?;
        let mut regs = *frame;
        regs.rax = 0;
        regs.set_root(space.root);
        let ring = source.ring;
        let cwd = try_string(&source.cwd)?;
        let args = try_strings(&source.args)?;
        let mut files = source.files.duplicate()?;

        if let Err(e) = self.reserve_ready() {
            files.close_all();
            return Err(e);
        }
        let termination = match WaitQueue::create(self) {
            Ok(queue) => queue,
            Err(e) => {
                files.close_all();
                return Err(e.into());
            }
        };
        let pid = self.peek_pid(ring);
        let id = self.insert_ready(Task {
            regs,
            state: TaskState::Ready,
            ticks_remaining: self.config.quantum,
            wake_reason: None,
            on_wait_list: false,
            termination,
            pid,
            ring,
            space,
            parent: Some(parent),
            files,
            cwd,
            args,
        })?;
        debug!("Copied {parent} into {id} (pid {pid:?})");
        Ok(id)
    }

    /// Room in the ready queue for every task plus one more, so waking a
    /// task never allocates.
    fn reserve_ready(&mut self) -> Result<(), SchedError> {
        let wanted = (self.tasks.len() + 1).saturating_sub(self.ready.len());
        self.ready.try_reserve(wanted)?;
        Ok(())
    }

    /// The [`Pid`] a new task of `ring` would get. Taken for good by
    /// [`Scheduler::insert_ready`].
    fn peek_pid(&self, ring: Ring) -> Option<Pid> {
        (ring == Ring::User).then_some(Pid(self.next_pid))
    }

    /// Store `task` and queue it. On failure its files are closed and its
    /// termination queue is destroyed.
    fn insert_ready(&mut self, task: Task) -> Result<TaskId, SchedError> {
        let takes_pid = task.pid.is_some();
        let id = match self.tasks.insert(task) {
            Ok(index) => TaskId(index),
            Err(mut task) => {
                task.files.close_all();
                if let Err(e) = task.termination.destroy(self) {
                    warn!("Termination queue of a task that never existed: {e}");
                }
                return Err(SchedError::OutOfMemory);
            }
        };
        if takes_pid {
            self.next_pid = self.next_pid.wrapping_add(1);
        }
        self.ready.push_back(id);
        Ok(id)
    }

    /// Give up the CPU to the next ready task.
    ///
    /// A running caller goes to the tail of the ready queue with a fresh
    /// quantum. With nothing else ready a running caller just continues,
    /// while a blocked or terminated one hands over to the idle task. While
    /// task switches are locked the switch is postponed until the lock is
    /// released.
    pub fn yield_now(&mut self) {
        if self.switch_locks > 0 {
            self.postponed = true;
            return;
        }

        let from = self.current;
        let from_state = self.state(from);
        let next = match self.ready.pop_front() {
            Some(next) => next,
            None if from_state == Some(TaskState::Running) || from == self.idle => {
                if let Some(task) = self.tasks.get_mut(from.0) {
                    task.ticks_remaining = self.config.quantum;
                }
                return;
            }
            None => self.idle,
        };

        if from_state == Some(TaskState::Running) {
            if let Some(task) = self.tasks.get_mut(from.0) {
                task.state = TaskState::Ready;
                task.ticks_remaining = self.config.quantum;
            }
            if from != self.idle {
                self.ready.push_back(from);
            }
        }
        self.switch_to(from, next);
    }

    fn switch_to(&mut self, from: TaskId, to: TaskId) {
        let quantum = self.config.quantum;
        let Some(target) = self.tasks.get_mut(to.0) else {
            warn!("Dropping stale {to} from the ready queue");
            return;
        };
        target.state = TaskState::Running;
        target.ticks_remaining = quantum;
        let to_regs: *const Registers = &raw const target.regs;
        self.current = to;

        let mut scratch = Registers::default();
        let from_regs: *mut Registers = match self.tasks.get_mut(from.0) {
            Some(task) => &raw mut task.regs,
            None => &raw mut scratch,
        };
        trace!("Switching {from} -> {to}");
        // SAFETY: both pointers address live register files in `self.tasks`
        // (or the local scratch for a task that no longer exists) and the
        // arena is not touched until the switch returns.
        unsafe { self.switch.switch(from_regs, to_regs) };
    }

    /// Account one timer tick to the current task.
    ///
    /// Exhausting the quantum yields, unless the scheduler is locked, in
    /// which case the yield happens when the lock is released. The idle
    /// task is preempted as soon as anything is ready.
    pub fn tick(&mut self) {
        let current = self.current;
        let expired = if current == self.idle {
            !self.ready.is_empty()
        } else {
            match self.tasks.get_mut(current.0) {
                Some(task) => {
                    task.ticks_remaining = task.ticks_remaining.saturating_sub(1);
                    task.ticks_remaining == 0
                }
                None => true,
            }
        };
        if !expired {
            return;
        }
        if self.scheduler_locks > 0 {
            self.postponed = true;
        } else {
            self.yield_now();
        }
    }

    /// Block the current task and run something else.
    ///
    /// Returns once the task is made ready again with
    /// [`Scheduler::unblock`].
    ///
    /// # Errors
    /// [`SyncError::Locked`], without blocking, while the scheduler or task
    /// switches are locked; the lock would otherwise stay held by a task
    /// that is not running.
    pub fn block_current(&mut self) -> Result<(), SyncError> {
        if self.scheduler_locks > 0 {
            return Err(SyncError::Locked);
        }
        let me = self.current;
        if let Some(task) = self.tasks.get_mut(me.0) {
            task.state = TaskState::Blocked;
            task.wake_reason = None;
        }
        self.finish_block(me)
    }

    /// Mark the current task blocked on a semaphore or wait queue that has
    /// just queued it. The switch happens in [`Scheduler::finish_block`],
    /// after the caller has released its scheduler lock.
    pub(crate) fn park_current(&mut self) {
        let me = self.current;
        if let Some(task) = self.tasks.get_mut(me.0) {
            task.state = TaskState::Blocked;
            task.wake_reason = None;
            task.on_wait_list = true;
        }
    }

    /// Switch away from `me` unless a postponed yield already did, then
    /// report why it was woken.
    pub(crate) fn finish_block(&mut self, me: TaskId) -> Result<(), SyncError> {
        if self.current == me && self.state(me) == Some(TaskState::Blocked) {
            self.yield_now();
        }
        self.take_wake_result(me)
    }

    /// Consume the reason `id` was last woken for.
    pub(crate) fn take_wake_result(&mut self, id: TaskId) -> Result<(), SyncError> {
        let reason = self
            .tasks
            .get_mut(id.0)
            .and_then(|task| task.wake_reason.take());
        match reason {
            Some(WakeReason::Destroyed) => Err(SyncError::Destroyed),
            Some(WakeReason::Signaled) | None => Ok(()),
        }
    }

    /// Make a blocked task ready again.
    ///
    /// Meant for tasks blocked with [`Scheduler::block_current`] directly.
    ///
    /// # Errors
    /// [`SchedError::NoSuchTask`], [`SchedError::NotBlocked`], or
    /// [`SchedError::WaitingOnPrimitive`] for a task queued on a semaphore or
    /// wait queue, which only that primitive may wake.
    pub fn unblock(&mut self, id: TaskId) -> Result<(), SchedError> {
        let task = self.task(id).ok_or(SchedError::NoSuchTask(id))?;
        match task.state {
            TaskState::Blocked if task.on_wait_list => Err(SchedError::WaitingOnPrimitive(id)),
            TaskState::Blocked => {
                self.wake(id, WakeReason::Signaled);
                Ok(())
            }
            _ => Err(SchedError::NotBlocked(id)),
        }
    }

    /// Ready `id` if it is blocked; returns whether it was.
    pub(crate) fn wake(&mut self, id: TaskId, reason: WakeReason) -> bool {
        let quantum = self.config.quantum;
        match self.tasks.get_mut(id.0) {
            Some(task) if task.state == TaskState::Blocked => {
                task.state = TaskState::Ready;
                task.wake_reason = Some(reason);
                task.on_wait_list = false;
                task.ticks_remaining = quantum;
                self.ready.push_back(id);
                true
            }
            _ => false,
        }
    }

    /// Block until `target` has terminated.
    ///
    /// # Errors
    /// [`SchedError::WaitForSelf`], or [`SchedError::NoSuchTask`] if the
    /// handle is unknown or the task was already reclaimed.
    pub fn wait_for(&mut self, target: TaskId) -> Result<(), SchedError> {
        if target == self.current {
            return Err(SchedError::WaitForSelf);
        }
        let task = self.task(target).ok_or(SchedError::NoSuchTask(target))?;
        if task.state == TaskState::Terminated {
            return Ok(());
        }
        let termination = task.termination;
        termination.wait(self)?;
        Ok(())
    }

    /// End the current task.
    ///
    /// Closes its files, wakes everything waiting for it, queues it for the
    /// reclaimer and switches away. The address space and control block are
    /// released later by whoever drains [`Scheduler::take_reclaimable`].
    ///
    /// # Errors
    /// [`SchedError::CannotTerminate`] for the idle and reclaimer tasks,
    /// [`SchedError::ReclaimQueueFull`] if the reclaimer has fallen behind.
    pub fn terminate_current(&mut self) -> Result<(), SchedError> {
        let me = self.current;
        if me == self.idle || me == self.reclaimer {
            return Err(SchedError::CannotTerminate(me));
        }
        if self.reclaim.len() >= self.config.reclaim_capacity {
            warn!("Reclaim queue full, {me} must retry");
            return Err(SchedError::ReclaimQueueFull);
        }
        let task = self
            .tasks
            .get_mut(me.0)
            .ok_or(SchedError::NoSuchTask(me))?;
        task.files.close_all();
        task.state = TaskState::Terminated;
        let termination = task.termination;

        termination.wake_all(self)?;
        self.reclaim.push_back(me);
        self.wake(self.reclaimer, WakeReason::Signaled);
        debug!("{me} terminated");
        self.yield_now();
        Ok(())
    }

    /// Pop the next terminated task and drop its control block.
    pub fn take_reclaimable(&mut self) -> Option<Reclaimed> {
        while let Some(id) = self.reclaim.pop_front() {
            let Some(task) = self.tasks.remove(id.0) else {
                continue;
            };
            if let Err(e) = task.termination.destroy(self) {
                warn!("Termination queue of {id} already gone: {e}");
            }
            debug!("Reclaimed {id}");
            return Some(Reclaimed {
                id,
                pid: task.pid,
                space: task.space,
            });
        }
        None
    }

    /// Terminated tasks not yet reclaimed.
    #[must_use]
    pub fn pending_reclaim(&self) -> usize {
        self.reclaim.len()
    }

    /// Block the reclaimer until more work arrives. No-op for other tasks
    /// or while work is pending.
    pub fn park_reclaimer(&mut self) {
        if self.current == self.reclaimer && self.reclaim.is_empty() {
            if let Err(e) = self.block_current() {
                warn!("Reclaimer could not park: {e}");
            }
        }
    }

    /// Install `file` in the current task's file table.
    ///
    /// # Errors
    /// [`SchedError::NoSuchTask`] if the current task is gone.
    pub fn open_file(&mut self, file: Box<dyn OpenFile>) -> Result<Fd, SchedError> {
        let me = self.current;
        let task = self.tasks.get_mut(me.0).ok_or(SchedError::NoSuchTask(me))?;
        Ok(task.files.open(file)?)
    }

    /// The file behind `fd` in the current task.
    #[must_use]
    pub fn file(&self, fd: Fd) -> Option<&dyn OpenFile> {
        self.tasks.get(self.current.0)?.files.get(fd)
    }

    /// Close `fd` in the current task.
    ///
    /// # Errors
    /// [`SchedError::BadDescriptor`] if `fd` is not open.
    pub fn close_file(&mut self, fd: Fd) -> Result<(), SchedError> {
        let me = self.current;
        let task = self.tasks.get_mut(me.0).ok_or(SchedError::NoSuchTask(me))?;
        if task.files.close(fd) {
            Ok(())
        } else {
            Err(SchedError::BadDescriptor(fd))
        }
    }

    /// Change the current task's working directory.
    ///
    /// # Errors
    /// [`SchedError::NoSuchTask`] if the current task is gone.
    pub fn set_cwd(&mut self, cwd: String) -> Result<(), SchedError> {
        let me = self.current;
        let task = self.tasks.get_mut(me.0).ok_or(SchedError::NoSuchTask(me))?;
        task.cwd = cwd;
        Ok(())
    }

    /// Run a yield that was held back by a lock, once no lock is held.
    pub(crate) fn run_postponed(&mut self) {
        if self.scheduler_locks == 0 && self.switch_locks == 0 && self.postponed {
            self.postponed = false;
            self.yield_now();
        }
    }
}
