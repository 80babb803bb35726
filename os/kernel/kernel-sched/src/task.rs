//! Task control blocks and the per-task file table.

use crate::arena::Index;
use crate::registers::Registers;
use crate::sync::WaitQueue;
use alloc::boxed::Box;
use alloc::collections::TryReserveError;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::AddressSpace;

/// Handle of a task. Stale once the task has been reclaimed.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) Index);

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({:?})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task {:?}", self.0)
    }
}

/// Process identifier. Only user tasks carry one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling state.
///
/// ```text
///            dispatch              block_current
///   Ready ─────────────▶ Running ─────────────────▶ Blocked
///     ▲                  │  │                           │
///     └──── preempt ─────┘  │ terminate_current         │
///     ▲                     ▼                           │
///     │                 Terminated ──▶ reclaimed        │
///     └──────────────────── unblock ────────────────────┘
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Ready,
    Blocked,
    Terminated,
}

/// Privilege level a task's entry point runs at.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Ring {
    Kernel,
    User,
}

impl Ring {
    #[must_use]
    pub const fn level(self) -> u8 {
        match self {
            Self::Kernel => 0,
            Self::User => 3,
        }
    }
}

/// Why a blocked task was made ready again.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum WakeReason {
    Signaled,
    Destroyed,
}

/// Address space a task runs in, with the root its `cr3` is loaded from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TaskSpace {
    pub space: AddressSpace,
    pub root: PhysicalAddress,
}

/// An open file as the scheduler sees it.
///
/// File systems live outside the kernel core; a task only needs to close its
/// files when it terminates and duplicate them when it is copied.
pub trait OpenFile: Send {
    fn close(&mut self);

    fn duplicate(&self) -> Box<dyn OpenFile>;
}

/// Index into a task's file table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(pub u32);

/// Open files of one task, indexed by [`Fd`]. Closed slots are reused.
#[derive(Default)]
pub struct FdTable {
    slots: Vec<Option<Box<dyn OpenFile>>>,
}

impl FdTable {
    #[must_use]
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Install `file` in the lowest free slot.
    ///
    /// # Errors
    /// Closes `file` and fails if the table cannot grow.
    #[allow(clippy::cast_possible_truncation)]
    pub fn open(&mut self, mut file: Box<dyn OpenFile>) -> Result<Fd, TryReserveError> {
        if let Some(i) = self.slots.iter().position(Option::is_none) {
            self.slots[i] = Some(file);
            return Ok(Fd(i as u32));
        }
        if let Err(e) = self.slots.try_reserve(1) {
            file.close();
            return Err(e);
        }
        self.slots.push(Some(file));
        Ok(Fd((self.slots.len() - 1) as u32))
    }

    #[must_use]
    pub fn get(&self, fd: Fd) -> Option<&dyn OpenFile> {
        self.slots.get(fd.0 as usize)?.as_deref()
    }

    /// Close `fd`. Returns `false` if it was not open.
    pub fn close(&mut self, fd: Fd) -> bool {
        match self.slots.get_mut(fd.0 as usize).and_then(Option::take) {
            Some(mut file) => {
                file.close();
                true
            }
            None => false,
        }
    }

    pub fn close_all(&mut self) {
        for mut file in self.slots.drain(..).flatten() {
            file.close();
        }
    }

    /// Table with every open file duplicated into the same slot.
    ///
    /// # Errors
    /// Fails before duplicating anything if the new table cannot be sized.
    pub fn duplicate(&self) -> Result<Self, TryReserveError> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(self.slots.len())?;
        slots.extend(self.slots.iter().map(|f| f.as_ref().map(|f| f.duplicate())));
        Ok(Self { slots })
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|f| f.is_some()).count()
    }
}

/// Task control block.
pub struct Task {
    pub(crate) regs: Registers,
    pub(crate) state: TaskState,
    pub(crate) ticks_remaining: u32,
    pub(crate) wake_reason: Option<WakeReason>,
    /// Queued in a semaphore or wait queue FIFO.
    pub(crate) on_wait_list: bool,
    pub(crate) termination: WaitQueue,
    pub(crate) pid: Option<Pid>,
    pub(crate) ring: Ring,
    pub(crate) space: TaskSpace,
    pub(crate) parent: Option<TaskId>,
    pub(crate) files: FdTable,
    pub(crate) cwd: String,
    pub(crate) args: Vec<String>,
}

impl Task {
    #[must_use]
    pub const fn registers(&self) -> &Registers {
        &self.regs
    }

    #[must_use]
    pub const fn state(&self) -> TaskState {
        self.state
    }

    #[must_use]
    pub const fn ticks_remaining(&self) -> u32 {
        self.ticks_remaining
    }

    #[must_use]
    pub const fn pid(&self) -> Option<Pid> {
        self.pid
    }

    #[must_use]
    pub const fn ring(&self) -> Ring {
        self.ring
    }

    #[must_use]
    pub const fn space(&self) -> TaskSpace {
        self.space
    }

    #[must_use]
    pub const fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    #[must_use]
    pub const fn files(&self) -> &FdTable {
        &self.files
    }

    #[must_use]
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Heap copy of `s` that reports exhaustion instead of aborting.
pub(crate) fn try_string(s: &str) -> Result<String, TryReserveError> {
    let mut out = String::new();
    out.try_reserve_exact(s.len())?;
    out.push_str(s);
    Ok(out)
}

pub(crate) fn try_strings(strings: &[String]) -> Result<Vec<String>, TryReserveError> {
    let mut out = Vec::new();
    out.try_reserve_exact(strings.len())?;
    for s in strings {
        out.push(try_string(s)?);
    }
    Ok(out)
}

/// What is left of a task once the scheduler lets go of it.
///
/// The owner of the page tables and frames tears down `space`.
#[derive(Debug)]
pub struct Reclaimed {
    pub id: TaskId,
    pub pid: Option<Pid>,
    pub space: TaskSpace,
}
