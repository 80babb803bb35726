use crate::task::{Fd, TaskId};
use alloc::collections::TryReserveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SchedError {
    #[error("{0} does not exist")]
    NoSuchTask(TaskId),
    #[error("{0} is not blocked")]
    NotBlocked(TaskId),
    /// Tasks queued on a semaphore or wait queue are only woken by it.
    #[error("{0} is waiting on a semaphore or wait queue")]
    WaitingOnPrimitive(TaskId),
    #[error("{0} cannot be terminated")]
    CannotTerminate(TaskId),
    #[error("a task cannot wait for itself")]
    WaitForSelf,
    #[error("the reclaim queue is full")]
    ReclaimQueueFull,
    #[error("file descriptor {0:?} is not open")]
    BadDescriptor(Fd),
    #[error("out of kernel heap")]
    OutOfMemory,
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Failure of a blocking primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The primitive was destroyed, possibly while the caller was waiting on it.
    #[error("synchronization object was destroyed")]
    Destroyed,
    #[error("semaphore released more often than acquired")]
    NotHeld,
    #[error("semaphore needs a capacity of at least one")]
    ZeroCapacity,
    /// Blocking would switch away with the scheduler or task switches locked.
    #[error("cannot block while the scheduler is locked")]
    Locked,
    #[error("out of kernel heap")]
    OutOfMemory,
}

impl From<TryReserveError> for SchedError {
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

impl From<TryReserveError> for SyncError {
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}
