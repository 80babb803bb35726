use crate::config::ConfigError;
use kernel_alloc::{FrameAllocError, HeapError, VmmError};
use kernel_sched::{SchedError, SyncError};
use kernel_vmem::VmemError;

/// Coarse classification of every kernel failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Out-of-range, misaligned or otherwise unusable argument.
    InvalidParameter,
    /// Physical pages, heap chunks, page-table nodes or queue slots ran out.
    OutOfMemory,
    /// A lookup failed: unmapped address, reclaimed task, closed descriptor.
    NotFound,
    /// The operation would break an ownership invariant (double free and friends).
    AlreadyInUse,
    /// The synchronization object was destroyed.
    Destroyed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Frame(#[from] FrameAllocError),
    #[error(transparent)]
    Vmem(#[from] VmemError),
    #[error(transparent)]
    Vmm(#[from] VmmError),
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error(transparent)]
    Sched(#[from] SchedError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("the kernel context was already published")]
    AlreadyPublished,
    #[error("the kernel context has not been published")]
    NotPublished,
}

impl KernelError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::InvalidParameter,
            Self::Frame(e) => frame_kind(e),
            Self::Vmem(e) => vmem_kind(e),
            Self::Vmm(e) => match e {
                VmmError::OutOfMemory => ErrorKind::OutOfMemory,
                VmmError::KernelSpace => ErrorKind::InvalidParameter,
                VmmError::Vmem(e) => vmem_kind(e),
                VmmError::Frame(e) => frame_kind(e),
            },
            Self::Heap(e) => match e {
                HeapError::OutOfMemory { .. } => ErrorKind::OutOfMemory,
                HeapError::InvalidPointer(_)
                | HeapError::RegionTooSmall { .. }
                | HeapError::Unaligned(_) => ErrorKind::InvalidParameter,
                HeapError::DoubleFree(_) | HeapError::Corrupt(_) => ErrorKind::AlreadyInUse,
            },
            Self::Sched(e) => match e {
                SchedError::NoSuchTask(_) | SchedError::BadDescriptor(_) => ErrorKind::NotFound,
                SchedError::NotBlocked(_)
                | SchedError::WaitingOnPrimitive(_)
                | SchedError::CannotTerminate(_)
                | SchedError::WaitForSelf => ErrorKind::InvalidParameter,
                SchedError::ReclaimQueueFull | SchedError::OutOfMemory => ErrorKind::OutOfMemory,
                SchedError::Sync(e) => sync_kind(e),
            },
            Self::Sync(e) => sync_kind(e),
            Self::AlreadyPublished => ErrorKind::AlreadyInUse,
            Self::NotPublished => ErrorKind::NotFound,
        }
    }
}

const fn frame_kind(e: &FrameAllocError) -> ErrorKind {
    match e {
        FrameAllocError::NotAllocated(_) => ErrorKind::AlreadyInUse,
        FrameAllocError::InvalidPage(_)
        | FrameAllocError::Reserved(_)
        | FrameAllocError::BitmapTooSmall { .. } => ErrorKind::InvalidParameter,
    }
}

const fn vmem_kind(e: &VmemError) -> ErrorKind {
    match e {
        VmemError::OutOfNodes => ErrorKind::OutOfMemory,
        VmemError::CorruptNodePool { .. } => ErrorKind::AlreadyInUse,
        VmemError::NotMapped(_) | VmemError::StaleAddressSpace => ErrorKind::NotFound,
        VmemError::PoolTooLarge { .. }
        | VmemError::UnalignedVirtual(_)
        | VmemError::UnalignedPhysical(_)
        | VmemError::RangeOverflow { .. }
        | VmemError::KernelRegion(_) => ErrorKind::InvalidParameter,
    }
}

const fn sync_kind(e: &SyncError) -> ErrorKind {
    match e {
        SyncError::Destroyed => ErrorKind::Destroyed,
        SyncError::NotHeld | SyncError::ZeroCapacity | SyncError::Locked => {
            ErrorKind::InvalidParameter
        }
        SyncError::OutOfMemory => ErrorKind::OutOfMemory,
    }
}
