//! [`PhysMapper`] for kernels that keep physical memory mapped at a fixed offset.

use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::{Frame, PhysMapper};

/// Reaches physical frame `pa` at virtual address `offset + pa`.
///
/// With an offset of zero this is the identity map of low memory that the
/// boot code sets up.
#[derive(Debug)]
pub struct OffsetPhysMapper {
    offset: u64,
}

impl OffsetPhysMapper {
    /// # Safety
    /// Every frame the physical allocator can hand out must be mapped
    /// writable at `offset + pa` in every address space the kernel runs in.
    #[must_use]
    pub const unsafe fn new(offset: u64) -> Self {
        Self { offset }
    }
}

impl PhysMapper for OffsetPhysMapper {
    fn frame_mut(&mut self, frame: PhysicalAddress) -> &mut Frame {
        let va = (self.offset + frame.align_down().as_u64()) as *mut Frame;
        // SAFETY: guaranteed by the contract of `OffsetPhysMapper::new`.
        unsafe { &mut *va }
    }
}
