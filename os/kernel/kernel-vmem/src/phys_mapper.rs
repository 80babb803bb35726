use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};

/// Bytes of one physical frame.
pub type Frame = [u8; PAGE_SIZE as usize];

/// Gives the kernel access to the contents of physical frames.
///
/// Page-table nodes come from the node pool and never need this; it is used
/// when frame *contents* matter: zeroing fresh stack pages and copying user
/// pages into a cloned address space.
pub trait PhysMapper {
    /// The bytes of the page-aligned frame at `frame`.
    fn frame_mut(&mut self, frame: PhysicalAddress) -> &mut Frame;

    fn zero_frame(&mut self, frame: PhysicalAddress) {
        self.frame_mut(frame).fill(0);
    }

    /// Copies the whole frame `src` into `dst`.
    fn copy_frame(&mut self, src: PhysicalAddress, dst: PhysicalAddress) {
        const CHUNK: usize = 256;
        let mut buf = [0u8; CHUNK];
        for off in (0..PAGE_SIZE as usize).step_by(CHUNK) {
            buf.copy_from_slice(&self.frame_mut(src)[off..off + CHUNK]);
            self.frame_mut(dst)[off..off + CHUNK].copy_from_slice(&buf);
        }
    }
}

/// Host-side physical memory: frames materialize zeroed on first access.
#[derive(Default)]
pub struct SimulatedPhys {
    frames: BTreeMap<u64, Box<Frame>>,
}

impl SimulatedPhys {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents of `frame` if it was ever touched.
    #[must_use]
    pub fn frame(&self, frame: PhysicalAddress) -> Option<&Frame> {
        self.frames.get(&frame.align_down().as_u64()).map(|f| &**f)
    }

    /// Number of frames touched so far.
    #[must_use]
    pub fn frames_touched(&self) -> usize {
        self.frames.len()
    }
}

impl PhysMapper for SimulatedPhys {
    fn frame_mut(&mut self, frame: PhysicalAddress) -> &mut Frame {
        self.frames
            .entry(frame.align_down().as_u64())
            .or_insert_with(|| Box::new([0; PAGE_SIZE as usize]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_frame_duplicates_contents() {
        let mut phys = SimulatedPhys::new();
        let src = PhysicalAddress::new(0x0040_0000);
        let dst = PhysicalAddress::new(0x0041_0000);
        phys.frame_mut(src)[0] = 0xAA;
        phys.frame_mut(src)[4095] = 0x55;
        phys.copy_frame(src, dst);
        let copy = phys.frame(dst).unwrap();
        assert_eq!((copy[0], copy[4095]), (0xAA, 0x55));

        phys.zero_frame(src);
        assert_eq!(phys.frame(src).unwrap()[0], 0);
        assert_eq!(phys.frames_touched(), 2);
    }
}
