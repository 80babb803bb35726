//! Word access to the memory behind the heap window.

use alloc::collections::BTreeMap;
use kernel_memory_addresses::VirtualAddress;

/// Reads and writes 8-byte words at virtual addresses inside the heap window.
///
/// The free-list heap keeps its chunk headers in the memory it manages and
/// touches it only through this trait.
pub trait HeapMemory {
    fn read_word(&self, addr: VirtualAddress) -> u64;
    fn write_word(&mut self, addr: VirtualAddress, value: u64);
}

/// Plain loads and stores through the current page tables.
#[derive(Debug)]
pub struct DirectMemory(());

impl DirectMemory {
    /// # Safety
    /// Every address the heap is given must be mapped writable, 8-byte
    /// aligned and not used by anything but that heap.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self(())
    }
}

impl HeapMemory for DirectMemory {
    #[inline]
    fn read_word(&self, addr: VirtualAddress) -> u64 {
        // SAFETY: guaranteed by the contract of `DirectMemory::new`.
        unsafe { (addr.as_u64() as *const u64).read() }
    }

    #[inline]
    fn write_word(&mut self, addr: VirtualAddress, value: u64) {
        // SAFETY: guaranteed by the contract of `DirectMemory::new`.
        unsafe { (addr.as_u64() as *mut u64).write(value) }
    }
}

/// Sparse host-side memory; unwritten words read as zero.
#[derive(Debug, Default)]
pub struct SimulatedMemory {
    words: BTreeMap<u64, u64>,
}

impl SimulatedMemory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl HeapMemory for SimulatedMemory {
    fn read_word(&self, addr: VirtualAddress) -> u64 {
        self.words.get(&addr.as_u64()).copied().unwrap_or(0)
    }

    fn write_word(&mut self, addr: VirtualAddress, value: u64) {
        self.words.insert(addr.as_u64(), value);
    }
}
