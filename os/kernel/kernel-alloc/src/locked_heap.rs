//! `GlobalAlloc` front end for the kernel heap.

use crate::free_list::{FreeListHeap, HeapError, WORD};
use crate::heap_memory::HeapMemory;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::null_mut;
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::{SpinLock, SpinLockGuard};
use log::error;

/// The kernel heap behind a spin lock.
///
/// Starts empty and is filled in once during boot with [`install`](Self::install).
/// Implements [`GlobalAlloc`] so the `alloc` crate's collections draw from the
/// same heap as explicit `kmalloc`-style callers.
pub struct LockedHeap<M> {
    inner: SpinLock<Option<FreeListHeap<M>>>,
}

impl<M> Default for LockedHeap<M> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<M> LockedHeap<M> {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            inner: SpinLock::new(None),
        }
    }

    /// Puts `heap` in place, returning the previous one if any.
    pub fn install(&self, heap: FreeListHeap<M>) -> Option<FreeListHeap<M>> {
        self.inner.lock().replace(heap)
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Locks the heap for a sequence of operations.
    pub fn lock(&self) -> SpinLockGuard<'_, Option<FreeListHeap<M>>> {
        self.inner.lock()
    }
}

impl<M: HeapMemory> LockedHeap<M> {
    /// Runs `f` on the installed heap.
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`] with `requested: 0` if no heap is installed,
    /// otherwise whatever `f` returns.
    pub fn with_heap<R>(
        &self,
        f: impl FnOnce(&mut FreeListHeap<M>) -> Result<R, HeapError>,
    ) -> Result<R, HeapError> {
        let mut guard = self.inner.lock();
        let heap = guard
            .as_mut()
            .ok_or(HeapError::OutOfMemory { requested: 0 })?;
        f(heap)
    }
}

unsafe impl<M: HeapMemory + Send> GlobalAlloc for LockedHeap<M> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() as u64 > WORD {
            return null_mut();
        }
        self.with_heap(|heap| heap.alloc(layout.size() as u64))
            .map_or(null_mut(), |va| va.as_u64() as *mut u8)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let va = VirtualAddress::from_ptr(ptr);
        if let Err(e) = self.with_heap(|heap| heap.free(va)) {
            error!("dealloc of {va} failed: {e}");
        }
    }
}
