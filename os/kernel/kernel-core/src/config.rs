use kernel_info::memory::{
    HEAP_INITIAL_PAGES, HEAP_MAX_PAGES, QUANTUM_TICKS, RECLAIM_QUEUE_CAPACITY, RESERVED_LOW_BYTES,
};
use kernel_memory_addresses::PAGE_SIZE;
use log::LevelFilter;

/// Boot-time tunables.
///
/// [`Default`] reproduces the layout constants of `kernel_info::memory`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// Low physical memory never handed out, in bytes.
    pub reserved_low_bytes: u64,
    /// Pages backing the heap right after boot.
    pub heap_initial_pages: u64,
    /// Ceiling for heap growth, in pages.
    pub heap_max_pages: u64,
    /// Timer ticks per time slice.
    pub quantum_ticks: u32,
    pub log_level: LevelFilter,
    /// Terminated tasks that may await reclamation at once.
    pub reclaim_queue_capacity: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            reserved_low_bytes: RESERVED_LOW_BYTES,
            heap_initial_pages: HEAP_INITIAL_PAGES,
            heap_max_pages: HEAP_MAX_PAGES,
            quantum_ticks: QUANTUM_TICKS,
            log_level: LevelFilter::Info,
            reclaim_queue_capacity: RECLAIM_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("reserved low region of {0:#x} bytes is not page aligned")]
    UnalignedReservedRegion(u64),
    #[error("the heap needs at least one initial page")]
    EmptyHeap,
    #[error("heap ceiling of {max} pages is below the initial {initial} pages")]
    HeapCeilingBelowInitial { initial: u64, max: u64 },
    #[error("heap ceiling of {pages} pages exceeds the {window}-page heap window")]
    HeapWindowExceeded { pages: u64, window: u64 },
    #[error("the time slice must be at least one tick")]
    ZeroQuantum,
    #[error("the reclaim queue needs room for at least one task")]
    ZeroReclaimCapacity,
}

impl KernelConfig {
    /// # Errors
    /// The first [`ConfigError`] found.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if !self.reserved_low_bytes.is_multiple_of(PAGE_SIZE) {
            return Err(ConfigError::UnalignedReservedRegion(self.reserved_low_bytes));
        }
        if self.heap_initial_pages == 0 {
            return Err(ConfigError::EmptyHeap);
        }
        if self.heap_max_pages < self.heap_initial_pages {
            return Err(ConfigError::HeapCeilingBelowInitial {
                initial: self.heap_initial_pages,
                max: self.heap_max_pages,
            });
        }
        if self.heap_max_pages > HEAP_MAX_PAGES {
            return Err(ConfigError::HeapWindowExceeded {
                pages: self.heap_max_pages,
                window: HEAP_MAX_PAGES,
            });
        }
        if self.quantum_ticks == 0 {
            return Err(ConfigError::ZeroQuantum);
        }
        if self.reclaim_queue_capacity == 0 {
            return Err(ConfigError::ZeroReclaimCapacity);
        }
        Ok(())
    }
}
