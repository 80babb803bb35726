//! Bitmap physical page allocator.

use kernel_info::boot::{BootMemoryMap, KernelImage};
use kernel_info::memory::MAX_MEMORY_REGIONS;
use kernel_memory_addresses::{PAGE_SIZE, PageIndex, PhysicalAddress, align_down, align_up};
use kernel_vmem::{Bitmap, words_for};
use log::{info, trace, warn};

/// State of one physical page as seen by [`FrameAllocator::is_page_used`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PageUsage {
    Free,
    Used,
    /// Not inside any reported memory region; never handed out.
    Invalid,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("page {0} is outside every usable memory region")]
    InvalidPage(PageIndex),
    /// The page is valid but currently free (double free).
    #[error("page {0} is not allocated")]
    NotAllocated(PageIndex),
    /// The page belongs to the reserved low region or the kernel image.
    #[error("page {0} is reserved for the kernel")]
    Reserved(PageIndex),
    #[error("bitmap of {words} words cannot track {pages} pages")]
    BitmapTooSmall { words: usize, pages: usize },
}

/// Page-granular view of one usable region.
#[derive(Debug, Copy, Clone, Default)]
struct PageRange {
    first: u64,
    end: u64,
}

/// Tracks every physical page frame with one bit.
///
/// A clear bit means the page is valid and free. Pages outside the reported
/// regions and the reserved low pages have their bit set permanently;
/// [`is_page_used`](Self::is_page_used) still tells them apart through the
/// region list. Allocation is lowest-address first.
pub struct FrameAllocator<'a> {
    regions: [PageRange; MAX_MEMORY_REGIONS],
    region_count: usize,
    bitmap: Bitmap<&'a mut [u64]>,
    reserved_end: u64,
    total: u64,
    free: u64,
}

fn page_range(base: PhysicalAddress, length: u64) -> PageRange {
    let start = align_up(base.as_u64(), PAGE_SIZE);
    let end = align_down(base.as_u64().saturating_add(length), PAGE_SIZE);
    PageRange {
        first: start / PAGE_SIZE,
        end: (end / PAGE_SIZE).max(start / PAGE_SIZE),
    }
}

impl<'a> FrameAllocator<'a> {
    /// Number of bitmap words needed for `map`.
    #[must_use]
    pub fn bitmap_words(map: &BootMemoryMap) -> usize {
        words_for(Self::page_limit(map))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn page_limit(map: &BootMemoryMap) -> usize {
        map.regions()
            .iter()
            .map(|r| page_range(r.base, r.length).end)
            .max()
            .unwrap_or(0) as usize
    }

    /// Builds the allocator over `map`, keeping the bitmap in `words`.
    ///
    /// Every page below `max(reserved_low_bytes, kernel.end)` is marked used.
    ///
    /// # Errors
    /// [`FrameAllocError::BitmapTooSmall`] if `words` is shorter than
    /// [`bitmap_words`](Self::bitmap_words).
    pub fn new(
        map: &BootMemoryMap,
        kernel: KernelImage,
        reserved_low_bytes: u64,
        words: &'a mut [u64],
    ) -> Result<Self, FrameAllocError> {
        let pages = Self::page_limit(map);
        let available = words.len();
        let mut bitmap = Bitmap::new(words, pages).ok_or(FrameAllocError::BitmapTooSmall {
            words: available,
            pages,
        })?;
        bitmap.fill(true);

        let reserved_end =
            align_up(reserved_low_bytes.max(kernel.end.as_u64()), PAGE_SIZE) / PAGE_SIZE;
        let mut regions = [PageRange::default(); MAX_MEMORY_REGIONS];
        let mut region_count = 0;
        let (mut total, mut free) = (0, 0);
        for region in map.regions() {
            let range = page_range(region.base, region.length);
            regions[region_count] = range;
            region_count += 1;
            total += range.end - range.first;
            for page in range.first.max(reserved_end)..range.end {
                #[allow(clippy::cast_possible_truncation)]
                bitmap.set(page as usize, false);
                free += 1;
            }
        }

        info!(
            "PMM ready: {total} usable pages, {free} free, first {reserved_end} pages reserved"
        );
        Ok(Self {
            regions,
            region_count,
            bitmap,
            reserved_end,
            total,
            free,
        })
    }

    /// Whether `page` lies in a reported memory region.
    #[must_use]
    pub fn is_page_valid(&self, page: PageIndex) -> bool {
        let p = page.as_u64();
        self.regions[..self.region_count]
            .iter()
            .any(|r| (r.first..r.end).contains(&p))
    }

    #[must_use]
    pub fn is_page_used(&self, page: PageIndex) -> PageUsage {
        if !self.is_page_valid(page) {
            PageUsage::Invalid
        } else if self.bitmap.get(page.as_usize()) {
            PageUsage::Used
        } else {
            PageUsage::Free
        }
    }

    /// Sets the state of exactly one valid page.
    ///
    /// # Errors
    /// [`FrameAllocError::InvalidPage`] for pages outside every region.
    pub fn set_page_used(&mut self, page: PageIndex, used: bool) -> Result<(), FrameAllocError> {
        match self.is_page_used(page) {
            PageUsage::Invalid => return Err(FrameAllocError::InvalidPage(page)),
            PageUsage::Used if !used => self.free += 1,
            PageUsage::Free if used => self.free -= 1,
            _ => {}
        }
        self.bitmap.set(page.as_usize(), used);
        Ok(())
    }

    /// Lowest free page, marked used.
    pub fn alloc_one(&mut self) -> Option<PageIndex> {
        let Some(i) = self.bitmap.first_clear_from(0) else {
            warn!("PMM exhausted");
            return None;
        };
        self.bitmap.set(i, true);
        self.free -= 1;
        let page = PageIndex::new(i as u64);
        trace!("page {page} allocated");
        Some(page)
    }

    /// Lowest run of `count` free pages, all marked used.
    ///
    /// After a collision the search resumes right after the used page, so a
    /// run is found whenever one exists.
    pub fn alloc_contiguous(&mut self, count: u64) -> Option<PageIndex> {
        #[allow(clippy::cast_possible_truncation)]
        let n = count as usize;
        if n == 0 || count > self.free {
            return None;
        }
        let mut start = self.bitmap.first_clear_from(0)?;
        loop {
            if start + n > self.bitmap.len() {
                warn!("no run of {count} free pages");
                return None;
            }
            match (start + 1..start + n).find(|&i| self.bitmap.get(i)) {
                None => break,
                Some(used) => start = self.bitmap.first_clear_from(used + 1)?,
            }
        }
        for i in start..start + n {
            self.bitmap.set(i, true);
        }
        self.free -= count;
        let page = PageIndex::new(start as u64);
        trace!("{count} pages allocated at {page}");
        Some(page)
    }

    fn check_freeable(&self, page: PageIndex) -> Result<(), FrameAllocError> {
        match self.is_page_used(page) {
            PageUsage::Invalid => Err(FrameAllocError::InvalidPage(page)),
            PageUsage::Free => Err(FrameAllocError::NotAllocated(page)),
            PageUsage::Used if page.as_u64() < self.reserved_end => {
                Err(FrameAllocError::Reserved(page))
            }
            PageUsage::Used => Ok(()),
        }
    }

    /// Returns one page.
    ///
    /// # Errors
    /// Invalid, reserved and already-free pages are refused.
    pub fn free_one(&mut self, page: PageIndex) -> Result<(), FrameAllocError> {
        self.check_freeable(page)?;
        self.bitmap.set(page.as_usize(), false);
        self.free += 1;
        trace!("page {page} freed");
        Ok(())
    }

    /// Returns `count` pages starting at `start`; nothing is freed if any page is refused.
    ///
    /// # Errors
    /// As [`free_one`](Self::free_one), for the first offending page.
    pub fn free_contiguous(&mut self, start: PageIndex, count: u64) -> Result<(), FrameAllocError> {
        for i in 0..count {
            self.check_freeable(start + i)?;
        }
        for i in 0..count {
            self.bitmap.set((start + i).as_usize(), false);
        }
        self.free += count;
        trace!("{count} pages freed at {start}");
        Ok(())
    }

    /// Pages currently free.
    #[must_use]
    pub const fn free_count(&self) -> u64 {
        self.free
    }

    /// Valid pages, free or used.
    #[must_use]
    pub const fn total_count(&self) -> u64 {
        self.total
    }

    /// First page above the reserved low region.
    #[must_use]
    pub const fn first_unreserved(&self) -> PageIndex {
        PageIndex::new(self.reserved_end)
    }
}
