//! First-fit free-list heap with split and coalesce.

use crate::heap_memory::HeapMemory;
use kernel_memory_addresses::{VirtualAddress, align_down};
use log::{error, trace, warn};

/// Machine word; every chunk and every size is a multiple of it.
pub const WORD: u64 = 8;

/// Bytes of the chunk header: `size`, `prev`, `next`.
pub const HEADER_SIZE: u64 = 3 * WORD;

/// Smallest data region a chunk may have.
pub const MIN_CHUNK: u64 = 16;

/// A free chunk is only split when more than this many bytes would be left over.
pub const SPLIT_SLACK: u64 = 32;

const NIL: u64 = 0;

/// Stored in `prev` of a chunk that is handed out.
const ALLOCATED: u64 = 0xA11C_0C8E_D0DE_CAFE;

const SIZE: u64 = 0;
const PREV: u64 = WORD;
const NEXT: u64 = 2 * WORD;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("no free chunk can hold {requested} bytes")]
    OutOfMemory { requested: u64 },
    #[error("{0} was not returned by this heap")]
    InvalidPointer(VirtualAddress),
    #[error("{0} is already free")]
    DoubleFree(VirtualAddress),
    #[error("heap region of {bytes} bytes cannot hold a single chunk")]
    RegionTooSmall { bytes: u64 },
    #[error("heap region start {0} is not word aligned")]
    Unaligned(VirtualAddress),
    #[error("free list corrupt at chunk {0}")]
    Corrupt(VirtualAddress),
}

/// Snapshot of the heap's bookkeeping.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes of the managed region, headers included.
    pub capacity: u64,
    /// Data bytes of all free chunks.
    pub free_bytes: u64,
    pub free_chunks: usize,
    pub largest_free: u64,
    /// Data bytes of all handed-out chunks.
    pub allocated_bytes: u64,
    pub allocations: usize,
}

impl HeapStats {
    /// Bytes accounted for by chunks and their headers; equals `capacity`
    /// while the heap is consistent.
    #[must_use]
    pub const fn accounted(&self) -> u64 {
        self.free_bytes
            + self.allocated_bytes
            + (self.free_chunks + self.allocations) as u64 * HEADER_SIZE
    }
}

/// General-purpose heap over one contiguous virtual range.
///
/// ```text
///  chunk                    chunk + HEADER_SIZE
///  ┌──────┬──────┬──────┬───────────────────────┐
///  │ size │ prev │ next │ data (size bytes)      │
///  └──────┴──────┴──────┴───────────────────────┘
/// ```
///
/// Free chunks form a doubly linked list in address order, so a returned
/// chunk finds its neighbours during the insertion walk and merges with any
/// that touch it. A handed-out chunk carries a marker instead of list links,
/// which lets [`free`](Self::free) reject pointers it never returned.
pub struct FreeListHeap<M> {
    mem: M,
    start: u64,
    end: u64,
    head: u64,
    allocated_bytes: u64,
    allocations: usize,
}

impl<M: HeapMemory> FreeListHeap<M> {
    /// Seeds the heap with one free chunk spanning `[start, start + bytes)`.
    ///
    /// # Errors
    /// [`HeapError::Unaligned`] or [`HeapError::RegionTooSmall`].
    pub fn new(mem: M, start: VirtualAddress, bytes: u64) -> Result<Self, HeapError> {
        if start.as_u64() % WORD != 0 {
            return Err(HeapError::Unaligned(start));
        }
        let bytes = align_down(bytes, WORD);
        if bytes < HEADER_SIZE + MIN_CHUNK {
            return Err(HeapError::RegionTooSmall { bytes });
        }
        let mut heap = Self {
            mem,
            start: start.as_u64(),
            end: start.as_u64() + bytes,
            head: NIL,
            allocated_bytes: 0,
            allocations: 0,
        };
        let wilderness = heap.start;
        heap.write_header(wilderness, bytes - HEADER_SIZE, NIL, NIL);
        heap.head = wilderness;
        trace!("heap seeded: {bytes} bytes at {start}");
        Ok(heap)
    }

    #[inline]
    fn read(&self, chunk: u64, field: u64) -> u64 {
        self.mem.read_word(VirtualAddress::new(chunk + field))
    }

    #[inline]
    fn write(&mut self, chunk: u64, field: u64, value: u64) {
        self.mem.write_word(VirtualAddress::new(chunk + field), value);
    }

    fn write_header(&mut self, chunk: u64, size: u64, prev: u64, next: u64) {
        self.write(chunk, SIZE, size);
        self.write(chunk, PREV, prev);
        self.write(chunk, NEXT, next);
    }

    fn mark_allocated(&mut self, chunk: u64) {
        self.write(chunk, PREV, ALLOCATED);
        self.write(chunk, NEXT, chunk ^ ALLOCATED);
    }

    /// Wipes the links of a header that was merged into a neighbour.
    fn scrub(&mut self, chunk: u64) {
        self.write(chunk, PREV, NIL);
        self.write(chunk, NEXT, NIL);
    }

    fn set_next(&mut self, chunk: u64, next: u64) {
        if chunk == NIL {
            self.head = next;
        } else {
            self.write(chunk, NEXT, next);
        }
    }

    fn set_prev(&mut self, chunk: u64, prev: u64) {
        if chunk != NIL {
            self.write(chunk, PREV, prev);
        }
    }

    fn chunk_end(&self, chunk: u64) -> u64 {
        chunk + HEADER_SIZE + self.read(chunk, SIZE)
    }

    /// Hands out at least `size` bytes, word aligned.
    ///
    /// The request is rounded up to a word and to [`MIN_CHUNK`]. The first
    /// free chunk that fits is used; it is split when the remainder exceeds
    /// [`SPLIT_SLACK`] and can hold a chunk of its own.
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`]; the free list is left unchanged.
    pub fn alloc(&mut self, size: u64) -> Result<VirtualAddress, HeapError> {
        let oom = HeapError::OutOfMemory { requested: size };
        let need = size
            .checked_next_multiple_of(WORD)
            .ok_or(oom)?
            .max(MIN_CHUNK);

        let mut chunk = self.head;
        while chunk != NIL && self.read(chunk, SIZE) < need {
            chunk = self.read(chunk, NEXT);
        }
        if chunk == NIL {
            warn!("heap: no chunk for {size} bytes");
            return Err(oom);
        }

        let size_here = self.read(chunk, SIZE);
        let prev = self.read(chunk, PREV);
        let next = self.read(chunk, NEXT);
        let surplus = size_here - need;
        let handed_out = if surplus > SPLIT_SLACK && surplus >= HEADER_SIZE + MIN_CHUNK {
            let rest = chunk + HEADER_SIZE + need;
            self.write_header(rest, surplus - HEADER_SIZE, prev, next);
            self.set_next(prev, rest);
            self.set_prev(next, rest);
            self.write(chunk, SIZE, need);
            need
        } else {
            self.set_next(prev, next);
            self.set_prev(next, prev);
            size_here
        };
        self.mark_allocated(chunk);
        self.allocated_bytes += handed_out;
        self.allocations += 1;

        let data = VirtualAddress::new(chunk + HEADER_SIZE);
        trace!("heap: {size} bytes at {data} (chunk of {handed_out})");
        Ok(data)
    }

    /// Chunk address of a pointer this heap handed out and still considers allocated.
    fn allocated_chunk(&self, ptr: VirtualAddress) -> Result<u64, HeapError> {
        let p = ptr.as_u64();
        if p % WORD != 0 || p < self.start + HEADER_SIZE || p >= self.end {
            return Err(HeapError::InvalidPointer(ptr));
        }
        let chunk = p - HEADER_SIZE;
        if self.read(chunk, PREV) == ALLOCATED
            && self.read(chunk, NEXT) == chunk ^ ALLOCATED
            && self.chunk_end(chunk) <= self.end
        {
            return Ok(chunk);
        }
        if self.free_chunk_containing(p).is_some() {
            Err(HeapError::DoubleFree(ptr))
        } else {
            Err(HeapError::InvalidPointer(ptr))
        }
    }

    fn free_chunk_containing(&self, addr: u64) -> Option<u64> {
        let mut chunk = self.head;
        while chunk != NIL && chunk <= addr {
            if addr < self.chunk_end(chunk) {
                return Some(chunk);
            }
            chunk = self.read(chunk, NEXT);
        }
        None
    }

    /// Returns a chunk to the free list, merging it with touching free neighbours.
    ///
    /// # Errors
    /// [`HeapError::InvalidPointer`] for pointers this heap did not hand out,
    /// [`HeapError::DoubleFree`] for pointers into already free memory.
    pub fn free(&mut self, ptr: VirtualAddress) -> Result<(), HeapError> {
        let chunk = match self.allocated_chunk(ptr) {
            Ok(chunk) => chunk,
            Err(e) => {
                error!("heap: rejected free of {ptr}: {e}");
                return Err(e);
            }
        };
        let size = self.read(chunk, SIZE);

        let mut prev = NIL;
        let mut next = self.head;
        while next != NIL && next < chunk {
            prev = next;
            next = self.read(next, NEXT);
        }

        let merged = if prev != NIL && self.chunk_end(prev) == chunk {
            let grown = self.read(prev, SIZE) + HEADER_SIZE + size;
            self.write(prev, SIZE, grown);
            self.scrub(chunk);
            prev
        } else {
            self.write_header(chunk, size, prev, next);
            self.set_next(prev, chunk);
            self.set_prev(next, chunk);
            chunk
        };

        if next != NIL && self.chunk_end(merged) == next {
            let grown = self.read(merged, SIZE) + HEADER_SIZE + self.read(next, SIZE);
            let after = self.read(next, NEXT);
            self.write(merged, SIZE, grown);
            self.write(merged, NEXT, after);
            self.set_prev(after, merged);
            self.scrub(next);
        }

        self.allocated_bytes -= size;
        self.allocations -= 1;
        trace!("heap: freed {ptr} ({size} bytes)");
        Ok(())
    }

    /// Adds `[end, end + bytes)` to the heap after the caller made it accessible.
    ///
    /// The new memory merges into the last free chunk when that chunk reaches
    /// the old end; otherwise it becomes a new chunk at the tail of the list.
    ///
    /// # Errors
    /// [`HeapError::RegionTooSmall`] if `bytes` cannot form a chunk of its own
    /// and there is nothing to merge it into.
    pub fn extend(&mut self, bytes: u64) -> Result<(), HeapError> {
        let bytes = align_down(bytes, WORD);
        let old_end = self.end;

        let mut last = NIL;
        let mut chunk = self.head;
        while chunk != NIL {
            last = chunk;
            chunk = self.read(chunk, NEXT);
        }

        if last != NIL && self.chunk_end(last) == old_end {
            let grown = self.read(last, SIZE) + bytes;
            self.write(last, SIZE, grown);
        } else {
            if bytes < HEADER_SIZE + MIN_CHUNK {
                return Err(HeapError::RegionTooSmall { bytes });
            }
            self.write_header(old_end, bytes - HEADER_SIZE, last, NIL);
            self.set_next(last, old_end);
        }
        self.end = old_end + bytes;
        trace!("heap: extended by {bytes} bytes to {}", VirtualAddress::new(self.end));
        Ok(())
    }

    /// Free chunks in address order as `(chunk address, data size)`.
    pub fn free_chunks(&self) -> FreeChunks<'_, M> {
        FreeChunks {
            heap: self,
            next: self.head,
        }
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            capacity: self.end - self.start,
            allocated_bytes: self.allocated_bytes,
            allocations: self.allocations,
            ..HeapStats::default()
        };
        for (_, size) in self.free_chunks() {
            stats.free_bytes += size;
            stats.free_chunks += 1;
            stats.largest_free = stats.largest_free.max(size);
        }
        stats
    }

    /// Walks the free list and checks ordering, bounds, back links and that
    /// no two free chunks touch.
    ///
    /// # Errors
    /// [`HeapError::Corrupt`] naming the first offending chunk.
    pub fn verify(&self) -> Result<(), HeapError> {
        let mut prev = NIL;
        let mut chunk = self.head;
        while chunk != NIL {
            let corrupt = HeapError::Corrupt(VirtualAddress::new(chunk));
            let in_bounds = chunk >= self.start && self.chunk_end(chunk) <= self.end;
            let ordered = prev == NIL || self.chunk_end(prev) < chunk;
            if !in_bounds || !ordered || self.read(chunk, PREV) != prev {
                error!("heap: {corrupt}");
                return Err(corrupt);
            }
            prev = chunk;
            chunk = self.read(chunk, NEXT);
        }
        Ok(())
    }

    /// Start of the managed region.
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        VirtualAddress::new(self.start)
    }

    /// One past the last managed byte.
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        VirtualAddress::new(self.end)
    }

    /// Whether `addr` lies inside the managed region.
    #[must_use]
    pub const fn contains(&self, addr: VirtualAddress) -> bool {
        addr.as_u64() >= self.start && addr.as_u64() < self.end
    }

    /// Backing memory, for inspection.
    #[must_use]
    pub const fn memory(&self) -> &M {
        &self.mem
    }
}

/// Iterator returned by [`FreeListHeap::free_chunks`].
pub struct FreeChunks<'h, M> {
    heap: &'h FreeListHeap<M>,
    next: u64,
}

impl<M: HeapMemory> Iterator for FreeChunks<'_, M> {
    type Item = (VirtualAddress, u64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NIL {
            return None;
        }
        let chunk = self.next;
        self.next = self.heap.read(chunk, NEXT);
        Some((VirtualAddress::new(chunk), self.heap.read(chunk, SIZE)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap_memory::SimulatedMemory;

    const BASE: u64 = 0xFFFF_FF80_4000_0000;

    fn heap(bytes: u64) -> FreeListHeap<SimulatedMemory> {
        FreeListHeap::new(SimulatedMemory::new(), VirtualAddress::new(BASE), bytes).unwrap()
    }

    fn chunks(h: &FreeListHeap<SimulatedMemory>) -> Vec<(u64, u64)> {
        h.free_chunks().map(|(a, s)| (a.as_u64() - BASE, s)).collect()
    }

    #[test]
    fn seeded_with_one_wilderness_chunk() {
        let h = heap(4096);
        assert_eq!(chunks(&h), vec![(0, 4096 - HEADER_SIZE)]);
        assert_eq!(h.stats().accounted(), 4096);
    }

    #[test]
    fn alloc_free_alloc_restores_wilderness() {
        let mut h = heap(4096);
        let p = h.alloc(64).unwrap();
        assert_eq!(p.as_u64(), BASE + HEADER_SIZE);
        assert_eq!(h.stats().accounted(), 4096);
        h.free(p).unwrap();
        assert_eq!(chunks(&h), vec![(0, 4096 - HEADER_SIZE)]);

        let q = h.alloc(64).unwrap();
        assert_eq!(q, p);
        let stats = h.stats();
        assert_eq!(stats.free_chunks, 1);
        assert_eq!(stats.accounted(), stats.capacity);
        h.verify().unwrap();
    }

    #[test]
    fn split_then_coalesce_in_either_order() {
        for first_a in [true, false] {
            let mut h = heap(4096);
            let a = h.alloc(100).unwrap();
            let b = h.alloc(100).unwrap();
            // 100 rounds up to 104
            assert_eq!(b.as_u64() - a.as_u64(), HEADER_SIZE + 104);
            let (x, y) = if first_a { (a, b) } else { (b, a) };
            h.free(x).unwrap();
            h.verify().unwrap();
            h.free(y).unwrap();
            h.verify().unwrap();
            assert_eq!(chunks(&h), vec![(0, 4096 - HEADER_SIZE)]);
        }
    }

    #[test]
    fn middle_free_merges_both_neighbours() {
        let mut h = heap(4096);
        let a = h.alloc(32).unwrap();
        let b = h.alloc(32).unwrap();
        let c = h.alloc(32).unwrap();
        let _guard = h.alloc(32).unwrap();
        h.free(a).unwrap();
        h.free(c).unwrap();
        assert_eq!(h.stats().free_chunks, 3);
        h.free(b).unwrap();
        let list = chunks(&h);
        assert_eq!(list[0], (0, 3 * 32 + 2 * HEADER_SIZE));
        assert_eq!(list.len(), 2);
        h.verify().unwrap();
    }

    #[test]
    fn small_surplus_is_handed_out_whole() {
        // wilderness of 64 data bytes; 40 requested leaves 24 < slack
        let mut h = heap(64 + HEADER_SIZE);
        let p = h.alloc(40).unwrap();
        assert_eq!(h.stats().allocated_bytes, 64);
        assert_eq!(h.free_chunks().count(), 0);
        h.free(p).unwrap();
        assert_eq!(chunks(&h), vec![(0, 64)]);
    }

    #[test]
    fn tiny_requests_get_the_minimum_chunk() {
        let mut h = heap(4096);
        let a = h.alloc(1).unwrap();
        let b = h.alloc(0).unwrap();
        assert_eq!(b.as_u64() - a.as_u64(), HEADER_SIZE + MIN_CHUNK);
    }

    #[test]
    fn oversized_request_fails_without_damage() {
        let mut h = heap(4096);
        let before = chunks(&h);
        assert_eq!(
            h.alloc(1 << 20),
            Err(HeapError::OutOfMemory { requested: 1 << 20 })
        );
        assert_eq!(h.alloc(u64::MAX), Err(HeapError::OutOfMemory { requested: u64::MAX }));
        assert_eq!(chunks(&h), before);
        assert!(h.alloc(100).is_ok());
    }

    #[test]
    fn bad_and_double_frees_are_detected() {
        let mut h = heap(4096);
        let a = h.alloc(64).unwrap();
        let b = h.alloc(64).unwrap();

        assert_eq!(h.free(a + 8), Err(HeapError::InvalidPointer(a + 8)));
        assert_eq!(
            h.free(VirtualAddress::new(0x1000)),
            Err(HeapError::InvalidPointer(VirtualAddress::new(0x1000)))
        );
        h.free(a).unwrap();
        assert_eq!(h.free(a), Err(HeapError::DoubleFree(a)));
        h.free(b).unwrap();
        // b was merged into a's chunk
        assert_eq!(h.free(b), Err(HeapError::DoubleFree(b)));
        assert_eq!(h.stats().allocations, 0);
        h.verify().unwrap();
    }

    #[test]
    fn extend_grows_tail_chunk_or_appends() {
        let mut h = heap(4096);
        h.extend(4096).unwrap();
        assert_eq!(chunks(&h), vec![(0, 8192 - HEADER_SIZE)]);

        let all = h.alloc(8192 - HEADER_SIZE).unwrap();
        h.extend(4096).unwrap();
        assert_eq!(chunks(&h), vec![(8192, 4096 - HEADER_SIZE)]);
        h.free(all).unwrap();
        assert_eq!(chunks(&h), vec![(0, 3 * 4096 - HEADER_SIZE)]);
        assert_eq!(h.end().as_u64(), BASE + 3 * 4096);
    }

    #[test]
    fn region_checks() {
        assert_eq!(
            FreeListHeap::new(SimulatedMemory::new(), VirtualAddress::new(BASE + 4), 4096).err(),
            Some(HeapError::Unaligned(VirtualAddress::new(BASE + 4)))
        );
        assert_eq!(
            FreeListHeap::new(SimulatedMemory::new(), VirtualAddress::new(BASE), 32).err(),
            Some(HeapError::RegionTooSmall { bytes: 32 })
        );
    }

    #[test]
    fn verify_catches_broken_back_link() {
        let mut h = heap(4096);
        let a = h.alloc(64).unwrap();
        let _b = h.alloc(64).unwrap();
        h.free(a).unwrap();
        // second free chunk (the tail remainder) gets a bogus prev link
        let tail = h.free_chunks().nth(1).unwrap().0;
        h.mem.write_word(tail + PREV, 0xdead);
        assert_eq!(h.verify(), Err(HeapError::Corrupt(tail)));
    }
}
