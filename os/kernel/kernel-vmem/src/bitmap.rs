/// Number of `u64` words needed to track `bits` slots.
#[must_use]
pub const fn words_for(bits: usize) -> usize {
    bits.div_ceil(64)
}

/// One bit per slot over `u64` words; a set bit means "used".
///
/// Both the physical page allocator (over a caller-provided slice) and the
/// page-table node pool (over an inline array) keep their state in one of
/// these. The bitmap never allocates.
pub struct Bitmap<W> {
    words: W,
    bits: usize,
}

impl<W: AsRef<[u64]> + AsMut<[u64]>> Bitmap<W> {
    /// Wraps `words`, tracking the first `bits` slots. All slots start clear.
    ///
    /// Returns `None` if `words` is too short for `bits`.
    pub fn new(mut words: W, bits: usize) -> Option<Self> {
        if words.as_ref().len() < words_for(bits) {
            return None;
        }
        words.as_mut().fill(0);
        Some(Self { words, bits })
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.bits
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Whether slot `i` is set. Out-of-range slots read as set.
    #[inline]
    #[must_use]
    pub fn get(&self, i: usize) -> bool {
        if i >= self.bits {
            return true;
        }
        self.words.as_ref()[i / 64] & (1 << (i % 64)) != 0
    }

    /// Sets or clears slot `i`; out-of-range slots are ignored.
    #[inline]
    pub fn set(&mut self, i: usize, used: bool) {
        if i >= self.bits {
            return;
        }
        let mask = 1u64 << (i % 64);
        if used {
            self.words.as_mut()[i / 64] |= mask;
        } else {
            self.words.as_mut()[i / 64] &= !mask;
        }
    }

    /// Sets or clears every slot.
    pub fn fill(&mut self, used: bool) {
        self.words.as_mut().fill(if used { u64::MAX } else { 0 });
    }

    /// Lowest clear slot at or after `from`.
    #[must_use]
    pub fn first_clear_from(&self, from: usize) -> Option<usize> {
        let mut i = from;
        while i < self.bits {
            let word = self.words.as_ref()[i / 64];
            if word == u64::MAX && i % 64 == 0 {
                i += 64;
                continue;
            }
            if word & (1 << (i % 64)) == 0 {
                return Some(i);
            }
            i += 1;
        }
        None
    }

    /// Number of set slots.
    #[must_use]
    pub fn count_set(&self) -> usize {
        let words = self.words.as_ref();
        let full = self.bits / 64;
        let mut n: usize = words[..full]
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum();
        let rest = self.bits % 64;
        if rest != 0 {
            n += (words[full] & ((1u64 << rest) - 1)).count_ones() as usize;
        }
        n
    }
}
