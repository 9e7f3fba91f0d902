//! Liveness Bitmap - Marking Results
//!
//! One bit per heap word, in two planes:
//!
//! ```text
//! words:   ..1111..111111....11..   every word of every live object
//! starts:  ..1.....1.........1...   first word of every live object
//! ```
//!
//! `starts` answers "is this object live" and "where is the next live
//! object"; `words` answers "how many live words lie between two addresses"
//! with a population count, which is what the block-offset table and the
//! plan phase need.

use crate::heap::HeapLayout;
use crate::LOG_WORD_SIZE;
use std::sync::atomic::{AtomicU64, Ordering};

const BITS: usize = 64;

/// LivenessBitmap - marked object starts and live words
pub struct LivenessBitmap {
    /// Address covered by bit 0
    base: usize,

    /// Number of words covered
    words_covered: usize,

    starts: Vec<AtomicU64>,
    words: Vec<AtomicU64>,
}

impl LivenessBitmap {
    /// Create a bitmap covering `words` words from `base`
    ///
    /// No memory at `base` is touched, so synthetic address ranges work.
    pub fn new(base: usize, words: usize) -> Self {
        let chunks = (words + BITS - 1) / BITS;
        Self {
            base,
            words_covered: words,
            starts: (0..chunks).map(|_| AtomicU64::new(0)).collect(),
            words: (0..chunks).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Bitmap covering a whole heap layout
    pub fn for_layout(layout: &HeapLayout) -> Self {
        Self::new(layout.base(), layout.heap_words())
    }

    pub fn base(&self) -> usize {
        self.base
    }

    /// End address (exclusive) of the covered range
    pub fn end(&self) -> usize {
        self.base + (self.words_covered << LOG_WORD_SIZE)
    }

    #[inline]
    fn bit_of(&self, addr: usize) -> usize {
        debug_assert!(
            addr >= self.base && addr <= self.end(),
            "address {:#x} outside bitmap",
            addr
        );
        (addr - self.base) >> LOG_WORD_SIZE
    }

    #[inline]
    fn addr_of(&self, bit: usize) -> usize {
        self.base + (bit << LOG_WORD_SIZE)
    }

    /// Mark the object at `addr` spanning `size` words
    ///
    /// Returns true if this call marked it, false if it was already marked.
    pub fn mark_object(&self, addr: usize, size: usize) -> bool {
        let bit = self.bit_of(addr);
        let mask = 1u64 << (bit % BITS);
        let previous = self.starts[bit / BITS].fetch_or(mask, Ordering::AcqRel);
        if previous & mask != 0 {
            return false;
        }
        for_each_chunk(bit, bit + size, |chunk, mask| {
            self.words[chunk].fetch_or(mask, Ordering::Relaxed);
        });
        true
    }

    /// Is there a live object starting at `addr`
    #[inline]
    pub fn is_marked(&self, addr: usize) -> bool {
        let bit = self.bit_of(addr);
        self.starts[bit / BITS].load(Ordering::Acquire) & (1u64 << (bit % BITS)) != 0
    }

    /// Is the word at `addr` part of a live object
    #[inline]
    pub fn is_live_word(&self, addr: usize) -> bool {
        let bit = self.bit_of(addr);
        self.words[bit / BITS].load(Ordering::Relaxed) & (1u64 << (bit % BITS)) != 0
    }

    /// First live object start in `[from, limit)`, or `limit` if none
    pub fn next_marked_address(&self, from: usize, limit: usize) -> usize {
        let end = self.bit_of(limit);
        let mut bit = self.bit_of(from);
        while bit < end {
            let chunk = bit / BITS;
            let pending = self.starts[chunk].load(Ordering::Acquire) >> (bit % BITS);
            if pending != 0 {
                let found = bit + pending.trailing_zeros() as usize;
                return if found < end {
                    self.addr_of(found)
                } else {
                    limit
                };
            }
            bit = (chunk + 1) * BITS;
        }
        limit
    }

    /// Live words in `[from, to)`
    pub fn count_marked_words(&self, from: usize, to: usize) -> usize {
        if to <= from {
            return 0;
        }
        let mut count = 0;
        for_each_chunk(self.bit_of(from), self.bit_of(to), |chunk, mask| {
            count += (self.words[chunk].load(Ordering::Relaxed) & mask).count_ones() as usize;
        });
        count
    }

    /// Live object starts in `[from, to)`
    pub fn count_marked_objects(&self, from: usize, to: usize) -> usize {
        if to <= from {
            return 0;
        }
        let mut count = 0;
        for_each_chunk(self.bit_of(from), self.bit_of(to), |chunk, mask| {
            count += (self.starts[chunk].load(Ordering::Relaxed) & mask).count_ones() as usize;
        });
        count
    }

    /// Unmark everything in `[from, to)`
    pub fn clear_range(&self, from: usize, to: usize) {
        if to <= from {
            return;
        }
        for_each_chunk(self.bit_of(from), self.bit_of(to), |chunk, mask| {
            self.starts[chunk].fetch_and(!mask, Ordering::Relaxed);
            self.words[chunk].fetch_and(!mask, Ordering::Relaxed);
        });
    }

    pub fn clear(&self) {
        for chunk in self.starts.iter().chain(self.words.iter()) {
            chunk.store(0, Ordering::Relaxed);
        }
    }

    /// Total marked objects
    pub fn marked_objects(&self) -> usize {
        self.starts
            .iter()
            .map(|c| c.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    /// Total live words
    pub fn marked_words(&self) -> usize {
        self.words
            .iter()
            .map(|c| c.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    /// Iterate live object starts in `[from, to)` in address order
    pub fn marked_in(&self, from: usize, to: usize) -> MarkedObjects<'_> {
        MarkedObjects {
            bitmap: self,
            cursor: from,
            limit: to,
        }
    }
}

/// Call `f(chunk, mask)` for every 64-bit chunk overlapping bits `[from, to)`
#[inline]
fn for_each_chunk(mut from: usize, to: usize, mut f: impl FnMut(usize, u64)) {
    while from < to {
        let chunk = from / BITS;
        let offset = from % BITS;
        let stop = ((chunk + 1) * BITS).min(to);
        let len = stop - from;
        let mask = if len == BITS {
            !0u64
        } else {
            ((1u64 << len) - 1) << offset
        };
        f(chunk, mask);
        from = stop;
    }
}

/// Iterator over marked object starts
pub struct MarkedObjects<'a> {
    bitmap: &'a LivenessBitmap,
    cursor: usize,
    limit: usize,
}

impl Iterator for MarkedObjects<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.cursor >= self.limit {
            return None;
        }
        let found = self.bitmap.next_marked_address(self.cursor, self.limit);
        if found >= self.limit {
            self.cursor = self.limit;
            return None;
        }
        self.cursor = found + (1 << LOG_WORD_SIZE);
        Some(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: usize = 0x4000_0000;

    fn w(words: usize) -> usize {
        BASE + words * 8
    }

    #[test]
    fn test_mark_object_sets_both_planes() {
        let bitmap = LivenessBitmap::new(BASE, 256);
        assert!(bitmap.mark_object(w(10), 3));
        assert!(!bitmap.mark_object(w(10), 3));

        assert!(bitmap.is_marked(w(10)));
        assert!(!bitmap.is_marked(w(11)));
        assert!(bitmap.is_live_word(w(12)));
        assert!(!bitmap.is_live_word(w(13)));
        assert_eq!(bitmap.marked_objects(), 1);
        assert_eq!(bitmap.marked_words(), 3);
    }

    #[test]
    fn test_next_marked_address_across_chunks() {
        let bitmap = LivenessBitmap::new(BASE, 256);
        bitmap.mark_object(w(5), 2);
        bitmap.mark_object(w(130), 4);

        assert_eq!(bitmap.next_marked_address(w(0), w(256)), w(5));
        assert_eq!(bitmap.next_marked_address(w(6), w(256)), w(130));
        assert_eq!(bitmap.next_marked_address(w(6), w(130)), w(130));
        assert_eq!(bitmap.next_marked_address(w(131), w(200)), w(200));
    }

    #[test]
    fn test_count_marked_words_spanning_chunks() {
        let bitmap = LivenessBitmap::new(BASE, 256);
        // 70 words starting at word 60 crosses two chunk boundaries
        bitmap.mark_object(w(60), 70);
        assert_eq!(bitmap.count_marked_words(w(0), w(256)), 70);
        assert_eq!(bitmap.count_marked_words(w(64), w(128)), 64);
        assert_eq!(bitmap.count_marked_words(w(62), w(66)), 4);
        assert_eq!(bitmap.count_marked_words(w(129), w(140)), 1);
        assert_eq!(bitmap.count_marked_words(w(100), w(100)), 0);
    }

    #[test]
    fn test_marked_in_iterates_in_order() {
        let bitmap = LivenessBitmap::new(BASE, 128);
        for start in [3, 9, 64, 100] {
            bitmap.mark_object(w(start), 1);
        }
        let found: Vec<_> = bitmap.marked_in(w(4), w(128)).collect();
        assert_eq!(found, vec![w(9), w(64), w(100)]);
        assert_eq!(bitmap.count_marked_objects(w(0), w(64)), 2);
    }

    #[test]
    fn test_clear_range() {
        let bitmap = LivenessBitmap::new(BASE, 128);
        bitmap.mark_object(w(1), 2);
        bitmap.mark_object(w(70), 2);
        bitmap.clear_range(w(64), w(128));
        assert!(bitmap.is_marked(w(1)));
        assert!(!bitmap.is_marked(w(70)));
        assert_eq!(bitmap.marked_words(), 2);

        bitmap.clear();
        assert_eq!(bitmap.marked_objects(), 0);
    }
}
