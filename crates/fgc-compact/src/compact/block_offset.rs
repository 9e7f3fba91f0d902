//! Block Offset Table - Forwarding Computed from the Bitmap
//!
//! Instead of storing a destination per object, store one per fixed-size
//! block of heap words and recover object destinations with a population
//! count over the live-word bitmap:
//!
//! ```text
//!           block b                        block b+1
//!  ... ─────┬──────────────────────────────┬──────────────
//!  words:   │██ tail ██│  ░░  │█ obj █│ ░░ │█████ ...
//!           ^blk_start ^first       ^addr
//!
//!  table[b]       = top_at_block - tail          (tail: words of an object
//!                                                 begun in an earlier block)
//!  forwardee(addr) = table[b] + live_words(blk_start, addr)
//! ```
//!
//! The table is built in one pass over the sources. All objects that start
//! in a block land contiguously in one destination space; when they do not
//! fit in the current space, the cursor spills into the next one first.
//!
//! Memory is one word per block instead of one per live object. Lookups are
//! pure, so the adjust phase can ask as often as it likes.

use crate::marker::LivenessBitmap;
use crate::util::{word_offset, words_between};
use crate::{LOG_WORD_SIZE, WORD_SIZE};

const NO_ENTRY: usize = usize::MAX;

/// CompactionSpace - one destination space and its fill cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionSpace {
    pub bottom: usize,
    pub end: usize,
    pub compaction_top: usize,
}

impl CompactionSpace {
    pub fn new(bottom: usize, end: usize) -> Self {
        Self {
            bottom,
            end,
            compaction_top: bottom,
        }
    }

    pub fn free_words(&self) -> usize {
        words_between(self.compaction_top, self.end)
    }

    pub fn used_words(&self) -> usize {
        words_between(self.bottom, self.compaction_top)
    }
}

/// BlockOffsetTable - destination of the first live word of every block
#[derive(Debug)]
pub struct BlockOffsetTable {
    base: usize,
    block_shift_bytes: u32,
    entries: Vec<usize>,
}

impl BlockOffsetTable {
    /// Table covering `words` words from `base` in blocks of `1 << block_size_shift` words
    pub fn new(base: usize, words: usize, block_size_shift: u32) -> Self {
        let block_words = 1usize << block_size_shift;
        Self {
            base,
            block_shift_bytes: block_size_shift + LOG_WORD_SIZE,
            entries: vec![NO_ENTRY; words.div_ceil(block_words)],
        }
    }

    #[inline]
    pub fn block_words(&self) -> usize {
        1 << (self.block_shift_bytes - LOG_WORD_SIZE)
    }

    #[inline]
    fn block_of(&self, addr: usize) -> usize {
        (addr - self.base) >> self.block_shift_bytes
    }

    #[inline]
    fn block_start(&self, block: usize) -> usize {
        self.base + (block << self.block_shift_bytes)
    }

    /// Raw entry of block `block`, `None` if no object starts in it
    pub fn entry(&self, block: usize) -> Option<usize> {
        match self.entries[block] {
            NO_ENTRY => None,
            entry => Some(entry),
        }
    }

    pub fn clear(&mut self) {
        self.entries.fill(NO_ENTRY);
    }

    /// Compute entries for the live objects of `sources` (each `[bottom, top)`)
    ///
    /// Sources are walked in order; `spaces` are filled in order and their
    /// `compaction_top` is left at the final fill level. Returns the index of
    /// the last space that received data.
    pub fn build(
        &mut self,
        bitmap: &LivenessBitmap,
        sources: &[(usize, usize)],
        spaces: &mut [CompactionSpace],
    ) -> usize {
        let mut space = 0;
        let block_words = self.block_words();

        for &(bottom, top) in sources {
            let mut blk_start = bottom;
            while blk_start < top {
                let blk_end = word_offset(blk_start, block_words).min(top);
                let block = self.block_of(blk_start);
                let first = bitmap.next_marked_address(blk_start, blk_end);
                if first >= blk_end {
                    self.entries[block] = NO_ENTRY;
                    blk_start = blk_end;
                    continue;
                }

                let tail = bitmap.count_marked_words(blk_start, first);
                let next = bitmap.next_marked_address(blk_end, top);
                let words = bitmap.count_marked_words(first, next);

                while words > spaces[space].free_words() {
                    crate::guarantee!(
                        space + 1 < spaces.len(),
                        "no compaction space left for {} words of block {}",
                        words,
                        block
                    );
                    space += 1;
                }

                let dest_top = spaces[space].compaction_top;
                self.entries[block] = dest_top.wrapping_sub(tail * WORD_SIZE);
                spaces[space].compaction_top = word_offset(dest_top, words);
                blk_start = blk_end;
            }
        }
        space
    }

    /// Destination of the live object starting at `addr`
    ///
    /// `addr` must be marked in the bitmap the table was built from.
    #[inline]
    pub fn forwardee(&self, bitmap: &LivenessBitmap, addr: usize) -> usize {
        let block = self.block_of(addr);
        debug_assert!(bitmap.is_marked(addr), "{:#x} is not a live object", addr);
        debug_assert_ne!(self.entries[block], NO_ENTRY, "block {} has no entry", block);
        let before = bitmap.count_marked_words(self.block_start(block), addr);
        self.entries[block].wrapping_add(before * WORD_SIZE)
    }
}
