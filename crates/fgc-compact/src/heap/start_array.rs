//! Object Start Array
//!
//! Records, per fixed-size block of heap words, the lowest object start that
//! lies in the block. Answers "which object contains this word" by walking
//! back to a block with a recorded start and then forward object by object.
//! Allocation records new objects; the compaction point re-records every
//! object at its destination.

use crate::heap::layout::HeapLayout;
use crate::LOG_WORD_SIZE;
use std::sync::atomic::{AtomicUsize, Ordering};

const NO_START: usize = usize::MAX;

/// Words per start-array block (as a power of two)
pub const START_BLOCK_SHIFT: u32 = 6;

pub struct StartArray {
    base: usize,
    block_shift_bytes: u32,
    entries: Vec<AtomicUsize>,
}

impl StartArray {
    pub fn new(layout: &HeapLayout) -> Self {
        let block_shift = START_BLOCK_SHIFT.min(layout.region_size_shift());
        let blocks = layout.heap_words() >> block_shift;
        Self {
            base: layout.base(),
            block_shift_bytes: block_shift + LOG_WORD_SIZE,
            entries: (0..blocks).map(|_| AtomicUsize::new(NO_START)).collect(),
        }
    }

    #[inline]
    fn block_of(&self, addr: usize) -> usize {
        (addr - self.base) >> self.block_shift_bytes
    }

    /// Record an object starting at `addr`
    #[inline]
    pub fn record(&self, addr: usize) {
        self.entries[self.block_of(addr)].fetch_min(addr, Ordering::Relaxed);
    }

    /// Forget every start in `[from, to)`
    ///
    /// `from` and `to` are expected to be block aligned (region boundaries).
    pub fn clear_range(&self, from: usize, to: usize) {
        if from >= to {
            return;
        }
        let first = self.block_of(from);
        let last = self.block_of(to - 1);
        for entry in &self.entries[first..=last] {
            entry.store(NO_START, Ordering::Relaxed);
        }
    }

    /// Lowest recorded start in the block containing `addr`
    pub fn start_in_block(&self, addr: usize) -> Option<usize> {
        match self.entries[self.block_of(addr)].load(Ordering::Relaxed) {
            NO_START => None,
            start => Some(start),
        }
    }

    /// Closest recorded object start at or before `addr`, not below `floor`
    ///
    /// The object containing `addr` starts at or after the returned address;
    /// callers walk forward by object size from here.
    pub fn block_start(&self, addr: usize, floor: usize) -> Option<usize> {
        let mut block = self.block_of(addr);
        let floor_block = self.block_of(floor);
        loop {
            let start = self.entries[block].load(Ordering::Relaxed);
            if start != NO_START && start <= addr {
                return Some(start);
            }
            if block == floor_block {
                return None;
            }
            // a recorded start above `addr` in this block means the object
            // containing `addr` began in an earlier block
            block -= 1;
        }
    }
}
