//! Shadow Regions
//!
//! A worker whose destination region still holds live data that has not
//! left yet does not wait for it. It assembles the final image of its
//! objects (headers already rewritten) in a private buffer and hands the
//! buffer to the destination region. Whoever marks that region ready
//! flushes the pending buffers into place.

use crate::heap::HeapMemory;

/// ShadowRegion - final contents of a destination range, built off-heap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowRegion {
    dest_region: usize,
    dest_start: usize,
    words: Vec<usize>,
}

impl ShadowRegion {
    pub fn new(dest_region: usize, dest_start: usize, words: Vec<usize>) -> Self {
        Self {
            dest_region,
            dest_start,
            words,
        }
    }

    pub fn dest_region(&self) -> usize {
        self.dest_region
    }

    pub fn dest_start(&self) -> usize {
        self.dest_start
    }

    pub fn len_words(&self) -> usize {
        self.words.len()
    }

    /// Copy the buffer to its destination
    pub fn flush(self, memory: &HeapMemory) {
        memory.write_words(self.dest_start, &self.words);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_writes_buffer() {
        let memory = HeapMemory::reserve(4096).unwrap();
        let dest = memory.base() + 64;
        let shadow = ShadowRegion::new(0, dest, vec![7, 8, 9]);
        assert_eq!(shadow.len_words(), 3);
        shadow.flush(&memory);
        assert_eq!(memory.load(dest), 7);
        assert_eq!(memory.load(dest + 16), 9);
    }
}
