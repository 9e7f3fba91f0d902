//! Heap Layout - Region Addressing Math
//!
//! Every address in the heap maps to a region index with a subtraction and a
//! shift. Forwarding encodings that work per region (sliding, dense tables)
//! are constructed from a `HeapLayout` and never touch the heap itself.

use crate::LOG_WORD_SIZE;

/// Immutable description of the region grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapLayout {
    base: usize,
    region_size_shift: u32,
    num_regions: usize,
}

impl HeapLayout {
    /// Create a layout
    ///
    /// # Arguments
    /// * `base` - Address of the first word of region 0
    /// * `region_size_shift` - Region size as a power of two, in words
    /// * `num_regions` - Number of regions
    pub fn new(base: usize, region_size_shift: u32, num_regions: usize) -> Self {
        Self {
            base,
            region_size_shift,
            num_regions,
        }
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    /// End address (exclusive) of the last region
    #[inline]
    pub fn end(&self) -> usize {
        self.base + (self.num_regions << self.region_shift_bytes())
    }

    #[inline]
    pub fn num_regions(&self) -> usize {
        self.num_regions
    }

    /// Region size as a power of two, in words
    #[inline]
    pub fn region_size_shift(&self) -> u32 {
        self.region_size_shift
    }

    /// Region size as a power of two, in bytes
    #[inline]
    pub fn region_shift_bytes(&self) -> u32 {
        self.region_size_shift + LOG_WORD_SIZE
    }

    #[inline]
    pub fn region_words(&self) -> usize {
        1usize << self.region_size_shift
    }

    #[inline]
    pub fn region_bytes(&self) -> usize {
        1usize << self.region_shift_bytes()
    }

    /// Total heap size in words
    #[inline]
    pub fn heap_words(&self) -> usize {
        self.num_regions << self.region_size_shift
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// `(address - heap_base) >> region_shift`
    #[inline]
    pub fn region_index_of(&self, addr: usize) -> usize {
        debug_assert!(self.contains(addr), "address {:#x} outside heap", addr);
        (addr - self.base) >> self.region_shift_bytes()
    }

    #[inline]
    pub fn region_bottom(&self, index: usize) -> usize {
        self.base + (index << self.region_shift_bytes())
    }

    #[inline]
    pub fn region_end(&self, index: usize) -> usize {
        self.region_bottom(index + 1)
    }

    /// Base address of the region containing `addr`
    #[inline]
    pub fn region_base_of(&self, addr: usize) -> usize {
        self.region_bottom(self.region_index_of(addr))
    }

    /// Number of regions needed to hold `words` words
    #[inline]
    pub fn regions_for(&self, words: usize) -> usize {
        (words + self.region_words() - 1) >> self.region_size_shift
    }
}
