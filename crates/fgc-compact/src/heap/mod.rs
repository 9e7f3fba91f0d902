//! Heap Module - Region-Based Managed Heap
//!
//! The heap is a single mapping split into equally sized regions. It is the
//! allocator/layout collaborator of the compaction core: it supplies region
//! boundaries, `region_index_of`, and simple bump allocation so that objects
//! can be created in known places.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ HeapMemory (anonymous mmap, word addressed)                │
//! ├────────────┬────────────┬────────────┬────────────┬────────┤
//! │ Regular    │ Free       │ Humongous  │ Humongous  │ ...    │
//! │ bottom..top│            │ Start      │ Continues  │        │
//! └────────────┴────────────┴────────────┴────────────┴────────┘
//!   StartArray: lowest object start per 64-word block
//! ```

pub mod layout;
pub mod memory;
pub mod region;
pub mod start_array;

pub use layout::HeapLayout;
pub use memory::HeapMemory;
pub use region::{HeapRegion, RegionKind};
pub use start_array::StartArray;

use crate::config::CompactConfig;
use crate::error::{CompactError, Result};
use crate::object::ObjectModel;
use crate::util::word_offset;
use crate::LOG_WORD_SIZE;
use parking_lot::Mutex;

/// Heap - regions over one mapping
pub struct Heap {
    memory: HeapMemory,
    layout: HeapLayout,
    regions: Vec<HeapRegion>,
    start_array: StartArray,
    compact_headers: bool,

    /// Serializes multi-region (humongous) allocation
    humongous_lock: Mutex<()>,
}

impl Heap {
    /// Create a heap for `config`
    ///
    /// The configuration is validated first; the mapping is sized to
    /// `num_regions << region_size_shift` words.
    pub fn new(config: &CompactConfig) -> Result<Self> {
        config.validate()?;

        let memory = HeapMemory::reserve(config.heap_bytes())?;
        let layout = HeapLayout::new(memory.base(), config.region_size_shift, config.num_regions);
        let regions = (0..layout.num_regions())
            .map(|i| HeapRegion::new(i, layout.region_bottom(i), layout.region_end(i)))
            .collect();
        let start_array = StartArray::new(&layout);

        log::debug!(
            "Heap created: {} regions of {} words at {:#x}, compact headers: {}",
            layout.num_regions(),
            layout.region_words(),
            layout.base(),
            config.compact_headers
        );

        Ok(Self {
            memory,
            layout,
            regions,
            start_array,
            compact_headers: config.compact_headers,
            humongous_lock: Mutex::new(()),
        })
    }

    #[inline]
    pub fn memory(&self) -> &HeapMemory {
        &self.memory
    }

    #[inline]
    pub fn layout(&self) -> &HeapLayout {
        &self.layout
    }

    #[inline]
    pub fn regions(&self) -> &[HeapRegion] {
        &self.regions
    }

    #[inline]
    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    #[inline]
    pub fn region(&self, index: usize) -> &HeapRegion {
        &self.regions[index]
    }

    #[inline]
    pub fn region_index_of(&self, addr: usize) -> usize {
        self.layout.region_index_of(addr)
    }

    #[inline]
    pub fn region_containing(&self, addr: usize) -> &HeapRegion {
        &self.regions[self.layout.region_index_of(addr)]
    }

    #[inline]
    pub fn start_array(&self) -> &StartArray {
        &self.start_array
    }

    #[inline]
    pub fn compact_headers(&self) -> bool {
        self.compact_headers
    }

    /// Check that `addr` is a word-aligned address inside the heap
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        self.layout.contains(addr) && self.memory.contains(addr)
    }

    /// True when `words` does not fit in a single region
    #[inline]
    pub fn is_humongous(&self, words: usize) -> bool {
        words > self.layout.region_words()
    }

    // === Allocation ===

    /// Allocate `words` words in the first region with room
    ///
    /// Humongous sizes are redirected to `allocate_humongous`.
    pub fn allocate(&self, words: usize) -> Result<usize> {
        if words == 0 {
            return Err(CompactError::InvalidArgument(
                "cannot allocate zero words".to_string(),
            ));
        }
        if self.is_humongous(words) {
            return self.allocate_humongous(words);
        }

        for region in &self.regions {
            if region.kind() == RegionKind::Regular {
                if let Some(addr) = region.allocate(words) {
                    self.start_array.record(addr);
                    return Ok(addr);
                }
            }
        }

        for region in &self.regions {
            if region.is_free() && region.transition_kind(RegionKind::Free, RegionKind::Regular) {
                if let Some(addr) = region.allocate(words) {
                    self.start_array.record(addr);
                    return Ok(addr);
                }
            }
        }

        Err(CompactError::OutOfMemory {
            requested: words,
            available: self.largest_free_run_words(),
        })
    }

    /// Allocate `words` words in region `index`
    ///
    /// A free region becomes regular. Humongous regions are rejected.
    pub fn allocate_in_region(&self, index: usize, words: usize) -> Result<usize> {
        let region = self.regions.get(index).ok_or_else(|| {
            CompactError::InvalidArgument(format!(
                "region {} out of range ({} regions)",
                index,
                self.regions.len()
            ))
        })?;

        match region.kind() {
            RegionKind::Free => {
                region.transition_kind(RegionKind::Free, RegionKind::Regular);
            }
            RegionKind::Regular => {}
            kind => {
                return Err(CompactError::RegionAllocationFailed {
                    reason: format!("region {} is {:?}", index, kind),
                })
            }
        }

        let addr = region.allocate(words).ok_or(CompactError::OutOfMemory {
            requested: words,
            available: region.free_words(),
        })?;
        self.start_array.record(addr);
        Ok(addr)
    }

    /// Allocate an object spanning a run of free regions
    pub fn allocate_humongous(&self, words: usize) -> Result<usize> {
        let needed = self.layout.regions_for(words);
        let _guard = self.humongous_lock.lock();

        let first = self.find_free_run(needed).ok_or_else(|| {
            CompactError::RegionAllocationFailed {
                reason: format!("no run of {} free regions for {} words", needed, words),
            }
        })?;

        self.install_humongous(first, words);
        Ok(self.regions[first].bottom())
    }

    /// Set kinds and tops of regions `first..` to hold a `words`-word object
    pub(crate) fn install_humongous(&self, first: usize, words: usize) {
        let needed = self.layout.regions_for(words);
        let obj = self.regions[first].bottom();
        let obj_end = word_offset(obj, words);
        for index in first..first + needed {
            let region = &self.regions[index];
            region.set_kind(if index == first {
                RegionKind::HumongousStart
            } else {
                RegionKind::HumongousContinues
            });
            region.set_top(obj_end.min(region.end()));
        }
        self.start_array.record(obj);
    }

    /// Return region `index` to the free pool and forget its object starts
    pub(crate) fn free_region(&self, index: usize) {
        let region = &self.regions[index];
        region.make_free();
        self.start_array.clear_range(region.bottom(), region.end());
    }

    fn find_free_run(&self, needed: usize) -> Option<usize> {
        let mut run = 0;
        for (index, region) in self.regions.iter().enumerate() {
            if region.is_free() {
                run += 1;
                if run == needed {
                    return Some(index + 1 - needed);
                }
            } else {
                run = 0;
            }
        }
        None
    }

    fn largest_free_run_words(&self) -> usize {
        self.regions
            .iter()
            .filter(|r| !r.is_humongous())
            .map(|r| r.free_words())
            .max()
            .unwrap_or(0)
    }

    // === Queries ===

    /// Words in use across all regions
    pub fn used_words(&self) -> usize {
        self.regions.iter().map(|r| r.used_words()).sum()
    }

    pub fn free_region_count(&self) -> usize {
        self.regions.iter().filter(|r| r.is_free()).count()
    }

    /// Start of the object containing the word at `addr`
    ///
    /// Uses the start array to find a nearby object start, then walks forward
    /// by object size. Returns `None` for addresses above a region's top.
    pub fn object_containing(&self, model: &dyn ObjectModel, addr: usize) -> Option<usize> {
        if !self.contains(addr) {
            return None;
        }
        let mut region = self.region_containing(addr);
        while region.kind() == RegionKind::HumongousContinues {
            region = &self.regions[region.index() - 1];
        }
        if addr >= self.region_containing(addr).top() {
            return None;
        }

        let mut cur = self.start_array.block_start(addr, region.bottom())?;
        loop {
            let size = model.size_in_words(self, cur);
            let next = cur + (size << LOG_WORD_SIZE);
            if addr < next {
                return Some(cur);
            }
            cur = next;
            if cur > addr {
                return None;
            }
        }
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("layout", &self.layout)
            .field("compact_headers", &self.compact_headers)
            .field("used_words", &self.used_words())
            .finish()
    }
}
