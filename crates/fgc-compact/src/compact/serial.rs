//! Serial Sliding Compaction with a Block Offset Table
//!
//! Single-threaded alternative to the region compactor. Nothing is written
//! into object headers: destinations are computed from the liveness bitmap
//! through a `BlockOffsetTable`, so headers survive the whole cycle
//! untouched and no marks need preserving.
//!
//! Every non-humongous region past the dense prefix is both a source and a
//! destination space, in address order. Humongous objects stay where they
//! are.
//!
//! Requires classic headers: the table has no way to account for an object
//! growing by a hash word while it moves.

use super::adjust::{adjust_heap, adjust_roots};
use super::block_offset::{BlockOffsetTable, CompactionSpace};
use super::plan::CompactionPlan;
use crate::heap::Heap;
use crate::marker::{LivenessBitmap, RootSet};
use crate::object::{ObjectModel, PreservedMarks};

/// Result of a serial cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerialOutcome {
    pub moved_objects: usize,
    pub moved_words: usize,
    pub freed_regions: usize,
    pub released_bytes: usize,
}

/// SerialCompactor - block-offset-table compaction of one heap
pub struct SerialCompactor<'a> {
    heap: &'a Heap,
    model: &'a dyn ObjectModel,
    bitmap: &'a LivenessBitmap,
    table: BlockOffsetTable,
    regions: Vec<usize>,
    spaces: Vec<CompactionSpace>,
}

impl<'a> SerialCompactor<'a> {
    pub fn new(
        heap: &'a Heap,
        model: &'a dyn ObjectModel,
        bitmap: &'a LivenessBitmap,
        block_size_shift: u32,
    ) -> Self {
        crate::guarantee!(
            !heap.compact_headers(),
            "block offset compaction needs classic headers"
        );
        let layout = heap.layout();
        Self {
            heap,
            model,
            bitmap,
            table: BlockOffsetTable::new(layout.base(), layout.heap_words(), block_size_shift),
            regions: Vec::new(),
            spaces: Vec::new(),
        }
    }

    /// Pick sources and spaces: every non-humongous region past the dense prefix
    ///
    /// Dead humongous objects are freed here, live ones stay put.
    pub fn plan(&mut self) -> CompactionPlan {
        let plan = CompactionPlan::build(self.heap, self.bitmap);
        self.regions = self.heap.regions()[plan.dense_prefix..]
            .iter()
            .filter(|r| !r.is_humongous())
            .map(|r| r.index())
            .collect();
        self.spaces = self
            .regions
            .iter()
            .map(|&i| CompactionSpace::new(self.heap.region(i).bottom(), self.heap.region(i).end()))
            .collect();
        plan
    }

    /// Build the block offset table over the planned regions
    ///
    /// Returns the number of regions that will hold data afterwards.
    pub fn forward(&mut self) -> usize {
        self.table.clear();
        if self.spaces.is_empty() {
            return 0;
        }
        let sources: Vec<(usize, usize)> = self
            .regions
            .iter()
            .map(|&i| (self.heap.region(i).bottom(), self.heap.region(i).top()))
            .collect();
        let last = self.table.build(self.bitmap, &sources, &mut self.spaces);
        log::debug!(
            "Block offset table built: {} spaces, last filled space {}",
            self.spaces.len(),
            last
        );
        self.spaces.iter().filter(|s| s.used_words() > 0).count()
    }

    /// Destination of a live object, `None` if it stays
    pub fn forwardee(&self, obj: usize) -> Option<usize> {
        let region = self.heap.region_containing(obj);
        if region.is_humongous() || region.index() < self.prefix_end() {
            return None;
        }
        match self.table.forwardee(self.bitmap, obj) {
            dest if dest == obj => None,
            dest => Some(dest),
        }
    }

    fn prefix_end(&self) -> usize {
        self.regions.first().copied().unwrap_or(usize::MAX)
    }

    /// Rewrite references, roots and preserved-mark owners
    pub fn adjust(&self, roots: &RootSet, preserved: &PreservedMarks) -> usize {
        let forwardee = |obj: usize| self.forwardee(obj);
        let updated = adjust_heap(self.heap, self.model, self.bitmap, 1, &forwardee);
        adjust_roots(self.heap, roots, preserved, &forwardee);
        updated
    }

    /// Slide every live object to its destination in address order
    pub fn compact(&self) -> SerialOutcome {
        let heap = self.heap;
        let memory = heap.memory();
        let mut outcome = SerialOutcome::default();

        // starts recorded at the destinations below
        for &index in &self.regions {
            let region = heap.region(index);
            heap.start_array().clear_range(region.bottom(), region.end());
        }

        for &index in &self.regions {
            let region = heap.region(index);
            for obj in self.bitmap.marked_in(region.bottom(), region.top()) {
                let size = self.model.size_in_words(heap, obj);
                let dest = self.table.forwardee(self.bitmap, obj);
                debug_assert!(dest <= obj, "serial compaction moved {:#x} up", obj);
                if dest != obj {
                    memory.copy_words(obj, dest, size);
                    outcome.moved_objects += 1;
                    outcome.moved_words += size;
                }
                heap.start_array().record(dest);
            }
        }
        outcome
    }

    /// Publish the new tops and free the regions left empty
    pub fn finish(&self, release_free_regions: bool) -> SerialOutcome {
        let heap = self.heap;
        let mut outcome = SerialOutcome::default();
        for (&index, space) in self.regions.iter().zip(&self.spaces) {
            let region = heap.region(index);
            if space.used_words() == 0 {
                if !region.is_free() {
                    outcome.freed_regions += 1;
                }
                heap.free_region(index);
                if release_free_regions {
                    outcome.released_bytes += heap
                        .memory()
                        .release(region.bottom(), region.end() - region.bottom());
                }
            } else {
                region.set_kind(crate::heap::RegionKind::Regular);
                region.set_top(space.compaction_top);
            }
        }
        self.bitmap.clear();
        outcome
    }
}
