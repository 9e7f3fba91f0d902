//! Compaction Point - Destination Cursor over a Region Sequence
//!
//! A compaction point owns an ordered list of destination regions and a
//! cursor (`compaction_top`) into the current one. Live objects are fed to
//! `forward` in address order; each is placed at the cursor, spilling into
//! the next region of the sequence when it does not fit.
//!
//! ```text
//!  Uninitialized ──add──▶ Active ──switch_region──▶ Active ... ──finish──▶ Done
//! ```
//!
//! An object already sitting at the cursor is not forwarded at all: in-place
//! sliding costs one comparison per object.
//!
//! Encodings that bound the destination regions of one source region (sliding
//! forwarding) are respected here: once a source region has used up its
//! destinations, its remaining objects stay in place and the cursor jumps to
//! them, leaving any dead gaps in that region for the next cycle.
//!
//! The same structure doubles as the candidate pool for humongous placement,
//! see `find_contiguous_before`.

use crate::forwarding::Forwarding;
use crate::heap::Heap;
use crate::object::{ObjectModel, PreservedMarks};
use crate::util::{words_between, word_offset};

/// Collaborators needed to forward an object
#[derive(Clone, Copy)]
pub struct ForwardContext<'a> {
    pub heap: &'a Heap,
    pub model: &'a dyn ObjectModel,
    pub forwarding: &'a Forwarding,
    pub preserved: &'a PreservedMarks,
}

/// Lifecycle of a compaction point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointState {
    Uninitialized,
    Active,
    Done,
}

/// Placement of one object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub dest: usize,

    /// Words the object occupies at `dest`
    pub words: usize,
    pub moved: bool,
}

/// Per-point counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointStats {
    pub placed_objects: usize,
    pub forwarded_objects: usize,
    pub grown_objects: usize,
    pub preserved_marks: usize,

    /// Objects left in place because their source region had no destination left
    pub kept_in_place: usize,
}

/// CompactionPoint - cursor over an ordered list of destination regions
#[derive(Debug)]
pub struct CompactionPoint {
    regions: Vec<usize>,
    current: usize,
    compaction_top: usize,
    state: PointState,
    stats: PointStats,

    /// Source region of the last forwarded object and the regions it moved into
    source: Option<usize>,
    source_dests: Vec<usize>,
}

impl CompactionPoint {
    pub fn new() -> Self {
        Self {
            regions: Vec::new(),
            current: 0,
            compaction_top: 0,
            state: PointState::Uninitialized,
            stats: PointStats::default(),
            source: None,
            source_dests: Vec::new(),
        }
    }

    pub fn state(&self) -> PointState {
        self.state
    }

    pub fn stats(&self) -> PointStats {
        self.stats
    }

    /// Destination regions in sequence order
    pub fn regions(&self) -> &[usize] {
        &self.regions
    }

    pub fn has_regions(&self) -> bool {
        !self.regions.is_empty()
    }

    /// Region the cursor is in
    pub fn current_region(&self) -> Option<usize> {
        match self.state {
            PointState::Uninitialized => None,
            _ => self.regions.get(self.current).copied(),
        }
    }

    pub fn compaction_top(&self) -> usize {
        self.compaction_top
    }

    /// Append region `index` to the sequence; the first region activates the point
    pub fn add(&mut self, heap: &Heap, index: usize) {
        self.regions.push(index);
        if self.state == PointState::Uninitialized {
            self.initialize(heap, self.regions.len() - 1);
        }
    }

    /// Make the region at `position` current and resume from its persisted top
    pub fn initialize(&mut self, heap: &Heap, position: usize) {
        self.current = position;
        self.compaction_top = heap.region(self.regions[position]).compaction_top();
        self.state = PointState::Active;
    }

    /// Whether `words` fit between the cursor and the end of the current region
    pub fn object_will_fit(&self, heap: &Heap, words: usize) -> bool {
        let end = heap.region(self.regions[self.current]).end();
        words <= words_between(self.compaction_top, end)
    }

    /// Persist the current top and move to the next region of the sequence
    pub fn switch_region(&mut self, heap: &Heap) {
        heap.region(self.regions[self.current])
            .set_compaction_top(self.compaction_top);
        let next = self.current + 1;
        crate::guarantee!(
            next < self.regions.len(),
            "compaction point ran out of regions after region {}",
            self.regions[self.current]
        );
        self.initialize(heap, next);
    }

    /// Place `obj` (currently `size` words) at the cursor
    ///
    /// Moving objects are forwarded and may grow by their copy size; objects
    /// already at the cursor are left unforwarded. The placement is recorded
    /// in the start array at the destination.
    pub fn forward(&mut self, cx: &ForwardContext<'_>, obj: usize, size: usize) -> Placement {
        crate::guarantee!(
            self.state == PointState::Active,
            "forward on a {:?} compaction point",
            self.state
        );
        let heap = cx.heap;
        let memory = heap.memory();
        let mark = memory.load_mark(obj);
        let copy_size = cx.model.copy_size_in_words(heap, obj, mark, true);
        let words_at_cursor = |top: usize| if top == obj { size } else { copy_size };

        let source = heap.region_index_of(obj);
        if self.source != Some(source) {
            self.source = Some(source);
            self.source_dests.clear();
        }

        while !self.object_will_fit(heap, words_at_cursor(self.compaction_top)) {
            self.switch_region(heap);
        }

        let mut dest = self.compaction_top;
        if dest != obj && !self.may_forward_into(cx.forwarding, heap.region_index_of(dest)) {
            self.keep_in_place(heap, source, obj);
            self.stats.kept_in_place += 1;
            dest = obj;
        }

        let moved = dest != obj;
        let words = words_at_cursor(dest);
        if moved {
            let dest_region = heap.region_index_of(dest);
            if !self.source_dests.contains(&dest_region) {
                self.source_dests.push(dest_region);
            }
            let grown = words > size;
            if cx.forwarding.overwrites_header()
                && cx
                    .preserved
                    .push_if_necessary(obj, mark, heap.compact_headers(), grown)
            {
                self.stats.preserved_marks += 1;
            }
            cx.forwarding.forward_to(memory, obj, dest);
            debug_assert!(cx.forwarding.is_forwarded(memory, obj));
            self.stats.forwarded_objects += 1;
            if grown {
                self.stats.grown_objects += 1;
            }
            log::trace!("forward {:#x} -> {:#x} ({} words)", obj, dest, words);
        } else {
            debug_assert!(!cx.forwarding.is_forwarded(memory, obj));
        }

        self.compaction_top = word_offset(dest, words);
        heap.start_array().record(dest);
        self.stats.placed_objects += 1;
        Placement { dest, words, moved }
    }

    /// Whether the current source region may still forward into `dest_region`
    fn may_forward_into(&self, forwarding: &Forwarding, dest_region: usize) -> bool {
        match forwarding.destinations_per_region() {
            Some(limit) => {
                self.source_dests.len() < limit || self.source_dests.contains(&dest_region)
            }
            None => true,
        }
    }

    /// Move the cursor onto `obj` in its own region `source`
    ///
    /// Regions between the current one and `source` are left empty.
    fn keep_in_place(&mut self, heap: &Heap, source: usize, obj: usize) {
        if self.regions[self.current] != source {
            let position = match self.regions[self.current..].iter().position(|&r| r == source) {
                Some(offset) => self.current + offset,
                None => crate::fatal!(
                    "source region {} is not part of its compaction point",
                    source
                ),
            };
            heap.region(self.regions[self.current])
                .set_compaction_top(self.compaction_top);
            log::debug!(
                "region {} used its destinations {:?}, keeping its other objects in place",
                source,
                self.source_dests
            );
            self.current = position;
        }
        self.compaction_top = obj;
    }

    /// Persist the cursor into the current region
    pub fn finish(&mut self, heap: &Heap) {
        if self.state == PointState::Active {
            heap.region(self.regions[self.current])
                .set_compaction_top(self.compaction_top);
        }
        self.state = PointState::Done;
    }

    // === Humongous candidates ===

    /// Position in the sequence of a run of `num` physically adjacent regions
    /// that can take a humongous object starting at `source_region`
    ///
    /// Takes the first run of `num` consecutive indices. Failing that, a
    /// shorter run at the end of the list is accepted when it is adjacent to
    /// the source region: the object then slides down partly onto itself.
    /// Every candidate lies below `source_region`.
    pub fn find_contiguous_before(&self, source_region: usize, num: usize) -> Option<usize> {
        debug_assert!(num > 0);
        if self.regions.is_empty() {
            return None;
        }
        if num == 1 {
            return Some(0);
        }

        let mut run = 1;
        let mut end = 1;
        while end < self.regions.len() {
            if run == num {
                break;
            }
            run = if self.regions[end] - self.regions[end - 1] == 1 {
                run + 1
            } else {
                1
            };
            end += 1;
        }

        if run < num && source_region - self.regions[end - 1] != 1 {
            return None;
        }
        Some(end - run)
    }

    /// Append every region of the humongous object starting at `first`
    pub fn add_humongous(&mut self, heap: &Heap, first: usize, count: usize) {
        for index in first..first + count {
            self.add(heap, index);
        }
    }

    /// Drop `count` candidates starting at position `start`
    pub fn remove_range(&mut self, start: usize, count: usize) {
        let end = (start + count).min(self.regions.len());
        self.regions.drain(start..end);
        if self.current >= self.regions.len() {
            self.current = self.regions.len().saturating_sub(1);
        }
    }
}

impl Default for CompactionPoint {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompactConfig, ForwardingMode};
    use crate::object::{ClassInfo, ClassTable};

    fn heap(compact: bool, regions: usize) -> Heap {
        Heap::new(&CompactConfig {
            compact_headers: compact,
            region_size_shift: 4,
            block_size_shift: 2,
            num_regions: regions,
            ..Default::default()
        })
        .unwrap()
    }

    fn point_over(heap: &Heap, regions: &[usize]) -> CompactionPoint {
        let mut point = CompactionPoint::new();
        for &index in regions {
            heap.region(index).begin_compaction();
            point.add(heap, index);
        }
        point
    }

    #[test]
    fn test_in_place_objects_are_not_forwarded() {
        let heap = heap(false, 4);
        let mut classes = ClassTable::new(false);
        let pair = classes.register(ClassInfo::new("pair", 4, &[2, 3])).unwrap();
        let a = classes.instantiate_in_region(&heap, 0, pair).unwrap();
        let b = classes.instantiate_in_region(&heap, 0, pair).unwrap();

        let config = CompactConfig::default();
        let forwarding = Forwarding::select(&config, heap.layout());
        let preserved = PreservedMarks::new();
        let cx = ForwardContext {
            heap: &heap,
            model: &classes,
            forwarding: &forwarding,
            preserved: &preserved,
        };

        let mut point = point_over(&heap, &[0]);
        let pa = point.forward(&cx, a, 4);
        let pb = point.forward(&cx, b, 4);

        assert!(!pa.moved && !pb.moved);
        assert!(!forwarding.is_forwarded(heap.memory(), a));
        assert!(!forwarding.is_forwarded(heap.memory(), b));
        assert_eq!(point.compaction_top(), word_offset(heap.region(0).bottom(), 8));
        assert_eq!(point.stats().forwarded_objects, 0);
    }

    #[test]
    fn test_forward_slides_and_switches_regions() {
        let heap = heap(false, 4);
        let mut classes = ClassTable::new(false);
        let big = classes.register(ClassInfo::new("big", 10, &[])).unwrap();
        let a = classes.instantiate_in_region(&heap, 1, big).unwrap();
        let b = classes.instantiate_in_region(&heap, 2, big).unwrap();

        let config = CompactConfig::default();
        let forwarding = Forwarding::select(&config, heap.layout());
        let preserved = PreservedMarks::new();
        let cx = ForwardContext {
            heap: &heap,
            model: &classes,
            forwarding: &forwarding,
            preserved: &preserved,
        };

        let mut point = point_over(&heap, &[0, 1, 2]);
        let pa = point.forward(&cx, a, 10);
        assert_eq!(pa.dest, heap.region(0).bottom());
        // 6 words left in region 0: b spills into region 1
        let pb = point.forward(&cx, b, 10);
        assert_eq!(pb.dest, heap.region(1).bottom());
        assert_eq!(point.current_region(), Some(1));
        assert_eq!(heap.region(0).compaction_top(), word_offset(heap.region(0).bottom(), 10));

        point.finish(&heap);
        assert_eq!(point.state(), PointState::Done);
        assert_eq!(heap.region(1).compaction_top(), word_offset(heap.region(1).bottom(), 10));
        assert_eq!(forwarding.forwardee(heap.memory(), b), Some(pb.dest));
    }

    #[test]
    fn test_moving_hashed_object_grows_and_is_preserved() {
        let heap = heap(true, 2);
        let mut classes = ClassTable::new(true);
        let leaf = classes.register(ClassInfo::new("leaf", 2, &[])).unwrap();
        let _dead = classes.instantiate_in_region(&heap, 0, leaf).unwrap();
        let obj = classes.instantiate_in_region(&heap, 0, leaf).unwrap();
        crate::object::identity_hash(&heap, &classes, obj);
        crate::object::stack_lock(heap.memory(), obj);

        let config = CompactConfig {
            compact_headers: true,
            forwarding: Some(ForwardingMode::Sliding),
            ..Default::default()
        };
        let mut forwarding = Forwarding::select(&config, heap.layout());
        forwarding.begin();
        let preserved = PreservedMarks::new();
        let cx = ForwardContext {
            heap: &heap,
            model: &classes,
            forwarding: &forwarding,
            preserved: &preserved,
        };

        let mut point = point_over(&heap, &[0]);
        let placed = point.forward(&cx, obj, 2);
        assert!(placed.moved);
        assert_eq!(placed.words, 3);
        assert_eq!(preserved.len(), 1);
        assert_eq!(point.stats().grown_objects, 1);
    }

    #[test]
    fn test_source_region_keeps_to_two_sliding_destinations() {
        let heap = heap(true, 3);
        let mut classes = ClassTable::new(true);
        let cell = classes.register(ClassInfo::new("cell", 1, &[])).unwrap();
        let filler = classes.register(ClassInfo::new("filler", 15, &[])).unwrap();
        let block = classes.register(ClassInfo::new("block", 16, &[])).unwrap();

        let anchor = classes.instantiate_in_region(&heap, 0, cell).unwrap();
        classes.instantiate_in_region(&heap, 0, filler).unwrap();
        classes.instantiate_in_region(&heap, 1, block).unwrap();
        let cells: Vec<usize> = (0..16)
            .map(|_| classes.instantiate_in_region(&heap, 2, cell).unwrap())
            .collect();
        for &c in &cells {
            crate::object::identity_hash(&heap, &classes, c);
        }

        let config = CompactConfig {
            compact_headers: true,
            forwarding: Some(ForwardingMode::Sliding),
            ..Default::default()
        };
        let mut forwarding = Forwarding::select(&config, heap.layout());
        forwarding.begin();
        let preserved = PreservedMarks::new();
        let cx = ForwardContext {
            heap: &heap,
            model: &classes,
            forwarding: &forwarding,
            preserved: &preserved,
        };

        let mut point = point_over(&heap, &[0, 1, 2]);
        assert!(!point.forward(&cx, anchor, 1).moved);
        let placements: Vec<Placement> = cells.iter().map(|&c| point.forward(&cx, c, 1)).collect();
        point.finish(&heap);

        // 7 grown cells fit behind the anchor, 8 fill region 1
        let mut dest_regions: Vec<usize> = placements
            .iter()
            .filter(|p| p.moved)
            .map(|p| heap.region_index_of(p.dest))
            .collect();
        assert_eq!(dest_regions.len(), 15);
        dest_regions.dedup();
        assert_eq!(dest_regions, vec![0, 1]);

        // a third destination is not available: the last cell stays
        let last = placements[15];
        assert_eq!((last.dest, last.words, last.moved), (cells[15], 1, false));
        assert_eq!(point.stats().kept_in_place, 1);
        assert_eq!(point.stats().grown_objects, 15);
        assert_eq!(heap.region(2).compaction_top(), heap.region(2).end());

        for (placed, &c) in placements.iter().zip(&cells) {
            assert_eq!(
                forwarding.forwardee(heap.memory(), c),
                placed.moved.then_some(placed.dest)
            );
        }
    }

    #[test]
    fn test_unbounded_encodings_fill_the_source_region() {
        let heap = heap(true, 3);
        let mut classes = ClassTable::new(true);
        let cell = classes.register(ClassInfo::new("cell", 1, &[])).unwrap();
        let filler = classes.register(ClassInfo::new("filler", 15, &[])).unwrap();
        let block = classes.register(ClassInfo::new("block", 16, &[])).unwrap();
        let kept = classes.instantiate_in_region(&heap, 0, filler).unwrap();
        classes.instantiate_in_region(&heap, 1, block).unwrap();
        let cells: Vec<usize> = (0..16)
            .map(|_| classes.instantiate_in_region(&heap, 2, cell).unwrap())
            .collect();
        for &c in &cells {
            crate::object::identity_hash(&heap, &classes, c);
        }

        let config = CompactConfig {
            compact_headers: true,
            forwarding: Some(ForwardingMode::Dense),
            ..Default::default()
        };
        let mut forwarding = Forwarding::select(&config, heap.layout());
        forwarding.begin();
        forwarding.begin_region(2, cells.len());
        let preserved = PreservedMarks::new();
        let cx = ForwardContext {
            heap: &heap,
            model: &classes,
            forwarding: &forwarding,
            preserved: &preserved,
        };

        let mut point = point_over(&heap, &[0, 1, 2]);
        assert!(!point.forward(&cx, kept, 15).moved);
        let placements: Vec<Placement> = cells.iter().map(|&c| point.forward(&cx, c, 1)).collect();
        assert!(placements.iter().all(|p| p.moved && p.words == 2));
        // 8 cells fill region 1, the other 8 slide down inside region 2
        assert_eq!(placements[8].dest, heap.region(2).bottom());
        assert_eq!(placements[15].dest, word_offset(heap.region(2).bottom(), 14));
        assert_eq!(point.stats().kept_in_place, 0);
    }

    #[test]
    #[should_panic(expected = "ran out of regions")]
    fn test_exhausted_sequence_is_fatal() {
        let heap = heap(false, 2);
        let mut classes = ClassTable::new(false);
        let full = classes.register(ClassInfo::new("full", 16, &[])).unwrap();
        let a = classes.instantiate_in_region(&heap, 1, full).unwrap();
        heap.allocate_in_region(0, 1).unwrap();

        let config = CompactConfig::default();
        let forwarding = Forwarding::select(&config, heap.layout());
        let preserved = PreservedMarks::new();
        let cx = ForwardContext {
            heap: &heap,
            model: &classes,
            forwarding: &forwarding,
            preserved: &preserved,
        };
        let mut point = CompactionPoint::new();
        heap.region(0).begin_compaction();
        point.add(&heap, 0);
        heap.region(0).set_compaction_top(word_offset(heap.region(0).bottom(), 1));
        point.initialize(&heap, 0);
        point.forward(&cx, a, 16);
    }

    #[test]
    fn test_find_contiguous_before_takes_first_full_run() {
        let heap = heap(false, 32);
        let point = point_over(&heap, &[5, 6, 7, 10, 11]);
        assert_eq!(point.find_contiguous_before(20, 3), Some(0));
        assert_eq!(point.find_contiguous_before(20, 1), Some(0));
        assert_eq!(point.find_contiguous_before(20, 4), None);
    }

    #[test]
    fn test_find_contiguous_before_overlapping_source() {
        let heap = heap(false, 32);
        let point = point_over(&heap, &[2, 8, 9]);
        // 8, 9 plus the source's own region 10
        assert_eq!(point.find_contiguous_before(10, 3), Some(1));
        assert_eq!(point.find_contiguous_before(12, 3), None);
        assert_eq!(CompactionPoint::new().find_contiguous_before(4, 2), None);
    }

    #[test]
    fn test_remove_range_and_add_humongous() {
        let heap = heap(false, 32);
        let mut point = point_over(&heap, &[5, 6, 7, 10, 11]);
        point.add_humongous(&heap, 20, 3);
        point.remove_range(0, 3);
        assert_eq!(point.regions(), &[10, 11, 20, 21, 22]);
    }
}
