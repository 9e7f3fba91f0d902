//! Humongous Objects - Multi-Region Placement
//!
//! Humongous objects never go through a worker's compaction point. After the
//! parallel forward phase a single pass walks the regions in ascending order
//! and collects candidate destinations: free regions, and compacting regions
//! that received nothing. Each live humongous object is then offered the
//! first run of adjacent candidates below it.
//!
//! The data itself moves after the regular compact phase, once every
//! candidate region has been evacuated.

use super::copy::relocated_mark;
use super::point::{CompactionPoint, ForwardContext};
use crate::heap::{Heap, RegionKind};
use crate::object::{hash_of_address, MarkWord};
use crate::util::word_offset;

/// A planned humongous move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HumongousMove {
    /// First region of the object before the move
    pub source: usize,

    /// First region after the move
    pub dest: usize,
    pub size: usize,
    pub copy_size: usize,

    /// Header before forwarding
    pub mark: MarkWord,
}

impl HumongousMove {
    pub fn grown(&self) -> bool {
        self.copy_size > self.size
    }
}

/// Forward the humongous object starting in region `first`, if a run fits
pub fn forward_humongous(
    cx: &ForwardContext<'_>,
    candidates: &mut CompactionPoint,
    first: usize,
) -> Option<HumongousMove> {
    let heap = cx.heap;
    let memory = heap.memory();
    let obj = heap.region(first).bottom();
    let size = cx.model.size_in_words(heap, obj);
    let num = heap.layout().regions_for(size);
    let mark = memory.load_mark(obj);
    let copy_size = cx.model.copy_size_in_words(heap, obj, mark, true);

    if heap.layout().regions_for(copy_size) != num {
        log::debug!(
            "humongous object {:#x} stays: its hash word needs another region",
            obj
        );
        return None;
    }
    if !candidates.has_regions() {
        return None;
    }
    let begin = candidates.find_contiguous_before(first, num)?;
    let dest = candidates.regions()[begin];

    if cx.forwarding.overwrites_header() {
        cx.preserved
            .push_if_necessary(obj, mark, heap.compact_headers(), copy_size > size);
    }
    cx.forwarding.begin_region(first, 1);
    cx.forwarding
        .forward_to(memory, obj, heap.region(dest).bottom());

    candidates.add_humongous(heap, first, num);
    candidates.remove_range(begin, num);
    for index in dest..dest + num {
        heap.region(index).set_compacting(true);
    }

    log::debug!(
        "humongous object {:#x} ({} words) forwarded from region {} to region {}",
        obj,
        size,
        first,
        dest
    );
    Some(HumongousMove {
        source: first,
        dest,
        size,
        copy_size,
        mark,
    })
}

/// Serial humongous pass over the whole heap
///
/// `live_humongous` lists the start regions of live humongous objects in
/// ascending order.
pub fn plan_humongous_moves(cx: &ForwardContext<'_>, live_humongous: &[usize]) -> Vec<HumongousMove> {
    let heap = cx.heap;
    let mut candidates = CompactionPoint::new();
    let mut moves = Vec::new();
    let mut pending = live_humongous.iter().peekable();

    let mut index = 0;
    while index < heap.num_regions() {
        if pending.peek() == Some(&&index) {
            pending.next();
            let span = heap.layout().regions_for(cx.model.size_in_words(heap, heap.region(index).bottom()));
            if let Some(planned) = forward_humongous(cx, &mut candidates, index) {
                moves.push(planned);
            }
            index += span;
            continue;
        }

        let region = heap.region(index);
        let empty_target = match region.kind() {
            RegionKind::Free => true,
            RegionKind::Regular => {
                region.is_compacting() && region.compaction_top() == region.bottom()
            }
            _ => false,
        };
        if empty_target {
            candidates.add(heap, index);
        }
        index += 1;
    }
    moves
}

/// Move the planned humongous objects into place
///
/// Runs after the regular compact phase; destination regions are empty by
/// then. Returns the number of words moved.
pub fn apply_humongous_moves(heap: &Heap, moves: &[HumongousMove], header_intact: bool) -> usize {
    let memory = heap.memory();
    let layout = heap.layout();
    let mut moved = 0;

    for planned in moves {
        let src = heap.region(planned.source).bottom();
        let dest = heap.region(planned.dest).bottom();
        let num = layout.regions_for(planned.size);

        memory.copy_words(src, dest, planned.size);
        if planned.grown() {
            memory.store(word_offset(dest, planned.size), hash_of_address(src) as usize);
        }
        memory.store_mark(
            dest,
            relocated_mark(planned.mark, heap.compact_headers(), planned.grown(), header_intact),
        );

        let dest_end = planned.dest + num;
        for index in planned.source..planned.source + num {
            if index >= dest_end {
                heap.free_region(index);
            }
        }
        heap.start_array()
            .clear_range(src, heap.region(planned.source + num - 1).end());
        heap.install_humongous(planned.dest, planned.copy_size);
        moved += planned.copy_size;
    }
    moved
}
