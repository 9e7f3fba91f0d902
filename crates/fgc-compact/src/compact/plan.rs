//! Plan Phase - Per-Region Summaries
//!
//! Turns the liveness bitmap into per-region totals and decides which
//! regions take part in the compaction:
//!
//! ```text
//!  region:    0      1      2      3      4      5
//!  kind:      Reg    Reg    Reg    Free   HumS   Reg
//!  live:      full   full   70%    -      live   10%
//!             └ dense prefix ┘└ compacting ┘      └ compacting
//! ```
//!
//! The dense prefix is the leading run of regular regions that are already
//! completely packed: nothing in them can move, so they are neither sources
//! nor destinations.

use crate::heap::{Heap, RegionKind};
use crate::marker::LivenessBitmap;

/// Live totals of one region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSummary {
    pub index: usize,
    pub kind: RegionKind,
    pub live_words: usize,
    pub live_objects: usize,
}

impl RegionSummary {
    pub fn is_live(&self) -> bool {
        self.live_objects > 0
    }
}

/// Summaries of every region, in index order
pub fn summarize(heap: &Heap, bitmap: &LivenessBitmap) -> Vec<RegionSummary> {
    heap.regions()
        .iter()
        .map(|region| {
            let (bottom, top) = (region.bottom(), region.top());
            RegionSummary {
                index: region.index(),
                kind: region.kind(),
                live_words: bitmap.count_marked_words(bottom, top),
                live_objects: bitmap.count_marked_objects(bottom, top),
            }
        })
        .collect()
}

/// Length of the leading run of exactly full regular regions
pub fn dense_prefix(summaries: &[RegionSummary], region_words: usize) -> usize {
    summaries
        .iter()
        .take_while(|s| s.kind == RegionKind::Regular && s.live_words == region_words)
        .count()
}

/// Outcome of the plan phase
#[derive(Debug, Clone, Default)]
pub struct CompactionPlan {
    pub summaries: Vec<RegionSummary>,

    /// Leading regions left untouched
    pub dense_prefix: usize,

    /// Regular regions compacted this cycle, ascending
    pub compacting: Vec<usize>,

    /// Start regions of live humongous objects, ascending
    pub humongous: Vec<usize>,

    /// Regions released because their humongous object died
    pub freed_humongous_regions: usize,
}

impl CompactionPlan {
    /// Classify every region of `heap`
    ///
    /// Dead humongous objects are freed on the spot.
    pub fn build(heap: &Heap, bitmap: &LivenessBitmap) -> Self {
        let summaries = summarize(heap, bitmap);
        let dense_prefix = dense_prefix(&summaries, heap.layout().region_words());
        let mut plan = CompactionPlan {
            dense_prefix,
            ..Default::default()
        };

        let mut index = dense_prefix;
        while index < summaries.len() {
            let summary = &summaries[index];
            match summary.kind {
                RegionKind::Regular => plan.compacting.push(index),
                RegionKind::HumongousStart => {
                    let bottom = heap.region(index).bottom();
                    let span = Self::humongous_span(heap, index);
                    if bitmap.is_marked(bottom) {
                        plan.humongous.push(index);
                    } else {
                        for dead in index..index + span {
                            heap.free_region(dead);
                        }
                        plan.freed_humongous_regions += span;
                    }
                    index += span;
                    continue;
                }
                RegionKind::Free | RegionKind::HumongousContinues => {}
            }
            index += 1;
        }

        plan.summaries = summaries;
        plan
    }

    /// Regions covered by the humongous object starting in region `first`
    fn humongous_span(heap: &Heap, first: usize) -> usize {
        1 + heap.regions()[first + 1..]
            .iter()
            .take_while(|r| r.kind() == RegionKind::HumongousContinues)
            .count()
    }

    pub fn live_words(&self) -> usize {
        self.summaries.iter().map(|s| s.live_words).sum()
    }

    pub fn live_objects(&self) -> usize {
        self.summaries.iter().map(|s| s.live_objects).sum()
    }

    pub fn summary(&self, index: usize) -> &RegionSummary {
        &self.summaries[index]
    }
}
