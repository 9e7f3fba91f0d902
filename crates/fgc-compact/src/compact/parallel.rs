//! Parallel Region Compaction
//!
//! Phases 2-5 of a cycle for `CompactionStyle::Parallel`:
//!
//! ```text
//!  plan      summaries, dense prefix, per-region setup
//!  forward   workers claim region chunks; one compaction point per worker
//!            then one serial pass for humongous objects
//!  adjust    work-stealing over regions (see adjust.rs)
//!  compact   one task per source region, started in ascending order
//!  finish    tops and kinds, humongous moves, mark restore, teardown
//! ```
//!
//! # Compact phase
//!
//! Objects only move down: a worker's compaction point only ever holds
//! regions at or below the one it is forwarding from. A source region is
//! therefore only blocked by destination regions below it, whose tasks
//! started earlier.
//!
//! A source region first records every move (destination, sizes, new header)
//! while its contents are still intact, then copies them grouped by
//! destination region in ascending order. Its own region comes last. A
//! destination that is not ready after `shadow_spin_limit` rounds gets a
//! shadow copy instead; the destination flushes it when it becomes ready.

use super::adjust::{adjust_heap, adjust_roots};
use super::copy::{relocated_mark, MoveRecord, ObjectCopier};
use super::humongous::{apply_humongous_moves, plan_humongous_moves, HumongousMove};
use super::plan::CompactionPlan;
use super::point::{CompactionPoint, ForwardContext, PointStats};
use super::shadow::ShadowRegion;
use super::task::{run_workers, RegionClaimer, TaskQueue};
use crate::forwarding::Forwarding;
use crate::heap::{Heap, HeapRegion};
use crate::logging::{GcEvent, GcLogger};
use crate::marker::{LivenessBitmap, RootSet};
use crate::object::{ObjectModel, PreservedMarks};
use crossbeam::utils::Backoff;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Knobs of the parallel compactor, taken from `CompactConfig`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelSettings {
    pub workers: usize,
    pub regions_per_claim: usize,
    pub shadow_regions: bool,
    pub shadow_spin_limit: usize,
    pub release_free_regions: bool,
}

/// Result of the forward phase
#[derive(Debug, Default)]
pub struct ForwardOutcome {
    pub points: PointStats,
    pub humongous: Vec<HumongousMove>,
}

/// Result of the compact and finish steps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactOutcome {
    pub moved_objects: usize,
    pub moved_words: usize,
    pub grown_objects: usize,
    pub shadow_regions: usize,
    pub humongous_words: usize,
    pub freed_regions: usize,
    pub released_bytes: usize,
}

/// ParallelCompactor - shared state of one parallel cycle
pub struct ParallelCompactor<'a> {
    heap: &'a Heap,
    model: &'a dyn ObjectModel,
    bitmap: &'a LivenessBitmap,
    preserved: &'a PreservedMarks,
    logger: &'a GcLogger,
    settings: ParallelSettings,
    copier: ObjectCopier,
    shadows: AtomicUsize,
}

impl<'a> ParallelCompactor<'a> {
    pub fn new(
        heap: &'a Heap,
        model: &'a dyn ObjectModel,
        bitmap: &'a LivenessBitmap,
        preserved: &'a PreservedMarks,
        logger: &'a GcLogger,
        settings: ParallelSettings,
    ) -> Self {
        Self {
            heap,
            model,
            bitmap,
            preserved,
            logger,
            settings,
            copier: ObjectCopier::new(),
            shadows: AtomicUsize::new(0),
        }
    }

    fn context<'f>(&self, forwarding: &'f Forwarding) -> ForwardContext<'f>
    where
        'a: 'f,
    {
        ForwardContext {
            heap: self.heap,
            model: self.model,
            forwarding,
            preserved: self.preserved,
        }
    }

    // === Plan ===

    /// Classify regions and prepare forwarding storage for the cycle
    pub fn plan(&self, forwarding: &mut Forwarding) -> CompactionPlan {
        let plan = CompactionPlan::build(self.heap, self.bitmap);

        forwarding.begin();
        forwarding.reserve(plan.live_objects());
        for &index in &plan.compacting {
            let region = self.heap.region(index);
            region.begin_compaction();
            self.heap
                .start_array()
                .clear_range(region.bottom(), region.end());
            forwarding.begin_region(index, plan.summary(index).live_objects);
        }

        log::debug!(
            "Plan: dense prefix {} regions, {} compacting, {} live humongous",
            plan.dense_prefix,
            plan.compacting.len(),
            plan.humongous.len()
        );
        plan
    }

    // === Forward ===

    /// Install forwardings for every live object that moves
    pub fn forward(&self, forwarding: &Forwarding, plan: &CompactionPlan) -> ForwardOutcome {
        let cx = self.context(forwarding);
        let claimer = RegionClaimer::new(plan.compacting.clone(), self.settings.regions_per_claim);
        let totals = Mutex::new(PointStats::default());

        run_workers(self.settings.workers, |worker| {
            let mut point = CompactionPoint::new();
            loop {
                let chunk = claimer.claim();
                if chunk.is_empty() {
                    break;
                }
                for &index in chunk {
                    point.add(self.heap, index);
                    let region = self.heap.region(index);
                    for obj in self.bitmap.marked_in(region.bottom(), region.top()) {
                        let size = self.model.size_in_words(self.heap, obj);
                        point.forward(&cx, obj, size);
                    }
                }
            }
            point.finish(self.heap);

            let stats = point.stats();
            log::trace!(
                "worker {} forwarded {} of {} objects over {} regions",
                worker,
                stats.forwarded_objects,
                stats.placed_objects,
                point.regions().len()
            );
            let mut totals = totals.lock();
            totals.placed_objects += stats.placed_objects;
            totals.forwarded_objects += stats.forwarded_objects;
            totals.grown_objects += stats.grown_objects;
            totals.preserved_marks += stats.preserved_marks;
            totals.kept_in_place += stats.kept_in_place;
        });

        let humongous = plan_humongous_moves(&cx, &plan.humongous);
        ForwardOutcome {
            points: totals.into_inner(),
            humongous,
        }
    }

    // === Adjust ===

    /// Point every reference, root and preserved mark at its forwardee
    pub fn adjust(&self, forwarding: &Forwarding, roots: &RootSet) -> usize {
        let memory = self.heap.memory();
        let forwardee = |obj: usize| forwarding.forwardee(memory, obj);
        let updated = adjust_heap(
            self.heap,
            self.model,
            self.bitmap,
            self.settings.workers,
            &forwardee,
        );
        adjust_roots(self.heap, roots, self.preserved, &forwardee);
        updated
    }

    // === Compact ===

    /// Move every forwarded object of the compacting regions
    pub fn compact(&self, forwarding: &Forwarding, plan: &CompactionPlan) {
        let tasks: TaskQueue<usize> = plan.compacting.iter().copied().collect();
        tasks.run_in_order(self.settings.workers, |_, index| {
            self.compact_region(forwarding, index);
        });
    }

    fn compact_region(&self, forwarding: &Forwarding, source: usize) {
        let heap = self.heap;
        let memory = heap.memory();
        let region = heap.region(source);
        let header_intact = !forwarding.overwrites_header();

        let mut records = Vec::new();
        for obj in self.bitmap.marked_in(region.bottom(), region.top()) {
            let Some(dest) = forwarding.forwardee(memory, obj) else {
                continue;
            };
            let mark = memory.load_mark(obj);
            let size = self.model.size_in_words(heap, obj);
            let copy_size = self.model.copy_size_in_words(heap, obj, mark, true);
            records.push(MoveRecord {
                src: obj,
                dest,
                size,
                copy_size,
                new_mark: relocated_mark(mark, heap.compact_headers(), copy_size > size, header_intact),
            });
        }

        // destinations ascend with the sources, so the source's own group is last
        for group in records.chunk_by(|a, b| heap.region_index_of(a.dest) == heap.region_index_of(b.dest)) {
            let dest_index = heap.region_index_of(group[0].dest);
            debug_assert!(
                dest_index <= source,
                "region {} forwards up into region {}",
                source,
                dest_index
            );
            if dest_index == source {
                for record in group {
                    self.copier.copy_object(memory, record);
                }
            } else {
                self.copy_to_other(heap.region(dest_index), source, group);
            }
        }

        for shadow in region.mark_ready() {
            shadow.flush(memory);
        }
    }

    fn copy_to_other(&self, dest: &HeapRegion, source: usize, group: &[MoveRecord]) {
        let memory = self.heap.memory();
        if self.wait_until_ready(dest) {
            for record in group {
                self.copier.copy_object(memory, record);
            }
            return;
        }

        if !self.settings.shadow_regions {
            while !dest.is_ready() {
                std::thread::yield_now();
            }
            for record in group {
                self.copier.copy_object(memory, record);
            }
            return;
        }

        let mut words = Vec::with_capacity(group.iter().map(|r| r.copy_size).sum());
        for record in group {
            debug_assert_eq!(
                record.dest,
                group[0].dest + words.len() * crate::WORD_SIZE,
                "shadow copy must be contiguous"
            );
            self.copier.copy_to_buffer(memory, record, &mut words);
        }
        let shadow = ShadowRegion::new(dest.index(), group[0].dest, words);
        self.shadows.fetch_add(1, Ordering::Relaxed);
        self.logger.log(GcEvent::ShadowFallback {
            source_region: source,
            dest_region: dest.index(),
            words: shadow.len_words(),
        });
        if let Some(returned) = dest.offer_shadow(shadow) {
            returned.flush(memory);
        }
    }

    fn wait_until_ready(&self, region: &HeapRegion) -> bool {
        let backoff = Backoff::new();
        for _ in 0..self.settings.shadow_spin_limit {
            if region.is_ready() {
                return true;
            }
            backoff.snooze();
        }
        region.is_ready()
    }

    // === Finish ===

    /// Publish new tops, move humongous objects, restore marks, end the cycle
    pub fn finish(
        &self,
        forwarding: &mut Forwarding,
        plan: &CompactionPlan,
        humongous: &[HumongousMove],
        free_before: usize,
    ) -> CompactOutcome {
        let heap = self.heap;

        for &index in &plan.compacting {
            let region = heap.region(index);
            let top = region.compaction_top();
            if top == region.bottom() {
                heap.free_region(index);
            } else {
                region.set_top(top);
            }
        }

        let humongous_words =
            apply_humongous_moves(heap, humongous, !forwarding.overwrites_header());
        self.preserved.restore(heap.memory());

        let mut released_bytes = 0;
        if self.settings.release_free_regions {
            for region in heap.regions().iter().filter(|r| r.is_free()) {
                released_bytes += heap
                    .memory()
                    .release(region.bottom(), region.end() - region.bottom());
            }
        }

        for region in heap.regions().iter().filter(|r| r.is_compacting()) {
            region.end_compaction();
        }
        self.bitmap.clear();
        forwarding.end();
        self.preserved.clear();

        CompactOutcome {
            moved_objects: self.copier.objects_copied() + humongous.len(),
            moved_words: self.copier.words_copied() + humongous_words,
            grown_objects: self.copier.grown_objects()
                + humongous.iter().filter(|m| m.grown()).count(),
            shadow_regions: self.shadows.load(Ordering::Relaxed),
            humongous_words,
            freed_regions: heap.free_region_count().saturating_sub(free_before),
            released_bytes,
        }
    }
}
