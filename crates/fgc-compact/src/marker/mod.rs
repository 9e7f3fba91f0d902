//! Marker Module - Liveness for Compaction
//!
//! The compaction core consumes liveness through a `MarkingOracle`: given the
//! heap, an object model and the roots, fill a `LivenessBitmap`. The crate
//! ships `TracingMarker`, a single-threaded grey-stack tracer, so cycles can
//! be driven end to end; embedders with their own marker implement the trait.
//!
//! Marking Algorithm (TracingMarker):
//! - Push every root that points into the heap
//! - Pop, mark start and words in the bitmap, push unmarked referents
//! - Stop when the grey stack is empty

pub mod bitmap;
pub mod roots;

pub use bitmap::{LivenessBitmap, MarkedObjects};
pub use roots::{RootHandle, RootSet};

use crate::heap::Heap;
use crate::object::ObjectModel;

/// Totals reported by a marking pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkSummary {
    pub live_objects: usize,
    pub live_words: usize,
}

/// Source of liveness information
pub trait MarkingOracle: Send + Sync {
    /// Mark every object reachable from `roots` into `bitmap`
    ///
    /// The bitmap is clear on entry.
    fn mark(
        &self,
        heap: &Heap,
        model: &dyn ObjectModel,
        roots: &RootSet,
        bitmap: &LivenessBitmap,
    ) -> MarkSummary;
}

/// TracingMarker - depth-first transitive closure from the roots
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMarker;

impl TracingMarker {
    pub fn new() -> Self {
        TracingMarker
    }

    fn push_if_unmarked(
        heap: &Heap,
        model: &dyn ObjectModel,
        bitmap: &LivenessBitmap,
        grey: &mut Vec<usize>,
        summary: &mut MarkSummary,
        object: usize,
    ) {
        if object == 0 {
            return;
        }
        if !heap.contains(object) {
            log::warn!("skipping reference {:#x} outside the heap", object);
            return;
        }
        let size = model.size_in_words(heap, object);
        if bitmap.mark_object(object, size) {
            summary.live_objects += 1;
            summary.live_words += size;
            grey.push(object);
        }
    }
}

impl MarkingOracle for TracingMarker {
    fn mark(
        &self,
        heap: &Heap,
        model: &dyn ObjectModel,
        roots: &RootSet,
        bitmap: &LivenessBitmap,
    ) -> MarkSummary {
        let mut summary = MarkSummary::default();
        let mut grey = Vec::new();

        roots.for_each(|root| {
            Self::push_if_unmarked(heap, model, bitmap, &mut grey, &mut summary, root);
        });

        while let Some(object) = grey.pop() {
            let mut referents = Vec::new();
            model.for_each_reference(heap, object, &mut |slot| {
                referents.push(heap.memory().load(slot));
            });
            for referent in referents {
                Self::push_if_unmarked(heap, model, bitmap, &mut grey, &mut summary, referent);
            }
        }

        log::debug!(
            "Marking found {} live objects ({} words)",
            summary.live_objects,
            summary.live_words
        );
        summary
    }
}
