//! Adjust Phase - Rewrite References to Forwardees
//!
//! Runs after every forwarding is known and before any object moves, so each
//! live object is still at its old address with its old header readable.
//! Every reference slot of every live object, every root and every
//! preserved-mark owner is rewritten to its referent's new address.
//!
//! The forwarding lookup is passed in as a function so the same walk serves
//! the region compactor (forwarding facade) and the serial compactor (block
//! offset table).

use super::task::TaskQueue;
use crate::heap::{Heap, RegionKind};
use crate::marker::{LivenessBitmap, RootSet};
use crate::object::{ObjectModel, PreservedMarks};
use std::sync::atomic::{AtomicUsize, Ordering};

/// New address of a referent, `None` if it stays where it is
pub type ForwardeeFn<'a> = dyn Fn(usize) -> Option<usize> + Sync + 'a;

/// Rewrite the reference slots of all live objects
///
/// Returns the number of slots that changed.
pub fn adjust_heap(
    heap: &Heap,
    model: &dyn ObjectModel,
    bitmap: &LivenessBitmap,
    workers: usize,
    forwardee: &ForwardeeFn<'_>,
) -> usize {
    let tasks: TaskQueue<usize> = heap
        .regions()
        .iter()
        .filter(|r| r.kind() != RegionKind::Free && !r.is_empty())
        .map(|r| r.index())
        .collect();
    let updated = AtomicUsize::new(0);

    tasks.run_stealing(workers, |_, index| {
        let region = heap.region(index);
        let mut local = 0;
        for obj in bitmap.marked_in(region.bottom(), region.top()) {
            local += adjust_object(heap, model, obj, forwardee);
        }
        updated.fetch_add(local, Ordering::Relaxed);
    });

    updated.into_inner()
}

/// Rewrite the reference slots of one object
pub fn adjust_object(
    heap: &Heap,
    model: &dyn ObjectModel,
    obj: usize,
    forwardee: &ForwardeeFn<'_>,
) -> usize {
    let memory = heap.memory();
    let mut updated = 0;
    model.for_each_reference(heap, obj, &mut |slot| {
        let referent = memory.load(slot);
        if referent == 0 || !heap.contains(referent) {
            return;
        }
        if let Some(new) = forwardee(referent) {
            if new != referent {
                memory.store(slot, new);
                updated += 1;
            }
        }
    });
    updated
}

/// Rewrite roots and preserved-mark owners
pub fn adjust_roots(
    heap: &Heap,
    roots: &RootSet,
    preserved: &PreservedMarks,
    forwardee: &ForwardeeFn<'_>,
) {
    roots.update_all(|root| {
        if root == 0 || !heap.contains(root) {
            return root;
        }
        forwardee(root).unwrap_or(root)
    });
    preserved.adjust(|owner| forwardee(owner));
}
