//! Region Implementation - Unit of Compaction
//!
//! A region is a fixed-size, aligned slice of the heap. Allocation bumps
//! `top`; compaction plans into `compaction_top` and publishes it back into
//! `top` once the objects have landed.
//!
//! Region Kinds:
//! - Free: no objects, available for allocation or as a humongous target
//! - Regular: bump-allocated ordinary objects
//! - HumongousStart / HumongousContinues: one object spanning several regions
//!
//! Per-cycle state:
//! ```text
//!  plan            forward               compact
//!  ────▶ compacting ────▶ compaction_top ────▶ ready ──▶ top = compaction_top
//! ```
//!
//! # Memory Ordering Model
//!
//! - `top` uses CAS with `AcqRel` for lock-free bump allocation.
//! - `compaction_top`, `kind` and `compacting` are written between phase
//!   barriers only; `Relaxed`/`Release` is enough because worker scopes join.
//! - `ready` is published with `Release` under the shadow lock so workers that
//!   observe it with `Acquire` also observe the evacuated contents.

use crate::compact::shadow::ShadowRegion;
use crate::LOG_WORD_SIZE;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

/// Region kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegionKind {
    Free = 0,
    Regular = 1,
    HumongousStart = 2,
    HumongousContinues = 3,
}

impl RegionKind {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RegionKind::Free,
            1 => RegionKind::Regular,
            2 => RegionKind::HumongousStart,
            _ => RegionKind::HumongousContinues,
        }
    }

    pub fn is_humongous(&self) -> bool {
        matches!(
            self,
            RegionKind::HumongousStart | RegionKind::HumongousContinues
        )
    }
}

/// HeapRegion - one cell of the region grid
pub struct HeapRegion {
    /// Index in the region table
    index: usize,

    /// First word of the region
    bottom: usize,

    /// End address (exclusive)
    end: usize,

    /// Bump pointer for allocation; end of the parsable part of the region
    top: AtomicUsize,

    /// Next free slide-destination address during a compaction cycle
    compaction_top: AtomicUsize,

    /// Current `RegionKind`
    kind: AtomicU8,

    /// Region takes part in the current compaction (source and destination)
    compacting: AtomicBool,

    /// All live data that has to leave this region has left
    ready: AtomicBool,

    /// Shadow copies waiting for this region to become ready
    pending_shadows: Mutex<Vec<ShadowRegion>>,
}

impl HeapRegion {
    /// Create a free region covering `[bottom, end)`
    pub fn new(index: usize, bottom: usize, end: usize) -> Self {
        Self {
            index,
            bottom,
            end,
            top: AtomicUsize::new(bottom),
            compaction_top: AtomicUsize::new(bottom),
            kind: AtomicU8::new(RegionKind::Free as u8),
            compacting: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            pending_shadows: Mutex::new(Vec::new()),
        }
    }

    // === Geometry ===

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn bottom(&self) -> usize {
        self.bottom
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.bottom && addr < self.end
    }

    #[inline]
    pub fn capacity_words(&self) -> usize {
        (self.end - self.bottom) >> LOG_WORD_SIZE
    }

    // === Allocation ===

    #[inline]
    pub fn top(&self) -> usize {
        self.top.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_top(&self, top: usize) {
        debug_assert!(top >= self.bottom && top <= self.end);
        self.top.store(top, Ordering::Release);
    }

    #[inline]
    pub fn used_words(&self) -> usize {
        (self.top() - self.bottom) >> LOG_WORD_SIZE
    }

    #[inline]
    pub fn free_words(&self) -> usize {
        (self.end - self.top()) >> LOG_WORD_SIZE
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.top() == self.bottom
    }

    /// Bump-allocate `words` words
    ///
    /// Returns `None` when the region does not have room.
    pub fn allocate(&self, words: usize) -> Option<usize> {
        let bytes = words << LOG_WORD_SIZE;
        let mut current = self.top.load(Ordering::Acquire);
        loop {
            let new_top = current.checked_add(bytes)?;
            if new_top > self.end {
                return None;
            }
            match self.top.compare_exchange_weak(
                current,
                new_top,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(current),
                Err(actual) => current = actual,
            }
        }
    }

    // === Kind ===

    #[inline]
    pub fn kind(&self) -> RegionKind {
        RegionKind::from_u8(self.kind.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_kind(&self, kind: RegionKind) {
        self.kind.store(kind as u8, Ordering::Release);
    }

    /// Atomically move from `expected` to `new`; false if the kind changed meanwhile
    pub fn transition_kind(&self, expected: RegionKind, new: RegionKind) -> bool {
        self.kind
            .compare_exchange(expected as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.kind() == RegionKind::Free
    }

    #[inline]
    pub fn is_humongous(&self) -> bool {
        self.kind().is_humongous()
    }

    /// Give the region back: kind Free, top at bottom
    pub fn make_free(&self) {
        self.set_kind(RegionKind::Free);
        self.set_top(self.bottom);
        self.compaction_top.store(self.bottom, Ordering::Relaxed);
    }

    // === Compaction state ===

    #[inline]
    pub fn compaction_top(&self) -> usize {
        self.compaction_top.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_compaction_top(&self, top: usize) {
        debug_assert!(
            top >= self.bottom && top <= self.end,
            "compaction top {:#x} outside region {}",
            top,
            self.index
        );
        self.compaction_top.store(top, Ordering::Release);
    }

    #[inline]
    pub fn is_compacting(&self) -> bool {
        self.compacting.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_compacting(&self, compacting: bool) {
        self.compacting.store(compacting, Ordering::Release);
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Prepare for a new cycle as a compaction source and destination
    pub fn begin_compaction(&self) {
        self.compaction_top.store(self.bottom, Ordering::Release);
        self.compacting.store(true, Ordering::Release);
        self.ready.store(false, Ordering::Release);
    }

    /// Drop all per-cycle state
    pub fn end_compaction(&self) {
        self.compacting.store(false, Ordering::Release);
        self.ready.store(false, Ordering::Release);
        self.compaction_top.store(self.bottom, Ordering::Release);
        debug_assert!(self.pending_shadows.lock().is_empty());
    }

    /// Hand a shadow copy to this region
    ///
    /// Returns the shadow back if the region became ready in the meantime;
    /// the caller must then flush it itself.
    pub fn offer_shadow(&self, shadow: ShadowRegion) -> Option<ShadowRegion> {
        let mut pending = self.pending_shadows.lock();
        if self.ready.load(Ordering::Acquire) {
            return Some(shadow);
        }
        pending.push(shadow);
        None
    }

    /// Mark the region ready and take every shadow copy offered so far
    pub fn mark_ready(&self) -> Vec<ShadowRegion> {
        let mut pending = self.pending_shadows.lock();
        self.ready.store(true, Ordering::Release);
        std::mem::take(&mut *pending)
    }
}

impl std::fmt::Debug for HeapRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapRegion")
            .field("index", &self.index)
            .field("bottom", &format_args!("{:#x}", self.bottom))
            .field("top", &format_args!("{:#x}", self.top()))
            .field("end", &format_args!("{:#x}", self.end))
            .field("kind", &self.kind())
            .field("compacting", &self.is_compacting())
            .finish()
    }
}
