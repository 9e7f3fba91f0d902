//! Forwarding Module - Old Address to New Address
//!
//! Four encodings of the forwarding relation, behind one facade:
//!
//! | Mode      | Where the target lives            | Header overwritten |
//! |-----------|-----------------------------------|--------------------|
//! | `Header`  | mark word, full pointer           | yes                |
//! | `Sliding` | mark word, slot bit + offset      | low bits only      |
//! | `Hashed`  | concurrent hash table             | lock bits only     |
//! | `Dense`   | per-region open-addressing tables | no                 |
//!
//! The mode is picked once from `CompactConfig` and never changes while a
//! driver lives. Every compaction algorithm talks to `Forwarding` only.
//!
//! Lifetime per cycle:
//! ```text
//! begin ─▶ [reserve | begin_region]* ─▶ forward_to* ─▶ forwardee* ─▶ end
//! ```

pub mod dense;
pub mod header;
pub mod sliding;
pub mod table;

pub use dense::{DenseForwarding, RegionForwardingTable};
pub use header::HeaderForwarding;
pub use sliding::SlidingForwarding;
pub use table::{ForwardTable, HashedForwarding, InsertOutcome};

use crate::config::{CompactConfig, ForwardingMode};
use crate::heap::{HeapLayout, HeapMemory};
use crate::object::MarkWord;

/// Diagnostics of the active encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardingStats {
    /// Side-table entries, or claimed sliding base slots
    pub entries: usize,

    /// Longest dense-table slot scan
    pub max_scan: usize,

    /// Hash table grows this cycle
    pub grows: usize,
}

/// Forwarding - the active forwarding encoding
pub enum Forwarding {
    Header(HeaderForwarding),
    Sliding(SlidingForwarding),
    Hashed(HashedForwarding),
    Dense(DenseForwarding),
}

impl Forwarding {
    /// Build the encoding `config` asks for over `layout`
    pub fn select(config: &CompactConfig, layout: &HeapLayout) -> Self {
        match config.forwarding_mode() {
            ForwardingMode::Header => Forwarding::Header(HeaderForwarding::new()),
            ForwardingMode::Sliding => Forwarding::Sliding(SlidingForwarding::new(layout)),
            ForwardingMode::Hashed => Forwarding::Hashed(HashedForwarding::new()),
            ForwardingMode::Dense => {
                Forwarding::Dense(DenseForwarding::new(layout, config.dense_load_factor))
            },
        }
    }

    pub fn mode(&self) -> ForwardingMode {
        match self {
            Forwarding::Header(_) => ForwardingMode::Header,
            Forwarding::Sliding(_) => ForwardingMode::Sliding,
            Forwarding::Hashed(_) => ForwardingMode::Hashed,
            Forwarding::Dense(_) => ForwardingMode::Dense,
        }
    }

    /// Whether installing a forwarding clobbers mark word state
    ///
    /// Encodings that do must have locked and hashed marks preserved.
    pub fn overwrites_header(&self) -> bool {
        !matches!(self, Forwarding::Dense(_))
    }

    /// Distinct destination regions one source region may forward into
    pub fn destinations_per_region(&self) -> Option<usize> {
        match self {
            Forwarding::Sliding(_) => Some(sliding::BASES_PER_REGION),
            _ => None,
        }
    }

    /// Start a cycle: drop every side structure from the previous one
    pub fn begin(&mut self) {
        match self {
            Forwarding::Header(_) => {},
            Forwarding::Sliding(f) => f.begin(),
            Forwarding::Hashed(f) => f.begin(),
            Forwarding::Dense(f) => f.begin(),
        }
    }

    pub fn end(&mut self) {
        match self {
            Forwarding::Header(_) => {},
            Forwarding::Sliding(f) => f.end(),
            Forwarding::Hashed(f) => f.end(),
            Forwarding::Dense(f) => f.end(),
        }
    }

    /// Size side storage for `entries` forwardings; hashed mode only
    pub fn reserve(&mut self, entries: usize) {
        if let Forwarding::Hashed(f) = self {
            f.reserve(entries);
        }
    }

    /// Announce `expected` forwardings out of region `index`; dense mode only
    pub fn begin_region(&self, index: usize, expected: usize) {
        if let Forwarding::Dense(f) = self {
            f.begin_region(index, expected);
        }
    }

    /// Apply a pending hash table grow; call between phases
    pub fn grow_if_requested(&mut self) -> bool {
        match self {
            Forwarding::Hashed(f) => f.grow_if_requested(),
            _ => false,
        }
    }

    #[inline]
    pub fn is_forwarded(&self, memory: &HeapMemory, obj: usize) -> bool {
        match self {
            Forwarding::Header(f) => f.is_forwarded(memory, obj),
            Forwarding::Sliding(f) => f.is_forwarded(memory, obj),
            Forwarding::Hashed(f) => f.is_forwarded(memory, obj),
            Forwarding::Dense(f) => f.is_forwarded(obj),
        }
    }

    /// New address of `obj`, `None` if it does not move
    #[inline]
    pub fn forwardee(&self, memory: &HeapMemory, obj: usize) -> Option<usize> {
        match self {
            Forwarding::Header(f) => f.forwardee(memory, obj),
            Forwarding::Sliding(f) => f.forwardee(memory, obj),
            Forwarding::Hashed(f) => f.forwardee(memory, obj),
            Forwarding::Dense(f) => f.forwardee(obj),
        }
    }

    #[inline]
    pub fn forward_to(&self, memory: &HeapMemory, obj: usize, target: usize) {
        match self {
            Forwarding::Header(f) => f.forward_to(memory, obj, target),
            Forwarding::Sliding(f) => f.forward_to(memory, obj, target),
            Forwarding::Hashed(f) => f.forward_to(memory, obj, target),
            Forwarding::Dense(f) => f.forward_to(obj, target),
        }
    }

    pub fn forward_to_self(&self, memory: &HeapMemory, obj: usize) {
        match self {
            Forwarding::Header(f) => f.forward_to_self(memory, obj),
            Forwarding::Sliding(f) => f.forward_to_self(memory, obj),
            Forwarding::Hashed(f) => f.forward_to_self(memory, obj),
            Forwarding::Dense(f) => f.forward_to_self(obj),
        }
    }

    /// Forward unless someone else already did
    ///
    /// `compare` is the mark the caller observed. Returns `None` if this call
    /// installed `target`, otherwise the winner's target.
    pub fn forward_to_atomic(
        &self,
        memory: &HeapMemory,
        obj: usize,
        target: usize,
        compare: MarkWord,
    ) -> Option<usize> {
        match self {
            Forwarding::Header(f) => f.forward_to_atomic(memory, obj, target, compare),
            Forwarding::Sliding(f) => f.forward_to_atomic(memory, obj, target, compare),
            Forwarding::Hashed(f) => f.forward_to_atomic(memory, obj, target, compare),
            Forwarding::Dense(f) => f.forward_to_atomic(obj, target),
        }
    }

    pub fn forward_to_self_atomic(
        &self,
        memory: &HeapMemory,
        obj: usize,
        compare: MarkWord,
    ) -> Option<usize> {
        match self {
            Forwarding::Header(f) => f.forward_to_self_atomic(memory, obj, compare),
            Forwarding::Sliding(f) => f.forward_to_self_atomic(memory, obj, compare),
            Forwarding::Hashed(f) => f.forward_to_self_atomic(memory, obj, compare),
            Forwarding::Dense(f) => f.forward_to_atomic(obj, obj),
        }
    }

    pub fn stats(&self) -> ForwardingStats {
        match self {
            Forwarding::Header(_) => ForwardingStats::default(),
            Forwarding::Sliding(f) => ForwardingStats {
                entries: f.claimed_slots(),
                ..Default::default()
            },
            Forwarding::Hashed(f) => ForwardingStats {
                entries: f.table().len(),
                grows: f.grows(),
                ..Default::default()
            },
            Forwarding::Dense(f) => ForwardingStats {
                entries: f.len(),
                max_scan: f.max_scan(),
                ..Default::default()
            },
        }
    }
}

impl std::fmt::Debug for Forwarding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Forwarding({})", self.mode())
    }
}
