//! Sliding Forwarding
//!
//! Compact headers keep the class id in the upper half of the mark word, so a
//! full forwarding pointer does not fit. Sliding compaction moves the objects
//! of one source region into at most two destination regions (the tail of the
//! previous destination and the next one), which lets the mark word store only
//! a slot selector and an offset:
//!
//! ```text
//!  63        32 31          9  8   7  6   4   3    2   1 0
//! ┌────────────┬─────────────┬───┬───┬─────┬─────┬───┬─────┐
//! │ class id   │ word offset │exp│ h │  0  │ alt │ 0 │ 11  │
//! └────────────┴─────────────┴───┴───┴─────┴─────┴───┴─────┘
//!
//! bases[2 * source_region + alt] = base address of the destination region
//! target = bases[...] + offset * 8
//! ```
//!
//! # Precondition
//!
//! Every source region forwards into at most `BASES_PER_REGION` distinct
//! destination regions per cycle. A third one is a fatal error. The
//! compaction point enforces the bound: once a source region has used both
//! bases, its remaining objects stay where they are. Other callers must
//! guarantee the same property.

use crate::heap::{HeapLayout, HeapMemory};
use crate::object::header::MARKED_VALUE;
use crate::object::MarkWord;
use crate::LOG_WORD_SIZE;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Destination regions one source region may forward into
pub const BASES_PER_REGION: usize = 2;

/// Bits of the word offset field
pub const OFFSET_BITS: u32 = 23;
pub const OFFSET_SHIFT: u32 = 9;
const OFFSET_MASK: usize = ((1 << OFFSET_BITS) - 1) << OFFSET_SHIFT;

/// Selects the second base slot of the source region
const ALT_REGION_BIT: usize = 1 << 3;

/// Low bits owned by the encoding: lock, self-forwarded, age/alt
const LOW_BITS_MASK: usize = 0b111_1111;

/// Every mark bit a forwarding encoding overwrites
const ENCODED_MASK: usize = LOW_BITS_MASK | OFFSET_MASK;

const UNUSED_BASE: usize = usize::MAX;

/// SlidingForwarding - two remembered destination bases per region
pub struct SlidingForwarding {
    heap_base: usize,
    region_shift_bytes: u32,
    region_size_shift: u32,
    num_regions: usize,
    bases: Vec<AtomicUsize>,
}

impl SlidingForwarding {
    pub fn new(layout: &HeapLayout) -> Self {
        crate::guarantee!(
            layout.region_size_shift() <= OFFSET_BITS,
            "regions of 2^{} words do not fit the {}-bit sliding offset",
            layout.region_size_shift(),
            OFFSET_BITS
        );
        Self {
            heap_base: layout.base(),
            region_shift_bytes: layout.region_shift_bytes(),
            region_size_shift: layout.region_size_shift(),
            num_regions: layout.num_regions(),
            bases: (0..layout.num_regions() * BASES_PER_REGION)
                .map(|_| AtomicUsize::new(UNUSED_BASE))
                .collect(),
        }
    }

    /// Forget every remembered base
    pub fn begin(&self) {
        for base in &self.bases {
            base.store(UNUSED_BASE, Ordering::Relaxed);
        }
    }

    pub fn end(&self) {
        self.begin();
    }

    /// Number of claimed base slots
    pub fn claimed_slots(&self) -> usize {
        self.bases
            .iter()
            .filter(|b| b.load(Ordering::Relaxed) != UNUSED_BASE)
            .count()
    }

    #[inline]
    fn region_index(&self, addr: usize) -> usize {
        let index = (addr - self.heap_base) >> self.region_shift_bytes;
        debug_assert!(index < self.num_regions, "address {:#x} outside heap", addr);
        index
    }

    #[inline]
    fn region_base(&self, addr: usize) -> usize {
        self.heap_base + (self.region_index(addr) << self.region_shift_bytes)
    }

    /// Find or claim the slot of `original`'s region that holds `target_base`
    fn claim_slot(&self, original: usize, target_base: usize) -> usize {
        let first = self.region_index(original) * BASES_PER_REGION;
        for slot in 0..BASES_PER_REGION {
            let cell = &self.bases[first + slot];
            let current = cell.load(Ordering::Acquire);
            if current == target_base {
                return slot;
            }
            if current == UNUSED_BASE {
                match cell.compare_exchange(
                    UNUSED_BASE,
                    target_base,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return slot,
                    Err(witness) if witness == target_base => return slot,
                    Err(_) => continue,
                }
            }
        }
        crate::fatal!(
            "region {} already forwards into {:#x} and {:#x}, cannot add {:#x}",
            self.region_index(original),
            self.bases[first].load(Ordering::Relaxed),
            self.bases[first + 1].load(Ordering::Relaxed),
            target_base
        )
    }

    /// Encoded forwarding bits for `original -> target`
    ///
    /// Only bits covered by the encoding are set; the caller merges them into
    /// the rest of the mark word.
    pub fn encode(&self, original: usize, target: usize) -> usize {
        let target_base = self.region_base(target);
        let slot = self.claim_slot(original, target_base);
        let offset = (target - target_base) >> LOG_WORD_SIZE;
        debug_assert!(offset < (1 << self.region_size_shift));
        let alt = if slot == 1 { ALT_REGION_BIT } else { 0 };
        (offset << OFFSET_SHIFT) | alt | MARKED_VALUE
    }

    /// Target encoded in `encoded` for an object at `original`
    pub fn decode(&self, original: usize, encoded: usize) -> usize {
        let slot = usize::from(encoded & ALT_REGION_BIT != 0);
        let base = self.bases[self.region_index(original) * BASES_PER_REGION + slot].load(Ordering::Acquire);
        crate::guarantee!(
            base != UNUSED_BASE,
            "object {:#x} decodes through unclaimed slot {}",
            original,
            slot
        );
        base + (((encoded & OFFSET_MASK) >> OFFSET_SHIFT) << LOG_WORD_SIZE)
    }

    #[inline]
    fn merge(&self, mark: MarkWord, original: usize, target: usize) -> MarkWord {
        MarkWord::from_raw((mark.raw() & !ENCODED_MASK) | self.encode(original, target))
    }

    #[inline]
    fn decode_mark(&self, mark: MarkWord, obj: usize) -> Option<usize> {
        if !mark.is_forwarded() {
            None
        } else if mark.is_self_forwarded() {
            Some(obj)
        } else {
            Some(self.decode(obj, mark.raw()))
        }
    }

    #[inline]
    pub fn is_forwarded(&self, memory: &HeapMemory, obj: usize) -> bool {
        memory.load_mark(obj).is_forwarded()
    }

    #[inline]
    pub fn forwardee(&self, memory: &HeapMemory, obj: usize) -> Option<usize> {
        self.decode_mark(memory.load_mark(obj), obj)
    }

    pub fn forward_to(&self, memory: &HeapMemory, obj: usize, target: usize) {
        let mark = memory.load_mark(obj);
        memory.store_mark(obj, self.merge(mark, obj, target));
    }

    pub fn forward_to_self(&self, memory: &HeapMemory, obj: usize) {
        let mark = memory.load_mark(obj);
        memory.store_mark(obj, mark.self_forwarded());
    }

    /// CAS the encoded forwarding over `compare`
    ///
    /// `None` if installed, otherwise the target already installed.
    pub fn forward_to_atomic(
        &self,
        memory: &HeapMemory,
        obj: usize,
        target: usize,
        compare: MarkWord,
    ) -> Option<usize> {
        let new = self.merge(compare, obj, target);
        self.settle(memory.cas_mark(obj, compare, new), obj)
    }

    pub fn forward_to_self_atomic(
        &self,
        memory: &HeapMemory,
        obj: usize,
        compare: MarkWord,
    ) -> Option<usize> {
        self.settle(memory.cas_mark(obj, compare, compare.self_forwarded()), obj)
    }

    fn settle(&self, outcome: Result<MarkWord, MarkWord>, obj: usize) -> Option<usize> {
        match outcome {
            Ok(_) => None,
            Err(witness) => {
                crate::guarantee!(
                    witness.is_forwarded(),
                    "object {:#x} changed under forwarding but is not forwarded: {:?}",
                    obj,
                    witness
                );
                self.decode_mark(witness, obj)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: usize = 0x100_0000;

    /// 8 regions of 16 words
    fn layout() -> HeapLayout {
        HeapLayout::new(BASE, 4, 8)
    }

    fn region(i: usize) -> usize {
        BASE + i * 16 * 8
    }

    #[test]
    fn test_round_trip_every_word_into_two_regions() {
        let fwd = SlidingForwarding::new(&layout());
        for src in 0..8usize {
            fwd.begin();
            let dests = [src, src.saturating_sub(1)];
            for word in 0..16 {
                let original = region(src) + word * 8;
                for &dest in &dests {
                    for offset in [0, 1, 7, 15] {
                        let target = region(dest) + offset * 8;
                        let encoded = fwd.encode(original, target);
                        assert_eq!(fwd.decode(original, encoded), target);
                        assert!(MarkWord::from_raw(encoded).is_forwarded());
                        assert!(!MarkWord::from_raw(encoded).is_self_forwarded());
                    }
                }
            }
        }
    }

    #[test]
    fn test_region_boundary_targets() {
        let fwd = SlidingForwarding::new(&layout());
        let original = region(3) + 8;
        // first word, last word, first word of the next region
        for target in [region(2), region(3) - 8, region(3)] {
            let encoded = fwd.encode(original, target);
            assert_eq!(fwd.decode(original, encoded), target);
        }
        assert_eq!(fwd.claimed_slots(), 2);
    }

    #[test]
    fn test_encoding_keeps_class_and_hash_bits() {
        let mem = HeapMemory::reserve(8 * 16 * 8).unwrap();
        let fwd = SlidingForwarding::new(&HeapLayout::new(mem.base(), 4, 8));
        let obj = mem.base() + 3 * 128 + 40;
        let target = mem.base() + 128 + 8;

        let mark = MarkWord::prototype_with_class(77).with_hashed().with_hash_expanded();
        mem.store_mark(obj, mark);
        fwd.forward_to(&mem, obj, target);

        let forwarded = mem.load_mark(obj);
        assert!(forwarded.is_forwarded());
        assert_eq!(forwarded.class_id(), 77);
        assert!(forwarded.is_hashed());
        assert!(forwarded.is_hash_expanded());
        assert_eq!(fwd.forwardee(&mem, obj), Some(target));
    }

    #[test]
    fn test_atomic_race_returns_winner() {
        let mem = HeapMemory::reserve(8 * 16 * 8).unwrap();
        let fwd = SlidingForwarding::new(&HeapLayout::new(mem.base(), 4, 8));
        let obj = mem.base() + 2 * 128;
        let proto = MarkWord::prototype_with_class(1);
        mem.store_mark(obj, proto);

        assert_eq!(fwd.forward_to_atomic(&mem, obj, mem.base(), proto), None);
        assert_eq!(
            fwd.forward_to_atomic(&mem, obj, mem.base() + 128, proto),
            Some(mem.base())
        );

        let other = mem.base() + 5 * 128;
        mem.store_mark(other, proto);
        assert_eq!(fwd.forward_to_self_atomic(&mem, other, proto), None);
        assert!(fwd.is_forwarded(&mem, other));
        assert_eq!(fwd.forwardee(&mem, other), Some(other));
    }

    #[test]
    #[should_panic(expected = "cannot add")]
    fn test_third_destination_region_is_fatal() {
        let fwd = SlidingForwarding::new(&layout());
        let original = region(5);
        fwd.encode(original, region(0));
        fwd.encode(original, region(1));
        fwd.encode(original, region(2));
    }
}
