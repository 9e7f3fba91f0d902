//! Dense Per-Region Forwarding Tables
//!
//! Each compacting region gets an open-addressing table sized once, from the
//! exact live-object count the plan phase computed for it. Headers are never
//! touched, so no marks need preserving.
//!
//! ```text
//! region:  |a    b  c       d      |        home(x) = word_offset(x) * cap / region_words
//! table:   [a][b][c][ ][d][ ][ ][ ]         linear probing, mask = cap - 1
//! ```
//!
//! The home slot is monotonic in the address, so objects inserted in address
//! order land in consecutive slots. The table remembers the last in-order
//! insert and starts the next one right after it instead of re-walking the
//! occupied run.
//!
//! There is no resize path. Inserting more than the announced count, or
//! filling every slot, is fatal.

use crate::heap::HeapLayout;
use crate::LOG_WORD_SIZE;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

const EMPTY: usize = 0;

struct Slot {
    from: AtomicUsize,
    to: AtomicUsize,
}

/// RegionForwardingTable - forwarding pairs of one region
pub struct RegionForwardingTable {
    bottom: usize,
    region_words: usize,
    expected: usize,
    slots: Vec<Slot>,
    mask: usize,
    len: AtomicUsize,

    /// Last address inserted in increasing order, `EMPTY` before the first
    last_addr: AtomicUsize,
    last_slot: AtomicUsize,

    max_scan: AtomicUsize,
}

impl RegionForwardingTable {
    /// Table for up to `expected` objects of the region at `bottom`
    pub fn new(bottom: usize, region_words: usize, expected: usize, load_factor: f64) -> Self {
        let capacity = ((expected as f64 / load_factor).ceil() as usize)
            .max(expected + 1)
            .next_power_of_two();
        Self {
            bottom,
            region_words,
            expected,
            slots: (0..capacity)
                .map(|_| Slot {
                    from: AtomicUsize::new(EMPTY),
                    to: AtomicUsize::new(EMPTY),
                })
                .collect(),
            mask: capacity - 1,
            len: AtomicUsize::new(0),
            last_addr: AtomicUsize::new(EMPTY),
            last_slot: AtomicUsize::new(0),
            max_scan: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Longest slot scan seen by an insert
    pub fn max_scan(&self) -> usize {
        self.max_scan.load(Ordering::Relaxed)
    }

    #[inline]
    fn home(&self, addr: usize) -> usize {
        let word = (addr - self.bottom) >> LOG_WORD_SIZE;
        debug_assert!(word < self.region_words);
        (word * self.slots.len()) / self.region_words
    }

    /// Target recorded for `from`
    pub fn lookup(&self, from: usize) -> Option<usize> {
        let home = self.home(from);
        for step in 0..self.slots.len() {
            let slot = &self.slots[(home + step) & self.mask];
            match slot.from.load(Ordering::Acquire) {
                EMPTY => return None,
                found if found == from => return Some(slot.to.load(Ordering::Acquire)),
                _ => {}
            }
        }
        None
    }

    /// Record `from -> to`
    ///
    /// Single writer per table. An address already present gets its target
    /// replaced.
    pub fn insert(&self, from: usize, to: usize) {
        let home = self.home(from);
        let last_addr = self.last_addr.load(Ordering::Relaxed);
        let last_slot = self.last_slot.load(Ordering::Relaxed);
        let in_order = last_addr == EMPTY || from > last_addr;

        // every slot in [home(last_addr), last_slot] is occupied by an
        // address below `from`, so in-order inserts can skip that run
        let start = if last_addr != EMPTY && from > last_addr && home <= last_slot {
            last_slot + 1
        } else {
            home
        };

        for step in 0..self.slots.len() {
            let index = (start + step) & self.mask;
            let slot = &self.slots[index];
            let current = slot.from.load(Ordering::Relaxed);
            if current == from {
                slot.to.store(to, Ordering::Release);
                return;
            }
            if current == EMPTY {
                let len = self.len.load(Ordering::Relaxed);
                crate::guarantee!(
                    len < self.expected,
                    "forwarding table of region at {:#x} overflowed: {} entries announced",
                    self.bottom,
                    self.expected
                );
                slot.to.store(to, Ordering::Relaxed);
                slot.from.store(from, Ordering::Release);
                self.len.store(len + 1, Ordering::Relaxed);

                let scan = (index.wrapping_sub(home) & self.mask) + 1;
                self.max_scan.fetch_max(scan, Ordering::Relaxed);
                if in_order {
                    self.last_addr.store(from, Ordering::Relaxed);
                    self.last_slot.store(index, Ordering::Relaxed);
                }
                return;
            }
        }
        crate::fatal!(
            "forwarding table of region at {:#x} is full ({} slots)",
            self.bottom,
            self.slots.len()
        )
    }
}

/// DenseForwarding - one `RegionForwardingTable` per compacting region
pub struct DenseForwarding {
    layout: HeapLayout,
    load_factor: f64,
    tables: Vec<OnceLock<RegionForwardingTable>>,
}

impl DenseForwarding {
    pub fn new(layout: &HeapLayout, load_factor: f64) -> Self {
        Self {
            layout: *layout,
            load_factor,
            tables: Self::fresh_tables(layout.num_regions()),
        }
    }

    fn fresh_tables(count: usize) -> Vec<OnceLock<RegionForwardingTable>> {
        (0..count).map(|_| OnceLock::new()).collect()
    }

    /// Drop every region table
    pub fn begin(&mut self) {
        self.tables = Self::fresh_tables(self.layout.num_regions());
    }

    pub fn end(&mut self) {
        self.begin();
    }

    /// Allocate the table of region `index` for `expected` objects
    pub fn begin_region(&self, index: usize, expected: usize) {
        let table = RegionForwardingTable::new(
            self.layout.region_bottom(index),
            self.layout.region_words(),
            expected,
            self.load_factor,
        );
        if self.tables[index].set(table).is_err() {
            crate::fatal!("forwarding table of region {} created twice", index);
        }
    }

    #[inline]
    fn table_of(&self, addr: usize) -> Option<&RegionForwardingTable> {
        self.tables[self.layout.region_index_of(addr)].get()
    }

    pub fn region_table(&self, index: usize) -> Option<&RegionForwardingTable> {
        self.tables.get(index).and_then(OnceLock::get)
    }

    /// Present in its region's table
    #[inline]
    pub fn is_forwarded(&self, obj: usize) -> bool {
        self.forwardee(obj).is_some()
    }

    #[inline]
    pub fn forwardee(&self, obj: usize) -> Option<usize> {
        self.table_of(obj)?.lookup(obj)
    }

    pub fn forward_to(&self, obj: usize, target: usize) {
        match self.table_of(obj) {
            Some(table) => table.insert(obj, target),
            None => crate::fatal!(
                "object {:#x} forwarded in region {} without a table",
                obj,
                self.layout.region_index_of(obj)
            ),
        }
    }

    pub fn forward_to_self(&self, obj: usize) {
        self.forward_to(obj, obj);
    }

    /// Lookup-then-insert; the region's single writer makes this race free
    pub fn forward_to_atomic(&self, obj: usize, target: usize) -> Option<usize> {
        if let Some(existing) = self.forwardee(obj) {
            return Some(existing);
        }
        self.forward_to(obj, target);
        None
    }

    pub fn len(&self) -> usize {
        self.tables
            .iter()
            .filter_map(OnceLock::get)
            .map(RegionForwardingTable::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_scan(&self) -> usize {
        self.tables
            .iter()
            .filter_map(OnceLock::get)
            .map(RegionForwardingTable::max_scan)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTTOM: usize = 0x20_0000;

    fn addr(word: usize) -> usize {
        BOTTOM + word * 8
    }

    #[test]
    fn test_capacity_from_load_factor() {
        assert_eq!(RegionForwardingTable::new(BOTTOM, 1024, 9, 0.9).capacity(), 16);
        assert_eq!(RegionForwardingTable::new(BOTTOM, 1024, 100, 0.9).capacity(), 128);
        assert_eq!(RegionForwardingTable::new(BOTTOM, 1024, 0, 0.9).capacity(), 1);
    }

    #[test]
    fn test_in_order_inserts_fill_exactly() {
        let table = RegionForwardingTable::new(BOTTOM, 64, 16, 0.9);
        // densely packed objects share home slots
        for word in 0..16 {
            table.insert(addr(word), addr(word) - 0x1000);
        }
        assert_eq!(table.len(), 16);
        for word in 0..16 {
            assert_eq!(table.lookup(addr(word)), Some(addr(word) - 0x1000));
        }
        assert_eq!(table.lookup(addr(40)), None);
    }

    #[test]
    fn test_out_of_order_inserts() {
        let table = RegionForwardingTable::new(BOTTOM, 256, 6, 0.9);
        for word in [100, 3, 250, 4, 99, 0] {
            table.insert(addr(word), word);
        }
        for word in [100, 3, 250, 4, 99, 0] {
            assert_eq!(table.lookup(addr(word)), Some(word));
        }
        assert!(table.max_scan() >= 1);
    }

    #[test]
    fn test_same_address_overwrites() {
        let table = RegionForwardingTable::new(BOTTOM, 64, 2, 0.9);
        table.insert(addr(5), 1);
        table.insert(addr(5), 2);
        assert_eq!(table.len(), 1);
        assert_eq!(table.lookup(addr(5)), Some(2));
    }

    #[test]
    #[should_panic(expected = "overflowed")]
    fn test_overflow_is_fatal() {
        let table = RegionForwardingTable::new(BOTTOM, 64, 3, 0.9);
        for word in 0..4 {
            table.insert(addr(word * 2), 0);
        }
    }

    #[test]
    fn test_dense_forwarding_regions() {
        let layout = HeapLayout::new(BOTTOM, 6, 4);
        let mut fwd = DenseForwarding::new(&layout, 0.9);
        fwd.begin();
        fwd.begin_region(1, 2);

        let obj = layout.region_bottom(1) + 16;
        assert!(!fwd.is_forwarded(obj));
        fwd.forward_to(obj, layout.region_bottom(0));
        assert!(fwd.is_forwarded(obj));
        assert_eq!(fwd.forwardee(obj), Some(layout.region_bottom(0)));
        assert_eq!(fwd.forward_to_atomic(obj, layout.region_bottom(2)), Some(layout.region_bottom(0)));

        let other = layout.region_bottom(1) + 64;
        fwd.forward_to_self(other);
        assert_eq!(fwd.forwardee(other), Some(other));

        // region 2 has no table: nothing there is forwarded
        assert_eq!(fwd.forwardee(layout.region_bottom(2)), None);
        assert_eq!(fwd.len(), 2);

        fwd.end();
        assert_eq!(fwd.forwardee(obj), None);
    }

    #[test]
    #[should_panic(expected = "created twice")]
    fn test_begin_region_twice_is_fatal() {
        let fwd = DenseForwarding::new(&HeapLayout::new(BOTTOM, 6, 4), 0.9);
        fwd.begin_region(0, 1);
        fwd.begin_region(0, 1);
    }

    #[test]
    #[should_panic(expected = "without a table")]
    fn test_forward_without_table_is_fatal() {
        let layout = HeapLayout::new(BOTTOM, 6, 4);
        let fwd = DenseForwarding::new(&layout, 0.9);
        fwd.forward_to(layout.region_bottom(3), layout.region_bottom(0));
    }
}
