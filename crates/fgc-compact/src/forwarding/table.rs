//! Hash Forward Table
//!
//! A concurrent insert-if-absent map from old to new addresses, for cases
//! where several workers may race to forward the same object. Nodes live in
//! a preallocated arena addressed by index and are released all at once by
//! `reset`.
//!
//! ```text
//! buckets:  [ 0 ][ 3 ][ 0 ][ 1 ] ...      node index + 1, 0 = empty chain
//!                  │         │
//! nodes:   [0: a→a' next 0] [2: c→c' next 1] ...
//! ```
//!
//! Insertion pushes a node at the chain head with a CAS; lookups never
//! block and never resize. An insert reports `should_grow` once the load
//! passes 3/4, and the owner calls `grow` between phases.

use crate::heap::HeapMemory;
use crate::object::header::MARKED_VALUE;
use crate::object::MarkWord;
use crate::util::mix64;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

const EMPTY: u32 = 0;

/// Initial bucket count
pub const DEFAULT_BUCKETS: usize = 1024;

/// Initial node arena size
pub const DEFAULT_NODES: usize = 4096;

struct Node {
    from: AtomicUsize,
    to: AtomicUsize,
    next: AtomicU32,
}

impl Node {
    fn empty() -> Self {
        Node {
            from: AtomicUsize::new(0),
            to: AtomicUsize::new(0),
            next: AtomicU32::new(EMPTY),
        }
    }
}

/// Result of `ForwardTable::forward_to`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Target installed earlier by another call; `None` if this call inserted
    pub existing: Option<usize>,

    /// The table is past its load limit and should grow
    pub should_grow: bool,
}

/// ForwardTable - lock-free chained hash map with an index arena
pub struct ForwardTable {
    buckets: Vec<AtomicU32>,
    nodes: Vec<Node>,
    used: AtomicUsize,
    entries: AtomicUsize,
}

impl ForwardTable {
    pub fn new(buckets: usize, nodes: usize) -> Self {
        let buckets = buckets.max(1).next_power_of_two();
        Self {
            buckets: (0..buckets).map(|_| AtomicU32::new(EMPTY)).collect(),
            nodes: (0..nodes).map(|_| Node::empty()).collect(),
            used: AtomicUsize::new(0),
            entries: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn bucket_of(&self, from: usize) -> usize {
        (mix64(from as u64) as usize) & (self.buckets.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.entries.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn arena_capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Walk the chain from `head` up to (not including) `stop`
    fn search(&self, mut link: u32, stop: u32, from: usize) -> Option<usize> {
        while link != stop && link != EMPTY {
            let node = &self.nodes[(link - 1) as usize];
            if node.from.load(Ordering::Acquire) == from {
                return Some(node.to.load(Ordering::Acquire));
            }
            link = node.next.load(Ordering::Acquire);
        }
        None
    }

    fn allocate_node(&self, from: usize, to: usize) -> u32 {
        let index = self.used.fetch_add(1, Ordering::AcqRel);
        crate::guarantee!(
            index < self.nodes.len(),
            "forward table arena exhausted ({} nodes)",
            self.nodes.len()
        );
        let node = &self.nodes[index];
        node.from.store(from, Ordering::Relaxed);
        node.to.store(to, Ordering::Relaxed);
        (index + 1) as u32
    }

    /// Target recorded for `from`
    pub fn forwardee(&self, from: usize) -> Option<usize> {
        let head = self.buckets[self.bucket_of(from)].load(Ordering::Acquire);
        self.search(head, EMPTY, from)
    }

    /// Insert `from -> to` unless `from` is already present
    pub fn forward_to(&self, from: usize, to: usize) -> InsertOutcome {
        let bucket = &self.buckets[self.bucket_of(from)];
        let mut head = bucket.load(Ordering::Acquire);
        if let Some(existing) = self.search(head, EMPTY, from) {
            return self.outcome(Some(existing));
        }

        let link = self.allocate_node(from, to);
        let node = &self.nodes[(link - 1) as usize];
        loop {
            node.next.store(head, Ordering::Relaxed);
            match bucket.compare_exchange(head, link, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => break,
                Err(new_head) => {
                    // only nodes pushed since `head` can hold a racing insert
                    if let Some(existing) = self.search(new_head, head, from) {
                        return self.outcome(Some(existing));
                    }
                    head = new_head;
                }
            }
        }

        self.entries.fetch_add(1, Ordering::AcqRel);
        self.outcome(None)
    }

    fn outcome(&self, existing: Option<usize>) -> InsertOutcome {
        InsertOutcome {
            existing,
            should_grow: self.len() > self.buckets.len() / 4 * 3,
        }
    }

    /// Double the bucket count and relink every node
    pub fn grow(&mut self) {
        let new_len = self.buckets.len() * 2;
        let mut buckets: Vec<AtomicU32> = (0..new_len).map(|_| AtomicU32::new(EMPTY)).collect();
        for bucket in &mut self.buckets {
            let mut link = *bucket.get_mut();
            while link != EMPTY {
                let node = &mut self.nodes[(link - 1) as usize];
                let next = *node.next.get_mut();
                let slot = (mix64(*node.from.get_mut() as u64) as usize) & (new_len - 1);
                *node.next.get_mut() = *buckets[slot].get_mut();
                *buckets[slot].get_mut() = link;
                link = next;
            }
        }
        self.buckets = buckets;
        log::debug!("Forward table grew to {} buckets", new_len);
    }

    /// Make room for at least `nodes` entries; drops current contents
    pub fn reserve(&mut self, nodes: usize) {
        if nodes > self.nodes.len() {
            self.nodes = (0..nodes).map(|_| Node::empty()).collect();
        }
        self.reset();
    }

    /// Forget every entry at once
    pub fn reset(&mut self) {
        for bucket in &mut self.buckets {
            *bucket.get_mut() = EMPTY;
        }
        *self.used.get_mut() = 0;
        *self.entries.get_mut() = 0;
    }
}

/// HashedForwarding - `ForwardTable` plus a forwarded bit in the header
///
/// The table owns the target; the mark word only records that the object is
/// forwarded (lock bits `11`) so `is_forwarded` stays a header read.
/// Self-forwarding is header-only.
pub struct HashedForwarding {
    table: ForwardTable,
    grow_requested: AtomicBool,
    grows: usize,
}

impl HashedForwarding {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUCKETS, DEFAULT_NODES)
    }

    pub fn with_capacity(buckets: usize, nodes: usize) -> Self {
        Self {
            table: ForwardTable::new(buckets, nodes),
            grow_requested: AtomicBool::new(false),
            grows: 0,
        }
    }

    pub fn table(&self) -> &ForwardTable {
        &self.table
    }

    pub fn grows(&self) -> usize {
        self.grows
    }

    pub fn begin(&mut self) {
        self.table.reset();
        *self.grow_requested.get_mut() = false;
        self.grows = 0;
    }

    pub fn end(&mut self) {
        self.table.reset();
    }

    pub fn reserve(&mut self, entries: usize) {
        self.table.reserve(entries);
    }

    /// Grow the table if an insert asked for it; call only between phases
    pub fn grow_if_requested(&mut self) -> bool {
        if !std::mem::replace(self.grow_requested.get_mut(), false) {
            return false;
        }
        self.table.grow();
        self.grows += 1;
        true
    }

    /// The header's forwarded bit mirrors membership in the table
    #[inline]
    pub fn is_forwarded(&self, memory: &HeapMemory, obj: usize) -> bool {
        memory.load_mark(obj).is_forwarded()
    }

    pub fn forwardee(&self, memory: &HeapMemory, obj: usize) -> Option<usize> {
        let mark = memory.load_mark(obj);
        if !mark.is_forwarded() {
            None
        } else if mark.is_self_forwarded() {
            Some(obj)
        } else {
            match self.table.forwardee(obj) {
                Some(target) => Some(target),
                None => crate::fatal!("object {:#x} is marked forwarded but has no entry", obj),
            }
        }
    }

    fn insert(&self, obj: usize, target: usize) -> Option<usize> {
        let outcome = self.table.forward_to(obj, target);
        if outcome.should_grow {
            self.grow_requested.store(true, Ordering::Relaxed);
        }
        outcome.existing
    }

    pub fn forward_to(&self, memory: &HeapMemory, obj: usize, target: usize) {
        if self.insert(obj, target).is_none() {
            let mark = memory.load_mark(obj);
            memory.store_mark(obj, mark.with_lock_bits(MARKED_VALUE));
        }
    }

    pub fn forward_to_self(&self, memory: &HeapMemory, obj: usize) {
        let mark = memory.load_mark(obj);
        memory.store_mark(obj, mark.self_forwarded());
    }

    /// First writer wins through the table; the winner then flags the header
    pub fn forward_to_atomic(
        &self,
        memory: &HeapMemory,
        obj: usize,
        target: usize,
        compare: MarkWord,
    ) -> Option<usize> {
        if let Some(existing) = self.insert(obj, target) {
            return Some(existing);
        }
        match memory.cas_mark(obj, compare, compare.with_lock_bits(MARKED_VALUE)) {
            Ok(_) => None,
            Err(witness) => {
                // only a self-forward can have beaten a table winner
                crate::guarantee!(
                    witness.is_self_forwarded(),
                    "object {:#x} won the table race but its header is {:?}",
                    obj,
                    witness
                );
                Some(obj)
            }
        }
    }

    pub fn forward_to_self_atomic(
        &self,
        memory: &HeapMemory,
        obj: usize,
        compare: MarkWord,
    ) -> Option<usize> {
        match memory.cas_mark(obj, compare, compare.self_forwarded()) {
            Ok(_) => None,
            Err(witness) => {
                crate::guarantee!(
                    witness.is_forwarded(),
                    "object {:#x} changed under forwarding but is not forwarded: {:?}",
                    obj,
                    witness
                );
                self.forwardee(memory, obj)
            }
        }
    }
}

impl Default for HashedForwarding {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_insert_and_lookup() {
        let table = ForwardTable::new(16, 64);
        assert_eq!(table.forwardee(0x1000), None);
        let first = table.forward_to(0x1000, 0x800);
        assert_eq!(first.existing, None);
        assert_eq!(table.forwardee(0x1000), Some(0x800));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_second_target_is_rejected() {
        let table = ForwardTable::new(16, 64);
        table.forward_to(0x1000, 0x800);
        let again = table.forward_to(0x1000, 0x900);
        assert_eq!(again.existing, Some(0x800));
        assert_eq!(table.forwardee(0x1000), Some(0x800));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_should_grow_then_grow_keeps_entries() {
        let mut table = ForwardTable::new(8, 64);
        let mut signalled = false;
        for i in 1..=20usize {
            signalled |= table.forward_to(i * 8, i * 16).should_grow;
        }
        assert!(signalled);
        table.grow();
        assert_eq!(table.bucket_count(), 16);
        for i in 1..=20usize {
            assert_eq!(table.forwardee(i * 8), Some(i * 16));
        }
        table.reset();
        assert!(table.is_empty());
        assert_eq!(table.forwardee(8), None);
    }

    #[test]
    #[should_panic(expected = "arena exhausted")]
    fn test_arena_exhaustion_is_fatal() {
        let table = ForwardTable::new(4, 2);
        for i in 1..=3usize {
            table.forward_to(i * 8, i);
        }
    }

    #[test]
    fn test_concurrent_first_writer_wins() {
        let table = Arc::new(ForwardTable::new(64, 8 * 512));
        let handles: Vec<_> = (0..8usize)
            .map(|t| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    let mut won = 0;
                    for i in 1..=256usize {
                        if table.forward_to(i * 8, t + 1).existing.is_none() {
                            won += 1;
                        }
                    }
                    won
                })
            })
            .collect();
        let wins: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(wins, 256);
        assert_eq!(table.len(), 256);
        for i in 1..=256usize {
            assert!(table.forwardee(i * 8).is_some());
        }
    }

    #[test]
    fn test_hashed_forwarding_flags_header() {
        let mem = HeapMemory::reserve(4096).unwrap();
        let obj = mem.base() + 256;
        let proto = MarkWord::prototype_with_class(4);
        mem.store_mark(obj, proto);

        let mut fwd = HashedForwarding::with_capacity(4, 16);
        fwd.begin();
        assert_eq!(fwd.forwardee(&mem, obj), None);
        assert_eq!(fwd.forward_to_atomic(&mem, obj, mem.base(), proto), None);
        assert!(fwd.is_forwarded(&mem, obj));
        assert_eq!(mem.load_mark(obj).class_id(), 4);
        assert_eq!(fwd.forwardee(&mem, obj), Some(mem.base()));
        assert_eq!(
            fwd.forward_to_atomic(&mem, obj, mem.base() + 8, proto),
            Some(mem.base())
        );

        let other = mem.base() + 512;
        mem.store_mark(other, proto);
        fwd.forward_to_self(&mem, other);
        assert_eq!(fwd.forwardee(&mem, other), Some(other));
        assert_eq!(fwd.table().len(), 1);
    }

    #[test]
    fn test_grow_if_requested() {
        let mem = HeapMemory::reserve(4096).unwrap();
        let mut fwd = HashedForwarding::with_capacity(4, 64);
        for i in 0..8 {
            let obj = mem.base() + i * 16;
            mem.store_mark(obj, MarkWord::prototype());
            fwd.forward_to(&mem, obj, mem.base() + 2048 + i * 16);
        }
        assert!(fwd.grow_if_requested());
        assert!(!fwd.grow_if_requested());
        assert_eq!(fwd.grows(), 1);
        for i in 0..8 {
            assert_eq!(
                fwd.forwardee(&mem, mem.base() + i * 16),
                Some(mem.base() + 2048 + i * 16)
            );
        }
    }
}
