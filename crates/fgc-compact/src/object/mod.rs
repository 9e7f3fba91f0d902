//! Object Module - Header Encoding and Object Model
//!
//! - `header`: the mark word and its only accessors
//! - `model`: object sizes and reference slots (`ObjectModel`, `ClassTable`)
//! - `preserved`: marks saved across forwarding
//!
//! Identity hashes live here as well because their storage depends on the
//! header layout: classic headers keep the hash in the mark word, compact
//! headers derive it from the address until the object first moves and then
//! keep it in a trailing word.

pub mod header;
pub mod model;
pub mod preserved;

pub use header::{HeaderState, MarkWord};
pub use model::{ClassInfo, ClassTable, ObjectModel};
pub use preserved::{PreservedMark, PreservedMarks};

use crate::heap::{Heap, HeapMemory};
use crate::util::{mix64, word_offset};
use header::{MONITOR_VALUE, STACK_LOCKED_VALUE, UNLOCKED_VALUE};

/// Address-derived identity hash: 31 bits, never zero
#[inline]
pub fn hash_of_address(addr: usize) -> u32 {
    match (mix64(addr as u64) & 0x7fff_ffff) as u32 {
        0 => 1,
        hash => hash,
    }
}

/// Identity hash of `obj`, installing it on first request
pub fn identity_hash(heap: &Heap, model: &dyn ObjectModel, obj: usize) -> u32 {
    let memory = heap.memory();
    loop {
        let mark = memory.load_mark(obj);
        if heap.compact_headers() {
            if mark.is_hash_expanded() {
                let size = model.size_in_words(heap, obj);
                return memory.load(word_offset(obj, size - 1)) as u32;
            }
            if mark.is_hashed() || memory.cas_mark(obj, mark, mark.with_hashed()).is_ok() {
                return hash_of_address(obj);
            }
        } else {
            if mark.is_hashed() {
                return mark.hash();
            }
            let hash = hash_of_address(obj);
            if memory.cas_mark(obj, mark, mark.with_hash(hash)).is_ok() {
                return hash;
            }
        }
    }
}

/// Put `obj` in the stack-locked state
pub fn stack_lock(memory: &HeapMemory, obj: usize) {
    let mark = memory.load_mark(obj);
    memory.store_mark(obj, mark.with_lock_bits(STACK_LOCKED_VALUE));
}

/// Put `obj` in the inflated-monitor state
pub fn inflate(memory: &HeapMemory, obj: usize) {
    let mark = memory.load_mark(obj);
    memory.store_mark(obj, mark.with_lock_bits(MONITOR_VALUE));
}

/// Return `obj` to the unlocked state
pub fn unlock(memory: &HeapMemory, obj: usize) {
    let mark = memory.load_mark(obj);
    memory.store_mark(obj, mark.with_lock_bits(UNLOCKED_VALUE));
}
