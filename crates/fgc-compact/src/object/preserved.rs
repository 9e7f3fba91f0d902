//! Preserved Marks
//!
//! Forwarding encodings that write into the mark word destroy whatever the
//! mark held. Marks the relocated prototype header cannot rebuild (locked
//! objects, classic identity hashes) are saved here while forwarding,
//! re-pointed at the new object addresses during pointer adjustment, and
//! written back once every object has landed.

use super::header::MarkWord;
use crate::heap::HeapMemory;
use parking_lot::Mutex;

/// One saved header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreservedMark {
    pub object: usize,
    pub mark: MarkWord,

    /// The object gained a trailing hash word while moving
    pub grown: bool,
}

/// PreservedMarks - shared stack of saved headers
#[derive(Debug, Default)]
pub struct PreservedMarks {
    entries: Mutex<Vec<PreservedMark>>,
}

impl PreservedMarks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, object: usize, mark: MarkWord, grown: bool) {
        self.entries.lock().push(PreservedMark {
            object,
            mark,
            grown,
        });
    }

    /// Save `mark` if the object's header cannot be rebuilt after the move
    pub fn push_if_necessary(
        &self,
        object: usize,
        mark: MarkWord,
        compact_headers: bool,
        grown: bool,
    ) -> bool {
        if mark.must_be_preserved(compact_headers) {
            self.push(object, mark, grown);
            true
        } else {
            false
        }
    }

    /// Point every entry at its object's new address
    pub fn adjust<F>(&self, forwardee: F)
    where
        F: Fn(usize) -> Option<usize>,
    {
        for entry in self.entries.lock().iter_mut() {
            if let Some(new) = forwardee(entry.object) {
                entry.object = new;
            }
        }
    }

    /// Write every saved mark back into its (relocated) object
    pub fn restore(&self, memory: &HeapMemory) {
        for entry in self.entries.lock().iter() {
            let mark = if entry.grown {
                entry.mark.with_hash_expanded()
            } else {
                entry.mark
            };
            memory.store_mark(entry.object, mark);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
