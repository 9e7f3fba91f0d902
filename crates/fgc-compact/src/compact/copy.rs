//! Object Copying - Compact Phase
//!
//! Copy Strategy:
//! 1. Move the object's words with an overlap-safe copy
//! 2. Append the identity hash word if the object grows
//! 3. Write the destination header
//!
//! Objects either land directly in the heap or are appended to a shadow
//! buffer with the exact same layout.

use crate::heap::HeapMemory;
use crate::object::{hash_of_address, MarkWord};
use crate::util::word_offset;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One planned move, captured before any byte of the source region changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveRecord {
    pub src: usize,
    pub dest: usize,

    /// Words at the source
    pub size: usize,

    /// Words at the destination
    pub copy_size: usize,

    /// Header to install at the destination
    pub new_mark: MarkWord,
}

impl MoveRecord {
    #[inline]
    pub fn grown(&self) -> bool {
        self.copy_size > self.size
    }
}

/// Header an object carries after its move
///
/// Encodings that leave the header alone keep it verbatim; the others
/// rebuild it from what survived in the forwarded mark.
pub fn relocated_mark(mark: MarkWord, compact_headers: bool, grown: bool, header_intact: bool) -> MarkWord {
    if !header_intact {
        return mark.relocated(compact_headers, grown);
    }
    if grown {
        mark.with_hash_expanded()
    } else {
        mark
    }
}

/// ObjectCopier - copies planned moves and counts them
pub struct ObjectCopier {
    objects_copied: AtomicUsize,
    words_copied: AtomicUsize,
    grown_objects: AtomicUsize,
}

impl ObjectCopier {
    pub fn new() -> Self {
        Self {
            objects_copied: AtomicUsize::new(0),
            words_copied: AtomicUsize::new(0),
            grown_objects: AtomicUsize::new(0),
        }
    }

    fn count(&self, record: &MoveRecord) {
        self.objects_copied.fetch_add(1, Ordering::Relaxed);
        self.words_copied.fetch_add(record.copy_size, Ordering::Relaxed);
        if record.grown() {
            self.grown_objects.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Move one object in place in the heap
    pub fn copy_object(&self, memory: &HeapMemory, record: &MoveRecord) {
        memory.copy_words(record.src, record.dest, record.size);
        if record.grown() {
            memory.store(
                word_offset(record.dest, record.size),
                hash_of_address(record.src) as usize,
            );
        }
        memory.store_mark(record.dest, record.new_mark);
        self.count(record);
    }

    /// Append the destination image of one object to `buffer`
    pub fn copy_to_buffer(&self, memory: &HeapMemory, record: &MoveRecord, buffer: &mut Vec<usize>) {
        let start = buffer.len();
        memory.read_words(record.src, record.size, buffer);
        if record.grown() {
            buffer.push(hash_of_address(record.src) as usize);
        }
        buffer[start] = record.new_mark.raw();
        self.count(record);
    }

    pub fn objects_copied(&self) -> usize {
        self.objects_copied.load(Ordering::Relaxed)
    }

    pub fn words_copied(&self) -> usize {
        self.words_copied.load(Ordering::Relaxed)
    }

    pub fn grown_objects(&self) -> usize {
        self.grown_objects.load(Ordering::Relaxed)
    }
}

impl Default for ObjectCopier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(memory: &HeapMemory, src_word: usize, dest_word: usize, size: usize, copy_size: usize) -> MoveRecord {
        MoveRecord {
            src: memory.base() + src_word * 8,
            dest: memory.base() + dest_word * 8,
            size,
            copy_size,
            new_mark: MarkWord::prototype_with_class(2),
        }
    }

    #[test]
    fn test_overlapping_slide() {
        let memory = HeapMemory::reserve(4096).unwrap();
        for i in 0..6 {
            memory.store(memory.base() + (4 + i) * 8, 100 + i);
        }
        let copier = ObjectCopier::new();
        let rec = record(&memory, 4, 2, 6, 6);
        copier.copy_object(&memory, &rec);

        assert_eq!(memory.load_mark(rec.dest), MarkWord::prototype_with_class(2));
        for i in 1..6 {
            assert_eq!(memory.load(rec.dest + i * 8), 100 + i);
        }
        assert_eq!(copier.objects_copied(), 1);
        assert_eq!(copier.words_copied(), 6);
    }

    #[test]
    fn test_grown_object_gets_hash_word() {
        let memory = HeapMemory::reserve(4096).unwrap();
        let copier = ObjectCopier::new();
        let rec = record(&memory, 40, 8, 2, 3);
        memory.store(rec.src + 8, 55);
        copier.copy_object(&memory, &rec);
        assert_eq!(memory.load(rec.dest + 8), 55);
        assert_eq!(memory.load(rec.dest + 16), hash_of_address(rec.src) as usize);
        assert_eq!(copier.grown_objects(), 1);
    }

    #[test]
    fn test_buffer_image_matches_direct_copy() {
        let memory = HeapMemory::reserve(4096).unwrap();
        let rec = record(&memory, 100, 10, 3, 4);
        memory.store(rec.src + 8, 1);
        memory.store(rec.src + 16, 2);

        let copier = ObjectCopier::new();
        let mut buffer = Vec::new();
        copier.copy_to_buffer(&memory, &rec, &mut buffer);
        assert_eq!(
            buffer,
            vec![rec.new_mark.raw(), 1, 2, hash_of_address(rec.src) as usize]
        );
    }

    #[test]
    fn test_relocated_mark_policies() {
        let mark = MarkWord::prototype().with_hash(12);
        assert_eq!(relocated_mark(mark, false, false, true), mark);
        assert_eq!(relocated_mark(mark, false, false, false), MarkWord::prototype());
        let compact = MarkWord::prototype_with_class(3).with_hashed();
        assert!(relocated_mark(compact, true, true, true).is_hash_expanded());
    }
}
