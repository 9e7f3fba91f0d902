//! Object Model - Sizes and Reference Slots
//!
//! The compaction core never interprets object payloads. It asks an
//! `ObjectModel` three questions: how big is this object, how big will it be
//! after a move, and where are its reference slots.
//!
//! `ClassTable` is the model used by the crate's own tests and benches: a
//! flat table of fixed-size classes with reference fields at known word
//! offsets.
//!
//! ```text
//! classic:  [ mark ][ class id ][ field 0 ][ field 1 ] ...
//! compact:  [ mark + class id  ][ field 0 ][ field 1 ] ... [ hash ]?
//! ```

use super::header::MarkWord;
use crate::error::{CompactError, Result};
use crate::heap::Heap;
use crate::util::word_offset;

/// Source of object sizes and reference slots
pub trait ObjectModel: Send + Sync {
    /// Header words every object carries
    fn header_words(&self) -> usize;

    /// Current footprint of `obj`, including a trailing hash word
    fn size_in_words(&self, heap: &Heap, obj: usize) -> usize;

    /// Footprint of `obj` at its destination
    ///
    /// With compact headers a hashed object whose hash was never stored
    /// grows by one word when it moves, because its address-derived hash has
    /// to be kept in a trailing word.
    fn copy_size_in_words(&self, heap: &Heap, obj: usize, mark: MarkWord, moving: bool) -> usize {
        let size = self.size_in_words(heap, obj);
        if moving && heap.compact_headers() && mark.is_hashed() && !mark.is_hash_expanded() {
            size + 1
        } else {
            size
        }
    }

    /// Call `f` with the address of every reference slot of `obj`
    fn for_each_reference(&self, heap: &Heap, obj: usize, f: &mut dyn FnMut(usize));
}

/// Layout of one class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: String,

    /// Instance size in words, header included
    pub size_words: usize,

    /// Word offsets of reference fields, from the object start
    pub ref_offsets: Vec<usize>,
}

impl ClassInfo {
    pub fn new(name: &str, size_words: usize, ref_offsets: &[usize]) -> Self {
        Self {
            name: name.to_string(),
            size_words,
            ref_offsets: ref_offsets.to_vec(),
        }
    }
}

/// ClassTable - class id to layout
#[derive(Debug, Clone)]
pub struct ClassTable {
    compact_headers: bool,
    classes: Vec<ClassInfo>,
}

impl ClassTable {
    pub fn new(compact_headers: bool) -> Self {
        Self {
            compact_headers,
            classes: Vec::new(),
        }
    }

    /// Register a class and return its id
    ///
    /// Rejects layouts whose size does not cover the header or whose
    /// reference offsets overlap the header or run past the end.
    pub fn register(&mut self, info: ClassInfo) -> Result<u32> {
        let header = self.header_words();
        if info.size_words < header {
            return Err(CompactError::InvalidArgument(format!(
                "class {} has {} words, header needs {}",
                info.name, info.size_words, header
            )));
        }
        let mut sorted = info.ref_offsets.clone();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != info.ref_offsets.len() {
            return Err(CompactError::InvalidArgument(format!(
                "class {} repeats a reference offset",
                info.name
            )));
        }
        if let Some(bad) = info
            .ref_offsets
            .iter()
            .find(|&&off| off < header || off >= info.size_words)
        {
            return Err(CompactError::InvalidArgument(format!(
                "class {}: reference offset {} outside fields {}..{}",
                info.name, bad, header, info.size_words
            )));
        }

        let id = u32::try_from(self.classes.len()).map_err(|_| {
            CompactError::InvalidArgument("class table is full".to_string())
        })?;
        self.classes.push(info);
        Ok(id)
    }

    pub fn info(&self, class_id: u32) -> Option<&ClassInfo> {
        self.classes.get(class_id as usize)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Class id stored in the header of `obj`
    pub fn class_of(&self, heap: &Heap, obj: usize) -> u32 {
        if self.compact_headers {
            heap.memory().load_mark(obj).class_id()
        } else {
            heap.memory().load(word_offset(obj, 1)) as u32
        }
    }

    fn layout_of(&self, heap: &Heap, obj: usize) -> &ClassInfo {
        let class_id = self.class_of(heap, obj);
        match self.classes.get(class_id as usize) {
            Some(info) => info,
            None => crate::fatal!("object {:#x} has unknown class id {}", obj, class_id),
        }
    }

    // === Allocation ===

    /// Allocate and initialize an instance of `class_id` anywhere in the heap
    pub fn instantiate(&self, heap: &Heap, class_id: u32) -> Result<usize> {
        let info = self.checked_info(class_id)?;
        let obj = heap.allocate(info.size_words)?;
        self.initialize(heap, obj, class_id, info.size_words);
        Ok(obj)
    }

    /// Allocate and initialize an instance of `class_id` in region `region`
    pub fn instantiate_in_region(&self, heap: &Heap, region: usize, class_id: u32) -> Result<usize> {
        let info = self.checked_info(class_id)?;
        let obj = heap.allocate_in_region(region, info.size_words)?;
        self.initialize(heap, obj, class_id, info.size_words);
        Ok(obj)
    }

    fn checked_info(&self, class_id: u32) -> Result<&ClassInfo> {
        self.info(class_id).ok_or_else(|| {
            CompactError::InvalidArgument(format!("unknown class id {}", class_id))
        })
    }

    fn initialize(&self, heap: &Heap, obj: usize, class_id: u32, size_words: usize) {
        let memory = heap.memory();
        memory.fill_words(obj, size_words, 0);
        if self.compact_headers {
            memory.store_mark(obj, MarkWord::prototype_with_class(class_id));
        } else {
            memory.store_mark(obj, MarkWord::prototype());
            memory.store(word_offset(obj, 1), class_id as usize);
        }
    }

    // === Field access ===

    fn slot(&self, heap: &Heap, obj: usize, field: usize) -> usize {
        let info = self.layout_of(heap, obj);
        match info.ref_offsets.get(field) {
            Some(&off) => word_offset(obj, off),
            None => crate::fatal!(
                "class {} has {} reference fields, asked for {}",
                info.name,
                info.ref_offsets.len(),
                field
            ),
        }
    }

    /// Store `value` into reference field `field` of `obj`
    pub fn set_reference(&self, heap: &Heap, obj: usize, field: usize, value: usize) {
        heap.memory().store(self.slot(heap, obj, field), value);
    }

    /// Load reference field `field` of `obj`
    pub fn reference(&self, heap: &Heap, obj: usize, field: usize) -> usize {
        heap.memory().load(self.slot(heap, obj, field))
    }
}

impl ObjectModel for ClassTable {
    fn header_words(&self) -> usize {
        if self.compact_headers {
            1
        } else {
            2
        }
    }

    fn size_in_words(&self, heap: &Heap, obj: usize) -> usize {
        let size = self.layout_of(heap, obj).size_words;
        if self.compact_headers && heap.memory().load_mark(obj).is_hash_expanded() {
            size + 1
        } else {
            size
        }
    }

    fn for_each_reference(&self, heap: &Heap, obj: usize, f: &mut dyn FnMut(usize)) {
        for &off in &self.layout_of(heap, obj).ref_offsets {
            f(word_offset(obj, off));
        }
    }
}
