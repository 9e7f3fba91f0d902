//! Heap Memory - Word-Addressed Anonymous Mapping
//!
//! The whole heap is one anonymous `memmap2` mapping. The compaction core
//! never handles byte slices: every access is a machine word at an absolute
//! address, performed through `AtomicUsize` so parallel workers may read and
//! write disjoint words without data races.
//!
//! ```text
//! base                                                       base + size
//! ├──────────────┬──────────────┬──────────────┬───── ─ ─ ─ ─┤
//! │  region 0    │  region 1    │  region 2    │    ...       │
//! └──────────────┴──────────────┴──────────────┴───── ─ ─ ─ ─┘
//! ```

use crate::error::{CompactError, Result};
use crate::util::{align_down, align_up, is_word_aligned};
use crate::{LOG_WORD_SIZE, WORD_SIZE};
use memmap2::{MmapMut, MmapOptions};
use std::sync::atomic::{AtomicUsize, Ordering};

/// HeapMemory - owner of the heap mapping
pub struct HeapMemory {
    /// Inner mmap handle, kept alive for the lifetime of the heap
    _mmap: MmapMut,

    /// Base address of the mapping
    base: usize,

    /// Size of the mapping in bytes
    size: usize,
}

impl HeapMemory {
    /// Reserve and commit `size` bytes of zeroed memory
    ///
    /// The size is rounded up to the OS page size.
    pub fn reserve(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(CompactError::HeapInitialization(
                "heap size must be > 0".to_string(),
            ));
        }

        let aligned_size = align_up(size, page_size::get());

        let mut mmap = MmapOptions::new()
            .len(aligned_size)
            .map_anon()
            .map_err(|e| {
                CompactError::HeapInitialization(format!(
                    "failed to map {} bytes: {}",
                    aligned_size, e
                ))
            })?;

        let base = mmap.as_mut_ptr() as usize;

        log::debug!(
            "Heap mapping reserved at {:#x} ({} bytes)",
            base,
            aligned_size
        );

        Ok(Self {
            _mmap: mmap,
            base,
            size: aligned_size,
        })
    }

    /// Base address of the mapping
    #[inline]
    pub fn base(&self) -> usize {
        self.base
    }

    /// End address (exclusive)
    #[inline]
    pub fn end(&self) -> usize {
        self.base + self.size
    }

    /// Mapping size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Check that `addr` is a word inside the mapping
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.end() && is_word_aligned(addr)
    }

    #[inline]
    fn word(&self, addr: usize) -> &AtomicUsize {
        debug_assert!(self.contains(addr), "address {:#x} outside heap", addr);
        // SAFETY: `addr` is word aligned and inside the mapping, which lives
        // as long as `self`. All heap words are only ever accessed atomically.
        unsafe { &*(addr as *const AtomicUsize) }
    }

    /// Load the word at `addr`
    #[inline]
    pub fn load(&self, addr: usize) -> usize {
        self.word(addr).load(Ordering::Acquire)
    }

    /// Store `value` into the word at `addr`
    #[inline]
    pub fn store(&self, addr: usize, value: usize) {
        self.word(addr).store(value, Ordering::Release);
    }

    /// Compare-and-swap the word at `addr`
    ///
    /// Returns `Ok(previous)` on success, `Err(witness)` otherwise.
    #[inline]
    pub fn compare_exchange(&self, addr: usize, current: usize, new: usize) -> std::result::Result<usize, usize> {
        self.word(addr)
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }

    /// Copy `words` words from `from` to `to`
    ///
    /// The ranges may overlap (memmove semantics), which is the normal case
    /// when an object slides down inside its own region.
    pub fn copy_words(&self, from: usize, to: usize, words: usize) {
        if words == 0 || from == to {
            return;
        }
        self.check_range(from, words);
        self.check_range(to, words);
        // SAFETY: both ranges lie inside the mapping; `ptr::copy` tolerates overlap.
        unsafe {
            std::ptr::copy(from as *const usize, to as *mut usize, words);
        }
        std::sync::atomic::fence(Ordering::Release);
    }

    /// Read `words` words starting at `from` into a buffer
    pub fn read_words(&self, from: usize, words: usize, out: &mut Vec<usize>) {
        out.reserve(words);
        for i in 0..words {
            out.push(self.load(from + (i << LOG_WORD_SIZE)));
        }
    }

    /// Write a buffer of words starting at `to`
    pub fn write_words(&self, to: usize, words: &[usize]) {
        self.check_range(to, words.len());
        for (i, value) in words.iter().enumerate() {
            self.store(to + (i << LOG_WORD_SIZE), *value);
        }
    }

    /// Fill `words` words starting at `to` with `value`
    pub fn fill_words(&self, to: usize, words: usize, value: usize) {
        self.check_range(to, words);
        for i in 0..words {
            self.store(to + (i << LOG_WORD_SIZE), value);
        }
    }

    /// Return the pages fully inside `[from, from + bytes)` to the OS
    ///
    /// The range reads back as zeroes afterwards. Returns the number of bytes
    /// actually released.
    pub fn release(&self, from: usize, bytes: usize) -> usize {
        let page = page_size::get();
        let start = align_up(from, page);
        let end = align_down(from + bytes, page);
        if start >= end {
            return 0;
        }
        self.release_pages(start, end - start)
    }

    #[cfg(unix)]
    fn release_pages(&self, start: usize, len: usize) -> usize {
        // SAFETY: the range is page aligned and inside our private anonymous mapping.
        let rc = unsafe { libc::madvise(start as *mut libc::c_void, len, libc::MADV_DONTNEED) };
        if rc != 0 {
            log::warn!(
                "madvise(MADV_DONTNEED) failed for {:#x}+{}: {}",
                start,
                len,
                std::io::Error::last_os_error()
            );
            return 0;
        }
        len
    }

    #[cfg(not(unix))]
    fn release_pages(&self, start: usize, len: usize) -> usize {
        // No portable decommit without another mapping API; zero instead.
        self.fill_words(start, len / WORD_SIZE, 0);
        len
    }

    #[inline]
    fn check_range(&self, from: usize, words: usize) {
        crate::guarantee!(
            from >= self.base && from + words * WORD_SIZE <= self.end(),
            "word range {:#x}+{} outside heap [{:#x}, {:#x})",
            from,
            words,
            self.base,
            self.end()
        );
    }
}

impl std::fmt::Debug for HeapMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapMemory")
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserve_rounds_to_page() {
        let memory = HeapMemory::reserve(100).unwrap();
        assert!(memory.size() >= 100);
        assert_eq!(memory.size() % page_size::get(), 0);
        assert!(is_word_aligned(memory.base()));
    }

    #[test]
    fn test_reserve_zero_fails() {
        assert!(matches!(
            HeapMemory::reserve(0),
            Err(CompactError::HeapInitialization(_))
        ));
    }

    #[test]
    fn test_load_store_cas() {
        let memory = HeapMemory::reserve(4096).unwrap();
        let addr = memory.base() + 8;
        assert_eq!(memory.load(addr), 0);
        memory.store(addr, 42);
        assert_eq!(memory.load(addr), 42);
        assert_eq!(memory.compare_exchange(addr, 42, 43), Ok(42));
        assert_eq!(memory.compare_exchange(addr, 42, 44), Err(43));
    }

    #[test]
    fn test_overlapping_copy_slides_down() {
        let memory = HeapMemory::reserve(4096).unwrap();
        let base = memory.base();
        memory.write_words(base + 16, &[1, 2, 3, 4]);
        memory.copy_words(base + 16, base + 8, 4);

        let mut out = Vec::new();
        memory.read_words(base + 8, 4, &mut out);
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_release_zeroes_pages() {
        let page = page_size::get();
        let memory = HeapMemory::reserve(page * 4).unwrap();
        let target = memory.base() + page;
        memory.fill_words(target, page / WORD_SIZE, 7);
        let released = memory.release(target, page);
        assert_eq!(released, page);
        assert_eq!(memory.load(target), 0);
    }
}
