//! Object Header - Mark Word Encoding
//!
//! Every object starts with a 64-bit mark word. This module is the only place
//! that knows its bit layout; everything else goes through `MarkWord`.
//!
//! ```text
//!  63            32 31             9   8   7   6  3   2   1 0
//! ┌────────────────┬────────────────┬───┬───┬──────┬───┬─────┐
//! │ class id       │ hash (classic) │exp│ h │ age  │ sf│ lock│   compact / classic
//! └────────────────┴────────────────┴───┴───┴──────┴───┴─────┘
//!
//! lock: 01 unlocked, 00 stack-locked, 10 monitor, 11 forwarded
//! sf:   self-forwarded (valid only with lock == 11)
//! h:    identity hash requested
//! exp:  identity hash stored in a trailing word (compact headers only)
//! ```
//!
//! Classic headers keep the class id in a second header word and use bits
//! 9..40 for the identity hash, so a forwarded classic mark is simply
//! `target | 0b11`. Compact headers keep the class id in the upper half; the
//! sliding encoding reuses bits 3 and 9..31 while forwarded.

use crate::heap::HeapMemory;

/// Lock bits
pub const LOCK_BITS: u32 = 2;
pub const LOCK_MASK: usize = 0b11;
pub const STACK_LOCKED_VALUE: usize = 0b00;
pub const UNLOCKED_VALUE: usize = 0b01;
pub const MONITOR_VALUE: usize = 0b10;
pub const MARKED_VALUE: usize = 0b11;

/// Self-forwarded bit
pub const SELF_FORWARDED_BIT: u32 = 2;
pub const SELF_FORWARDED_MASK: usize = 1 << SELF_FORWARDED_BIT;

/// Age field
pub const AGE_SHIFT: u32 = 3;
pub const AGE_BITS: u32 = 4;
pub const AGE_MASK: usize = ((1 << AGE_BITS) - 1) << AGE_SHIFT;
pub const MAX_AGE: u8 = (1 << AGE_BITS) - 1;

/// Identity hash state
pub const HASHED_BIT: u32 = 7;
pub const HASHED_MASK: usize = 1 << HASHED_BIT;
pub const HASH_EXPANDED_BIT: u32 = 8;
pub const HASH_EXPANDED_MASK: usize = 1 << HASH_EXPANDED_BIT;

/// Classic identity hash field
pub const HASH_SHIFT: u32 = 9;
pub const HASH_BITS: u32 = 31;
pub const HASH_MASK: usize = ((1 << HASH_BITS) - 1) << HASH_SHIFT;

/// Compact class id field
pub const CLASS_SHIFT: u32 = 32;
pub const CLASS_MASK: usize = !0usize << CLASS_SHIFT;

/// Tagged view of a mark word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderState {
    Unlocked,
    StackLocked,
    Monitor,
    Forwarded,
    SelfForwarded,
}

/// MarkWord - value type over the first header word
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkWord(usize);

impl MarkWord {
    #[inline]
    pub const fn from_raw(raw: usize) -> Self {
        MarkWord(raw)
    }

    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    /// Header of a freshly allocated classic object
    #[inline]
    pub const fn prototype() -> Self {
        MarkWord(UNLOCKED_VALUE)
    }

    /// Header of a freshly allocated compact object of class `class_id`
    #[inline]
    pub const fn prototype_with_class(class_id: u32) -> Self {
        MarkWord(((class_id as usize) << CLASS_SHIFT) | UNLOCKED_VALUE)
    }

    /// Classic forwarding pointer: `target | 0b11`
    #[inline]
    pub fn forwarded_to(target: usize) -> Self {
        debug_assert!(target & 0b111 == 0, "unaligned forwardee {:#x}", target);
        MarkWord(target | MARKED_VALUE)
    }

    // === Lock state ===

    #[inline]
    pub const fn lock_bits(self) -> usize {
        self.0 & LOCK_MASK
    }

    #[inline]
    pub const fn with_lock_bits(self, bits: usize) -> Self {
        MarkWord((self.0 & !LOCK_MASK) | (bits & LOCK_MASK))
    }

    #[inline]
    pub const fn is_unlocked(self) -> bool {
        self.lock_bits() == UNLOCKED_VALUE
    }

    /// Stack-locked or inflated to a monitor
    #[inline]
    pub const fn is_locked(self) -> bool {
        self.lock_bits() == STACK_LOCKED_VALUE || self.lock_bits() == MONITOR_VALUE
    }

    #[inline]
    pub const fn is_forwarded(self) -> bool {
        self.lock_bits() == MARKED_VALUE
    }

    #[inline]
    pub const fn is_self_forwarded(self) -> bool {
        self.is_forwarded() && self.0 & SELF_FORWARDED_MASK != 0
    }

    /// Same word with the forwarded and self-forwarded bits set
    #[inline]
    pub const fn self_forwarded(self) -> Self {
        MarkWord(self.0 | MARKED_VALUE | SELF_FORWARDED_MASK)
    }

    /// Classic decoding: the target pointer held in a forwarded mark
    #[inline]
    pub const fn forwardee_pointer(self) -> usize {
        self.0 & !LOCK_MASK
    }

    pub fn state(self) -> HeaderState {
        match self.lock_bits() {
            UNLOCKED_VALUE => HeaderState::Unlocked,
            STACK_LOCKED_VALUE => HeaderState::StackLocked,
            MONITOR_VALUE => HeaderState::Monitor,
            _ if self.is_self_forwarded() => HeaderState::SelfForwarded,
            _ => HeaderState::Forwarded,
        }
    }

    // === Age ===

    #[inline]
    pub const fn age(self) -> u8 {
        ((self.0 & AGE_MASK) >> AGE_SHIFT) as u8
    }

    #[inline]
    pub fn with_age(self, age: u8) -> Self {
        let age = age.min(MAX_AGE) as usize;
        MarkWord((self.0 & !AGE_MASK) | (age << AGE_SHIFT))
    }

    // === Identity hash ===

    #[inline]
    pub const fn is_hashed(self) -> bool {
        self.0 & HASHED_MASK != 0
    }

    #[inline]
    pub const fn with_hashed(self) -> Self {
        MarkWord(self.0 | HASHED_MASK)
    }

    #[inline]
    pub const fn is_hash_expanded(self) -> bool {
        self.0 & HASH_EXPANDED_MASK != 0
    }

    #[inline]
    pub const fn with_hash_expanded(self) -> Self {
        MarkWord(self.0 | HASH_EXPANDED_MASK)
    }

    /// Classic identity hash stored in the mark word
    #[inline]
    pub const fn hash(self) -> u32 {
        ((self.0 & HASH_MASK) >> HASH_SHIFT) as u32
    }

    /// Classic: store `hash` and set the hashed bit
    #[inline]
    pub fn with_hash(self, hash: u32) -> Self {
        let hash = (hash as usize) & ((1 << HASH_BITS) - 1);
        MarkWord((self.0 & !HASH_MASK) | (hash << HASH_SHIFT) | HASHED_MASK)
    }

    // === Class (compact headers) ===

    #[inline]
    pub const fn class_id(self) -> u32 {
        (self.0 >> CLASS_SHIFT) as u32
    }

    // === Collector support ===

    /// Whether this mark carries state the prototype header cannot rebuild
    ///
    /// Locked marks always do. Classic marks also lose their identity hash
    /// when a forwarding pointer overwrites them; compact marks keep the hash
    /// state bits through forwarding.
    #[inline]
    pub const fn must_be_preserved(self, compact_headers: bool) -> bool {
        self.is_locked() || (!compact_headers && self.is_hashed())
    }

    /// Header an object gets at its destination after a move
    ///
    /// Classic: the unlocked prototype (class id lives in the second word).
    /// Compact: class id and hash state survive, with `grown` recording that a
    /// trailing hash word was appended during the move.
    pub fn relocated(self, compact_headers: bool, grown: bool) -> Self {
        if !compact_headers {
            return MarkWord::prototype();
        }
        let kept = self.0 & (CLASS_MASK | HASHED_MASK | HASH_EXPANDED_MASK);
        let mark = MarkWord(kept | UNLOCKED_VALUE);
        if grown {
            mark.with_hash_expanded()
        } else {
            mark
        }
    }
}

impl std::fmt::Debug for MarkWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MarkWord({:#018x}, {:?})", self.0, self.state())
    }
}

// === Header access through the heap mapping ===

impl HeapMemory {
    /// Load the mark word of `obj`
    #[inline]
    pub fn load_mark(&self, obj: usize) -> MarkWord {
        MarkWord(self.load(obj))
    }

    /// Overwrite the mark word of `obj`
    #[inline]
    pub fn store_mark(&self, obj: usize, mark: MarkWord) {
        self.store(obj, mark.raw());
    }

    /// CAS the mark word of `obj`; `Err` carries the witnessed mark
    #[inline]
    pub fn cas_mark(
        &self,
        obj: usize,
        expected: MarkWord,
        new: MarkWord,
    ) -> Result<MarkWord, MarkWord> {
        self.compare_exchange(obj, expected.raw(), new.raw())
            .map(MarkWord)
            .map_err(MarkWord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prototype_states() {
        assert_eq!(MarkWord::prototype().state(), HeaderState::Unlocked);
        let compact = MarkWord::prototype_with_class(42);
        assert_eq!(compact.class_id(), 42);
        assert!(compact.is_unlocked());
        assert!(!compact.is_forwarded());
    }

    #[test]
    fn test_classic_forwarding_pointer() {
        let mark = MarkWord::forwarded_to(0x7f00_1234_5678);
        assert!(mark.is_forwarded());
        assert!(!mark.is_self_forwarded());
        assert_eq!(mark.forwardee_pointer(), 0x7f00_1234_5678);
        assert_eq!(mark.state(), HeaderState::Forwarded);
    }

    #[test]
    fn test_self_forwarded_keeps_other_bits() {
        let mark = MarkWord::prototype_with_class(7).with_hashed().with_age(3);
        let sf = mark.self_forwarded();
        assert!(sf.is_forwarded());
        assert!(sf.is_self_forwarded());
        assert_eq!(sf.class_id(), 7);
        assert!(sf.is_hashed());
        assert_eq!(sf.age(), 3);
        assert_eq!(sf.state(), HeaderState::SelfForwarded);
    }

    #[test]
    fn test_lock_states() {
        let locked = MarkWord::prototype().with_lock_bits(STACK_LOCKED_VALUE);
        assert!(locked.is_locked());
        assert_eq!(locked.state(), HeaderState::StackLocked);
        let monitor = MarkWord::prototype().with_lock_bits(MONITOR_VALUE);
        assert!(monitor.is_locked());
        assert_eq!(monitor.state(), HeaderState::Monitor);
        assert!(!MarkWord::prototype().is_locked());
    }

    #[test]
    fn test_age_saturates() {
        let mark = MarkWord::prototype().with_age(200);
        assert_eq!(mark.age(), MAX_AGE);
        assert!(mark.is_unlocked());
    }

    #[test]
    fn test_classic_hash_field() {
        let mark = MarkWord::prototype().with_hash(0x5eed_beef);
        assert!(mark.is_hashed());
        assert_eq!(mark.hash(), 0x5eed_beef & 0x7fff_ffff);
        assert!(mark.is_unlocked());
    }

    #[test]
    fn test_must_be_preserved() {
        let hashed = MarkWord::prototype().with_hash(99);
        assert!(hashed.must_be_preserved(false));
        assert!(!MarkWord::prototype_with_class(1).with_hashed().must_be_preserved(true));

        let locked = MarkWord::prototype_with_class(1).with_lock_bits(STACK_LOCKED_VALUE);
        assert!(locked.must_be_preserved(true));
        assert!(locked.must_be_preserved(false));
        assert!(!MarkWord::prototype().must_be_preserved(false));
    }

    #[test]
    fn test_relocated_header() {
        let compact = MarkWord::prototype_with_class(9)
            .with_hashed()
            .with_age(5)
            .self_forwarded();
        let moved = compact.relocated(true, true);
        assert_eq!(moved.class_id(), 9);
        assert!(moved.is_hashed());
        assert!(moved.is_hash_expanded());
        assert!(moved.is_unlocked());
        assert_eq!(moved.age(), 0);

        assert_eq!(
            MarkWord::forwarded_to(0x1000).relocated(false, false),
            MarkWord::prototype()
        );
    }
}
