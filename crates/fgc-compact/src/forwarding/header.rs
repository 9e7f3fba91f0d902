//! In-Header Forwarding
//!
//! Classic headers have room for a whole aligned address, so the forwarding
//! pointer simply replaces the mark word:
//!
//! ```text
//! forwarded:       [ target address ................ | 0 | 11 ]
//! self-forwarded:  [ original mark bits ............ | 1 | 11 ]
//! ```
//!
//! Self-forwarding keeps the rest of the mark so in-place objects need no
//! memory read to decode and no restoration afterwards.

use crate::heap::HeapMemory;
use crate::object::MarkWord;

/// HeaderForwarding - forwarding pointer stored in the mark word
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderForwarding;

impl HeaderForwarding {
    pub fn new() -> Self {
        HeaderForwarding
    }

    #[inline]
    pub fn is_forwarded(&self, memory: &HeapMemory, obj: usize) -> bool {
        memory.load_mark(obj).is_forwarded()
    }

    /// Decode the target of `obj`, `None` if it is not forwarded
    #[inline]
    pub fn forwardee(&self, memory: &HeapMemory, obj: usize) -> Option<usize> {
        Self::decode(memory.load_mark(obj), obj)
    }

    #[inline]
    fn decode(mark: MarkWord, obj: usize) -> Option<usize> {
        if !mark.is_forwarded() {
            None
        } else if mark.is_self_forwarded() {
            Some(obj)
        } else {
            Some(mark.forwardee_pointer())
        }
    }

    #[inline]
    pub fn forward_to(&self, memory: &HeapMemory, obj: usize, target: usize) {
        memory.store_mark(obj, MarkWord::forwarded_to(target));
    }

    #[inline]
    pub fn forward_to_self(&self, memory: &HeapMemory, obj: usize) {
        let mark = memory.load_mark(obj);
        memory.store_mark(obj, mark.self_forwarded());
    }

    /// Install `target` if the mark still equals `compare`
    ///
    /// Returns `None` when this call installed the forwarding, otherwise the
    /// target some other thread installed first.
    pub fn forward_to_atomic(
        &self,
        memory: &HeapMemory,
        obj: usize,
        target: usize,
        compare: MarkWord,
    ) -> Option<usize> {
        Self::settle(
            memory.cas_mark(obj, compare, MarkWord::forwarded_to(target)),
            obj,
        )
    }

    /// Self-forward `obj` if the mark still equals `compare`
    pub fn forward_to_self_atomic(
        &self,
        memory: &HeapMemory,
        obj: usize,
        compare: MarkWord,
    ) -> Option<usize> {
        Self::settle(memory.cas_mark(obj, compare, compare.self_forwarded()), obj)
    }

    fn settle(outcome: Result<MarkWord, MarkWord>, obj: usize) -> Option<usize> {
        match outcome {
            Ok(_) => None,
            Err(witness) => {
                crate::guarantee!(
                    witness.is_forwarded(),
                    "object {:#x} changed under forwarding but is not forwarded: {:?}",
                    obj,
                    witness
                );
                Self::decode(witness, obj)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> HeapMemory {
        HeapMemory::reserve(4096).unwrap()
    }

    #[test]
    fn test_forward_and_decode() {
        let mem = memory();
        let obj = mem.base() + 256;
        let target = mem.base() + 64;
        mem.store_mark(obj, MarkWord::prototype());

        let fwd = HeaderForwarding::new();
        assert!(!fwd.is_forwarded(&mem, obj));
        assert_eq!(fwd.forwardee(&mem, obj), None);

        fwd.forward_to(&mem, obj, target);
        assert!(fwd.is_forwarded(&mem, obj));
        assert_eq!(fwd.forwardee(&mem, obj), Some(target));

        // re-forwarding to the same target is idempotent
        fwd.forward_to(&mem, obj, target);
        assert_eq!(fwd.forwardee(&mem, obj), Some(target));
    }

    #[test]
    fn test_self_forward() {
        let mem = memory();
        let obj = mem.base() + 128;
        mem.store_mark(obj, MarkWord::prototype().with_age(2));

        let fwd = HeaderForwarding::new();
        fwd.forward_to_self(&mem, obj);
        assert!(fwd.is_forwarded(&mem, obj));
        assert_eq!(fwd.forwardee(&mem, obj), Some(obj));
        assert_eq!(mem.load_mark(obj).age(), 2);
    }

    #[test]
    fn test_atomic_first_writer_wins() {
        let mem = memory();
        let obj = mem.base() + 512;
        let proto = MarkWord::prototype();
        mem.store_mark(obj, proto);

        let fwd = HeaderForwarding::new();
        assert_eq!(fwd.forward_to_atomic(&mem, obj, mem.base() + 8, proto), None);
        assert_eq!(
            fwd.forward_to_atomic(&mem, obj, mem.base() + 16, proto),
            Some(mem.base() + 8)
        );
        assert_eq!(fwd.forward_to_self_atomic(&mem, obj, proto), Some(mem.base() + 8));

        let other = mem.base() + 1024;
        mem.store_mark(other, proto);
        assert_eq!(fwd.forward_to_self_atomic(&mem, other, proto), None);
        assert_eq!(
            fwd.forward_to_atomic(&mem, other, mem.base() + 8, proto),
            Some(other)
        );
    }

    #[test]
    #[should_panic(expected = "not forwarded")]
    fn test_atomic_rejects_unforwarded_witness() {
        let mem = memory();
        let obj = mem.base() + 64;
        mem.store_mark(obj, MarkWord::prototype().with_age(1));
        HeaderForwarding::new().forward_to_atomic(&mem, obj, mem.base(), MarkWord::prototype());
    }
}
