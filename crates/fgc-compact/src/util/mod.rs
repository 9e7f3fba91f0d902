//! Util Module - Shared Utilities
//!
//! Address arithmetic and hashing helpers used throughout the compaction core.

/// Round `value` up to a multiple of `alignment`, a power of two
#[inline]
pub fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Round `value` down to a multiple of `alignment`, a power of two
#[inline]
pub fn align_down(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    value & !(alignment - 1)
}

#[inline]
pub fn is_word_aligned(addr: usize) -> bool {
    addr & (crate::WORD_SIZE - 1) == 0
}

/// 64-bit avalanche mix (MurmurHash3 finalizer)
///
/// Used to key the concurrent forwarding table and to derive identity
/// hashes from addresses. Every input bit affects every output bit.
#[inline]
pub fn mix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51_afd7_ed55_8ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    k ^= k >> 33;
    k
}

/// Number of words between two word-aligned addresses
#[inline]
pub fn words_between(from: usize, to: usize) -> usize {
    debug_assert!(from <= to, "words_between({:#x}, {:#x})", from, to);
    (to - from) >> crate::LOG_WORD_SIZE
}

/// Address `words` words past `addr`
#[inline]
pub fn word_offset(addr: usize, words: usize) -> usize {
    addr + (words << crate::LOG_WORD_SIZE)
}
