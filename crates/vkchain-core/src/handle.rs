//! Packed identity of a wrapped handle.
//!
//! The low [`COUNTER_BITS`] bits hold a process-unique counter; the high bits
//! cache part of the counter's hash so map lookups never rehash the key.

use std::hash::{BuildHasher, BuildHasherDefault, Hasher};

use foldhash::fast::FixedState;

pub const COUNTER_BITS: u32 = 40;
const COUNTER_MASK: u64 = (1 << COUNTER_BITS) - 1;
const HASH_SEED: u64 = 0x9c1f_52d3_a7e0_4b68;
/// Odd multiplier spreading the cached bits over the whole hash word.
const SPREAD: u64 = 0x9e37_79b9_7f4a_7c15;

/// A wrapped handle as handed to the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WrappedId(u64);

impl WrappedId {
    /// Pack `counter` with its cached hash bits.
    ///
    /// Counters past the [`COUNTER_BITS`] range cycle through
    /// `1..=2^COUNTER_BITS - 1`, never reaching zero. IDs stay unique for
    /// the first `2^COUNTER_BITS - 1` handles wrapped in a process.
    pub fn from_counter(counter: u64) -> Self {
        let counter = counter.wrapping_sub(1) % COUNTER_MASK + 1;
        Self(counter | (u64::from(hash_bits(counter)) << COUNTER_BITS))
    }

    /// Re-validate an ID presented by the application.
    ///
    /// Returns `None` for null, and for values whose high bits do not match
    /// the hash of their counter, which no call to [`from_counter`] produced.
    ///
    /// [`from_counter`]: WrappedId::from_counter
    pub fn from_raw(raw: u64) -> Option<Self> {
        let counter = raw & COUNTER_MASK;
        if counter == 0 {
            return None;
        }
        let cached = (raw >> COUNTER_BITS) as u32;
        (cached == hash_bits(counter)).then_some(Self(raw))
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }

    pub fn counter(self) -> u64 {
        self.0 & COUNTER_MASK
    }

    pub fn cached_hash_bits(self) -> u32 {
        (self.0 >> COUNTER_BITS) as u32
    }
}

fn hash_bits(counter: u64) -> u32 {
    (FixedState::with_seed(HASH_SEED).hash_one(counter) >> COUNTER_BITS) as u32
}

/// Hasher for maps keyed by [`WrappedId`]: uses the cached bits instead of
/// hashing the key again.
#[derive(Debug, Default)]
pub struct CachedBitsHasher(u64);

impl Hasher for CachedBitsHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 = (self.0.rotate_left(8) ^ u64::from(byte)).wrapping_mul(SPREAD);
        }
    }

    fn write_u64(&mut self, raw: u64) {
        self.0 = (raw >> COUNTER_BITS).wrapping_mul(SPREAD);
    }
}

pub type BuildCachedBitsHasher = BuildHasherDefault<CachedBitsHasher>;
