//! Faster hashing for internal lookups that carry no DOS exposure.

use std::collections::{HashMap, HashSet};
use std::hash::{BuildHasherDefault, Hasher};

/// A builder for default Fx hashers.
pub type FastBuildHasher = BuildHasherDefault<FxHasher64>;

/// A `HashMap` using a default Fx hasher.
pub type FastHashMap<K, V> = HashMap<K, V, FastBuildHasher>;

/// A `HashSet` using a default Fx hasher.
pub type FastHashSet<V> = HashSet<V, FastBuildHasher>;

const SEED: u64 = 0x517c_c1b7_2722_0a95;
const ROTATE: u32 = 5;

/// The Fx word-at-a-time algorithm as extracted from the rustc compiler.
/// Not suitable for cryptographic use.
#[derive(Debug, Clone, Default)]
pub struct FxHasher64 {
    hash: u64,
}

impl FxHasher64 {
    #[inline]
    fn word(&mut self, word: u64) {
        self.hash = (self.hash.rotate_left(ROTATE) ^ word).wrapping_mul(SEED);
    }
}

impl Hasher for FxHasher64 {
    fn write(&mut self, mut bytes: &[u8]) {
        while bytes.len() >= 8 {
            let mut buf = [0; 8];
            buf.copy_from_slice(&bytes[..8]);
            self.word(u64::from_le_bytes(buf));
            bytes = &bytes[8..];
        }

        for byte in bytes {
            self.word(u64::from(*byte));
        }
    }

    #[inline]
    fn write_u8(&mut self, i: u8) {
        self.word(u64::from(i));
    }

    #[inline]
    fn write_u32(&mut self, i: u32) {
        self.word(u64::from(i));
    }

    #[inline]
    fn write_u64(&mut self, i: u64) {
        self.word(i);
    }

    #[inline]
    fn write_usize(&mut self, i: usize) {
        self.word(i as u64);
    }

    #[inline]
    fn finish(&self) -> u64 {
        self.hash
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn basic() {
        let mut v: FastHashMap<&'static str, i32> = Default::default();
        v.insert("cycle", 123);
        assert_eq!(v.get("cycle"), Some(&123));
    }
}
