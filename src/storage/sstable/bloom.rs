//! Bloom filter for SSTable point lookups

use bytes::{Buf, BufMut};
use xxhash_rust::xxh3::xxh3_128;

/// Probabilistic data structure: "is this key in the set?"
///
/// - If any bit is 0 → key is DEFINITELY NOT in the set
/// - If all bits are 1 → key is PROBABLY in the set (false positive possible)
///
/// Sizing:
///   num_hashes = bits_per_key * ln(2)
///   10 bits/key → ~1% false positive rate
///
/// Double hashing: h_i(key) = h1(key) + i * h2(key) (mod m), where h1 and h2
/// are the two halves of one 128-bit xxh3 hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_hashes: u32,
    num_bits: u32,
}

impl BloomFilter {
    /// Build a filter over precomputed key hashes
    pub fn from_hashes(hashes: &[u128], bits_per_key: usize) -> Self {
        let num_bits = (hashes.len() * bits_per_key).max(64) as u32;
        let num_hashes = ((bits_per_key as f64) * std::f64::consts::LN_2).round() as u32;
        let num_hashes = num_hashes.clamp(1, 30);

        let mut filter = Self {
            bits: vec![0u64; (num_bits as usize).div_ceil(64)],
            num_hashes,
            num_bits,
        };
        for &hash in hashes {
            filter.insert_hash(hash);
        }
        filter
    }

    /// Hash a key the way the filter expects
    pub fn hash_key(key: &[u8]) -> u128 {
        xxh3_128(key)
    }

    pub fn insert(&mut self, key: &[u8]) {
        self.insert_hash(Self::hash_key(key));
    }

    fn insert_hash(&mut self, hash: u128) {
        let (h1, h2) = split(hash);
        for i in 0..self.num_hashes {
            let pos = self.position(h1, h2, i);
            self.bits[pos / 64] |= 1 << (pos % 64);
        }
    }

    /// Check if a key MIGHT be in the set.
    /// false → definitely not here. true → probably here.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = split(Self::hash_key(key));
        (0..self.num_hashes).all(|i| {
            let pos = self.position(h1, h2, i);
            (self.bits[pos / 64] >> (pos % 64)) & 1 == 1
        })
    }

    fn position(&self, h1: u64, h2: u64, i: u32) -> usize {
        (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits as u64) as usize
    }

    /// `[num_hashes u32][num_bits u32][words u64...]`
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.bits.len() * 8);
        buf.put_u32_le(self.num_hashes);
        buf.put_u32_le(self.num_bits);
        for word in &self.bits {
            buf.put_u64_le(*word);
        }
        buf
    }

    /// Decode a filter, `None` if the bytes are malformed
    pub fn decode(mut data: &[u8]) -> Option<Self> {
        if data.remaining() < 8 {
            return None;
        }
        let num_hashes = data.get_u32_le();
        let num_bits = data.get_u32_le();
        let words = (num_bits as usize).div_ceil(64);
        if num_bits == 0 || num_hashes == 0 || data.remaining() != words * 8 {
            return None;
        }
        let bits = (0..words).map(|_| data.get_u64_le()).collect();
        Some(Self {
            bits,
            num_hashes,
            num_bits,
        })
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }
}

fn split(hash: u128) -> (u64, u64) {
    (hash as u64, (hash >> 64) as u64)
}
