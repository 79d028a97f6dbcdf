//! Bloom filter over the user keys of one SSTable.
//!
//! A negative answer means the key is definitely absent from the table, so
//! point lookups for missing keys can skip reading data blocks entirely.
//!
//! Sizing is expressed in bits per key: 10 bits per key gives roughly a 1%
//! false positive rate with `ceil(10 * ln 2) = 7` probes.
//!
//! Probes use double hashing: `h_i = h1 + i * h2 (mod m)` where `h1` and
//! `h2` are the two halves of one 128-bit xxh3 hash.

use hyperstore_core::{Error, Result};
use xxhash_rust::xxh3::xxh3_128;

/// Default filter density
pub const DEFAULT_BITS_PER_KEY: u32 = 10;

/// Encoded header: num_hashes (u32) + num_bits (u32)
const HEADER_LEN: usize = 8;

/// Probabilistic set membership over byte keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_hashes: u32,
    num_bits: u32,
}

impl BloomFilter {
    /// Create an empty filter for `expected_keys` keys at `bits_per_key` density
    pub fn new(expected_keys: usize, bits_per_key: u32) -> Self {
        let bits_per_key = bits_per_key.max(1);
        let num_bits = (expected_keys.max(1) as u64 * bits_per_key as u64)
            .clamp(64, u32::MAX as u64) as u32;

        let num_hashes = ((bits_per_key as f64) * std::f64::consts::LN_2).ceil() as u32;
        let num_hashes = num_hashes.clamp(1, 30);

        let words = (num_bits as usize).div_ceil(64);

        Self {
            bits: vec![0u64; words],
            num_hashes,
            num_bits,
        }
    }

    /// Add a key
    pub fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = Self::hash_key(key);
        for i in 0..self.num_hashes {
            let pos = self.position(h1, h2, i);
            self.bits[(pos / 64) as usize] |= 1 << (pos % 64);
        }
    }

    /// false: definitely absent. true: probably present.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::hash_key(key);
        (0..self.num_hashes).all(|i| {
            let pos = self.position(h1, h2, i);
            (self.bits[(pos / 64) as usize] >> (pos % 64)) & 1 == 1
        })
    }

    /// Encode as `[num_hashes u32 LE][num_bits u32 LE][words u64 LE...]`
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.bits.len() * 8);
        out.extend_from_slice(&self.num_hashes.to_le_bytes());
        out.extend_from_slice(&self.num_bits.to_le_bytes());
        for word in &self.bits {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Decode a filter produced by [`BloomFilter::serialize`]
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::Corruption("bloom filter too short".into()));
        }
        let num_hashes = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let num_bits = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);

        let words = (num_bits as usize).div_ceil(64);
        let body = &data[HEADER_LEN..];
        if num_hashes == 0 || num_bits == 0 || body.len() != words * 8 {
            return Err(Error::Corruption(format!(
                "bloom filter header mismatch: {} hashes, {} bits, {} body bytes",
                num_hashes,
                num_bits,
                body.len()
            )));
        }

        let bits = body
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();

        Ok(Self {
            bits,
            num_hashes,
            num_bits,
        })
    }

    /// Number of probes per key
    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Size of the bit array
    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    fn hash_key(key: &[u8]) -> (u64, u64) {
        let hash = xxh3_128(key);
        (hash as u64, (hash >> 64) as u64)
    }

    fn position(&self, h1: u64, h2: u64, i: u32) -> u32 {
        (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.num_bits as u64) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inserted_keys_are_found() {
        let mut bf = BloomFilter::new(1000, DEFAULT_BITS_PER_KEY);
        for i in 0..1000 {
            bf.insert(format!("node:{}", i).as_bytes());
        }
        for i in 0..1000 {
            assert!(bf.may_contain(format!("node:{}", i).as_bytes()));
        }
    }

    #[test]
    fn test_false_positive_rate_is_low() {
        let mut bf = BloomFilter::new(1000, DEFAULT_BITS_PER_KEY);
        for i in 0..1000 {
            bf.insert(format!("present:{}", i).as_bytes());
        }
        let false_positives = (0..10_000)
            .filter(|i| bf.may_contain(format!("absent:{}", i).as_bytes()))
            .count();
        // ~1% expected; allow generous slack
        assert!(false_positives < 500, "too many false positives: {}", false_positives);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut bf = BloomFilter::new(50, 10);
        bf.insert(b"alpha");
        bf.insert(b"beta");

        let restored = BloomFilter::deserialize(&bf.serialize()).unwrap();
        assert_eq!(restored, bf);
        assert!(restored.may_contain(b"alpha"));
        assert_eq!(restored.num_hashes(), 7);
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(BloomFilter::deserialize(&[1, 2, 3]).is_err());

        let mut bytes = BloomFilter::new(10, 10).serialize();
        bytes.pop();
        assert!(BloomFilter::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_minimum_size() {
        let bf = BloomFilter::new(0, 0);
        assert_eq!(bf.num_bits(), 64);
        assert!(bf.num_hashes() >= 1);
    }
}
