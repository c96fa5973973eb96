//! Bloom filter over partition keys.
//!
//! Sized by the classic formula `m = -n·ln(p)/(ln 2)²`, `k = (m/n)·ln 2`
//! and probed by double hashing: bit `i` is `(h1 + i·h2) mod m` with the
//! two hashes drawn from seeded XxHash64 runs over the raw key bytes.
//!
//! The bit array lives behind an `Arc` with atomic words: the writer keeps
//! adding keys while early-open readers hold shared copies, and a reader
//! observing bits added after its snapshot can only see extra positives,
//! which are harmless. Rewinds likewise leave stale keys in the filter.

use std::hash::Hasher;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use twox_hash::XxHash64;

use crate::error::{Error, Result};

const SEED_ONE: u64 = 0x5851_f42d_4c95_7f2d;
const SEED_TWO: u64 = 0x1405_7b7e_f767_814f;

/// Shared handle to a filter; readers hold one per open.
pub type BloomHandle = Arc<BloomFilter>;

pub struct BloomFilter {
    bits: Vec<AtomicU64>,
    bit_count: u64,
    hash_count: u32,
    /// Pre-"ca" format versions consumed the two hash halves in the
    /// opposite order.
    legacy_hash_order: bool,
}

impl BloomFilter {
    /// Builds a filter sized for `expected_keys` at the given
    /// false-positive chance.
    pub fn with_fp_chance(expected_keys: u64, fp_chance: f64, legacy_hash_order: bool) -> BloomHandle {
        assert!(
            fp_chance > 0.0 && fp_chance < 1.0,
            "fp chance must be in (0, 1)"
        );
        let n = expected_keys.max(1) as f64;
        let m = (-n * fp_chance.ln() / std::f64::consts::LN_2.powi(2)).ceil() as u64;
        let bit_count = m.max(64);
        let hash_count = (((bit_count as f64 / n) * std::f64::consts::LN_2).ceil() as u32).max(1);

        let words = bit_count.div_ceil(64) as usize;
        let mut bits = Vec::with_capacity(words);
        bits.resize_with(words, || AtomicU64::new(0));

        Arc::new(Self {
            bits,
            bit_count,
            hash_count,
            legacy_hash_order,
        })
    }

    fn hashes(&self, key: &[u8]) -> (u64, u64) {
        let mut one = XxHash64::with_seed(SEED_ONE);
        one.write(key);
        let mut two = XxHash64::with_seed(SEED_TWO);
        two.write(key);
        if self.legacy_hash_order {
            (two.finish(), one.finish())
        } else {
            (one.finish(), two.finish())
        }
    }

    pub fn add(&self, key: &[u8]) {
        let (h1, h2) = self.hashes(key);
        for i in 0..self.hash_count as u64 {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % self.bit_count;
            self.bits[(bit / 64) as usize].fetch_or(1 << (bit % 64), Ordering::Relaxed);
        }
    }

    /// False means the key is definitely absent.
    pub fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = self.hashes(key);
        for i in 0..self.hash_count as u64 {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % self.bit_count;
            if self.bits[(bit / 64) as usize].load(Ordering::Relaxed) & (1 << (bit % 64)) == 0 {
                return false;
            }
        }
        true
    }

    pub fn bit_count(&self) -> u64 {
        self.bit_count
    }

    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.write_u32::<BigEndian>(self.hash_count).unwrap();
        buf.push(self.legacy_hash_order as u8);
        buf.write_u64::<BigEndian>(self.bit_count).unwrap();
        buf.write_u32::<BigEndian>(self.bits.len() as u32).unwrap();
        for word in &self.bits {
            buf.write_u64::<BigEndian>(word.load(Ordering::Relaxed))
                .unwrap();
        }
    }

    pub fn decode_from(cursor: &mut Cursor<&[u8]>) -> Result<BloomHandle> {
        let hash_count = cursor.read_u32::<BigEndian>()?;
        let legacy_hash_order = match cursor.read_u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(Error::InvalidData(format!(
                    "bad bloom hash-order flag {other}"
                )))
            }
        };
        let bit_count = cursor.read_u64::<BigEndian>()?;
        let word_count = cursor.read_u32::<BigEndian>()? as usize;

        let mut bits = Vec::with_capacity(word_count);
        for _ in 0..word_count {
            bits.push(AtomicU64::new(cursor.read_u64::<BigEndian>()?));
        }
        if bit_count.div_ceil(64) as usize != bits.len() {
            return Err(Error::InvalidData(
                "bloom filter word count does not match bit count".to_string(),
            ));
        }

        Ok(Arc::new(Self {
            bits,
            bit_count,
            hash_count,
            legacy_hash_order,
        }))
    }

    /// Serialized form, written to the `Filter` component at prepare.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(17 + self.bits.len() * 8);
        self.encode_into(&mut buf);
        buf
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("bit_count", &self.bit_count)
            .field("hash_count", &self.hash_count)
            .field("legacy_hash_order", &self.legacy_hash_order)
            .finish()
    }
}
