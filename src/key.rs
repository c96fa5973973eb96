//! Partition keys and the partitioners that order them.
//!
//! Every partition key is decorated with a token before it enters the write
//! path. Tokens give the table its global sort order: keys compare by token
//! first and raw bytes second, so a hashed partitioner spreads partitions
//! evenly across the token space while a byte-ordered partitioner preserves
//! lexicographic order.

use std::cmp::Ordering;
use std::hash::Hasher;
use std::sync::Arc;

use twox_hash::XxHash64;

/// Raw key length must fit in an unsigned 16-bit length prefix.
pub const MAX_KEY_LENGTH: usize = u16::MAX as usize;

/// A partitioner-derived ordering value.
pub type Token = u64;

/// Derives tokens from raw partition keys.
pub trait Partitioner: Send + Sync {
    /// Name recorded in the table's validation metadata; a reader must
    /// reopen the table with the same partitioner.
    fn name(&self) -> &'static str;

    fn token(&self, key: &[u8]) -> Token;

    fn decorate(&self, key: Vec<u8>) -> DecoratedKey {
        DecoratedKey {
            token: self.token(&key),
            key,
        }
    }
}

/// Spreads keys across the token space with a 64-bit hash.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashedPartitioner;

const TOKEN_SEED: u64 = 0x9747b28c;

impl Partitioner for HashedPartitioner {
    fn name(&self) -> &'static str {
        "HashedPartitioner"
    }

    fn token(&self, key: &[u8]) -> Token {
        let mut hasher = XxHash64::with_seed(TOKEN_SEED);
        hasher.write(key);
        hasher.finish()
    }
}

/// Orders partitions by their raw key bytes: the token is the big-endian
/// value of the first eight bytes, and ties fall through to the byte
/// comparison in `DecoratedKey::cmp`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteOrderedPartitioner;

impl Partitioner for ByteOrderedPartitioner {
    fn name(&self) -> &'static str {
        "ByteOrderedPartitioner"
    }

    fn token(&self, key: &[u8]) -> Token {
        let mut prefix = [0u8; 8];
        let n = key.len().min(8);
        prefix[..n].copy_from_slice(&key[..n]);
        u64::from_be_bytes(prefix)
    }
}

/// A partition key paired with its token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoratedKey {
    token: Token,
    key: Vec<u8>,
}

impl DecoratedKey {
    pub fn new(token: Token, key: Vec<u8>) -> Self {
        Self { token, key }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn into_key(self) -> Vec<u8> {
        self.key
    }
}

impl Ord for DecoratedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.token
            .cmp(&other.token)
            .then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for DecoratedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Shared partitioner handle; readers hold one alongside the writer.
pub type PartitionerRef = Arc<dyn Partitioner>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashed_partitioner_is_deterministic() {
        let p = HashedPartitioner;
        assert_eq!(p.token(b"apple"), p.token(b"apple"));
        assert_ne!(p.token(b"apple"), p.token(b"banana"));
    }

    #[test]
    fn test_byte_ordered_partitioner_preserves_key_order() {
        let p = ByteOrderedPartitioner;
        let a = p.decorate(b"apple".to_vec());
        let b = p.decorate(b"banana".to_vec());
        let c = p.decorate(b"cherry".to_vec());
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_byte_ordered_partitioner_long_shared_prefix() {
        // Tokens collide on the first eight bytes; ordering falls through
        // to the raw key comparison.
        let p = ByteOrderedPartitioner;
        let shorter = p.decorate(b"aaaaaaaa-x".to_vec());
        let longer = p.decorate(b"aaaaaaaa-y".to_vec());
        assert_eq!(shorter.token(), longer.token());
        assert!(shorter < longer);
    }

    #[test]
    fn test_decorated_key_orders_by_token_first() {
        let low = DecoratedKey::new(1, b"zzz".to_vec());
        let high = DecoratedKey::new(2, b"aaa".to_vec());
        assert!(low < high);
    }
}
