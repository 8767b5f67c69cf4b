//! Consistent-hash ring (Ketama-style) for key-to-server routing.
//!
//! Each member value (typically a server address) is projected onto the
//! ring at 160 replica points so that key ownership stays evenly spread and
//! membership changes move only a small fraction of the keyspace.
//!
//! ## Key Concepts
//!
//! - **Replica points**: with the MD5 hasher, each value `S` contributes
//!   40 digests of `"S-0" .. "S-39"`, and each 16-byte digest is split into
//!   4 little-endian u32 tokens, for 160 ring positions total.
//! - **First-insert wins**: `add` only fills empty token slots. If a
//!   late-arriving value collides with an existing token, the earlier owner
//!   keeps the slot, so keys already routed there do not move.
//! - **Clockwise lookup**: a key hashes to a token `H`; its owner is the
//!   least ring token `>= H`, wrapping to the smallest token past the end.
//!
//! ## Example Usage
//!
//! ```
//! use memkit::ring::HashRing;
//!
//! let ring: HashRing<String> = HashRing::new();
//! ring.add("10.0.0.1:11211".to_string());
//! ring.add("10.0.0.2:11211".to_string());
//!
//! let owner = ring.lookup(b"user:42").unwrap();
//! // Lookups are stable on an unchanged ring.
//! assert_eq!(ring.lookup(b"user:42").unwrap(), owner);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::sync::OnceLock;

use md5::{Digest, Md5};
use parking_lot::RwLock;
use rustc_hash::FxHashSet;

/// Ring positions owned by a single value.
pub const REPLICA_COUNT: usize = 160;

static PROCESS_DEFAULT_HASHER: OnceLock<RingHasher> = OnceLock::new();

// ---------------------------------------------------------------------------
// RingHasher
// ---------------------------------------------------------------------------

/// Token-generation strategy for the ring.
///
/// `Md5` is the Ketama scheme and the default. `Crc32` exists as the
/// documented fallback: it truncates each CRC to 15 bits
/// (`(crc >> 16) & 0x7fff`), which yields only 32,768 distinct ring
/// positions, collides heavily on large rings, and produces a
/// **different key-to-server mapping** than `Md5`. A ring's hasher is
/// fixed at construction; mixing hashers across rings that are meant to
/// agree on routing will misroute keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingHasher {
    Md5,
    Crc32,
}

impl RingHasher {
    /// Returns the process-wide default hasher (`Md5` unless installed
    /// otherwise).
    pub fn process_default() -> RingHasher {
        *PROCESS_DEFAULT_HASHER.get_or_init(|| RingHasher::Md5)
    }

    /// Installs the process-wide default hasher used by [`HashRing::new`].
    ///
    /// Takes effect only once and only before the default is first read;
    /// returns `false` if the default was already fixed.
    pub fn install_process_default(hasher: RingHasher) -> bool {
        PROCESS_DEFAULT_HASHER.set(hasher).is_ok()
    }

    /// Hashes a caller key to its ring token.
    fn key_token(self, key: &[u8]) -> u64 {
        match self {
            RingHasher::Md5 => {
                let digest = Md5::digest(key);
                u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as u64
            },
            RingHasher::Crc32 => (crc32fast::hash(key) as u64 >> 16) & 0x7fff,
        }
    }

    /// Generates the replica tokens for a value label.
    fn replica_tokens(self, label: &str) -> Vec<u64> {
        let mut tokens = Vec::with_capacity(REPLICA_COUNT);
        match self {
            RingHasher::Md5 => {
                for i in 0..REPLICA_COUNT / 4 {
                    let digest = Md5::digest(format!("{}-{}", label, i).as_bytes());
                    for j in 0..4 {
                        let offset = j * 4;
                        tokens.push(u32::from_le_bytes([
                            digest[offset],
                            digest[offset + 1],
                            digest[offset + 2],
                            digest[offset + 3],
                        ]) as u64);
                    }
                }
            },
            RingHasher::Crc32 => {
                for i in 0..REPLICA_COUNT {
                    let crc = crc32fast::hash(format!("{}-{}", label, i).as_bytes());
                    tokens.push((crc as u64 >> 16) & 0x7fff);
                }
            },
        }
        tokens
    }
}

// ---------------------------------------------------------------------------
// HashRing
// ---------------------------------------------------------------------------

struct RingInner<T> {
    /// Token → owner, ordered so `range(token..)` finds the clockwise
    /// successor in O(log n).
    buckets: BTreeMap<u64, T>,
    /// Current member set, independent of token collisions.
    values: FxHashSet<T>,
}

/// Thread-safe consistent-hash ring.
///
/// Shared by reference between caller threads; reads take a read lock,
/// membership changes take a write lock. A membership change replaces the
/// value's 160 tokens atomically with respect to lookups.
pub struct HashRing<T> {
    hasher: RingHasher,
    inner: RwLock<RingInner<T>>,
}

impl<T> HashRing<T>
where
    T: Clone + Eq + Hash + fmt::Display,
{
    /// Creates an empty ring with the process-default hasher.
    pub fn new() -> Self {
        Self::with_hasher(RingHasher::process_default())
    }

    /// Creates an empty ring with an explicit hasher.
    pub fn with_hasher(hasher: RingHasher) -> Self {
        Self {
            hasher,
            inner: RwLock::new(RingInner {
                buckets: BTreeMap::new(),
                values: FxHashSet::default(),
            }),
        }
    }

    /// Returns the hasher this ring was built with.
    #[inline]
    pub fn hasher(&self) -> RingHasher {
        self.hasher
    }

    /// Adds a value, occupying every currently-empty replica slot.
    ///
    /// Re-adding a present value restores any of its slots that are free
    /// and is otherwise a no-op, so `add(x); remove(x); add(x)` reproduces
    /// the original mapping.
    pub fn add(&self, value: T) {
        let tokens = self.hasher.replica_tokens(&value.to_string());
        let mut inner = self.inner.write();
        for token in tokens {
            inner.buckets.entry(token).or_insert_with(|| value.clone());
        }
        inner.values.insert(value);
    }

    /// Removes a value and every replica slot it owns.
    ///
    /// Slots won by another value on collision are left untouched.
    pub fn remove(&self, value: &T) {
        let tokens = self.hasher.replica_tokens(&value.to_string());
        let mut inner = self.inner.write();
        for token in tokens {
            if inner.buckets.get(&token) == Some(value) {
                inner.buckets.remove(&token);
            }
        }
        inner.values.remove(value);
    }

    /// True if `value` is a current member.
    pub fn contains(&self, value: &T) -> bool {
        self.inner.read().values.contains(value)
    }

    /// Removes every value and token.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.buckets.clear();
        inner.values.clear();
    }

    /// Number of member values (not tokens).
    pub fn len(&self) -> usize {
        self.inner.read().values.len()
    }

    /// True when the ring has no members.
    pub fn is_empty(&self) -> bool {
        self.inner.read().values.is_empty()
    }

    /// Returns the current member set.
    pub fn values(&self) -> Vec<T> {
        self.inner.read().values.iter().cloned().collect()
    }

    /// Returns the owner of `key`, or `None` on an empty ring.
    ///
    /// A single-member ring returns that member regardless of key.
    pub fn lookup(&self, key: &[u8]) -> Option<T> {
        let inner = self.inner.read();
        if inner.values.is_empty() {
            return None;
        }
        if inner.values.len() == 1 {
            return inner.values.iter().next().cloned();
        }
        let token = self.hasher.key_token(key);
        inner
            .buckets
            .range(token..)
            .next()
            .or_else(|| inner.buckets.iter().next())
            .map(|(_, value)| value.clone())
    }

    /// Returns up to `limit` distinct owners in ring order starting at the
    /// key's owner.
    ///
    /// Used by failover routing: element 0 is `lookup(key)`, the rest are
    /// the successive distinct alternatives a caller may retry against.
    pub fn candidates(&self, key: &[u8], limit: usize) -> Vec<T> {
        let inner = self.inner.read();
        if inner.values.is_empty() || limit == 0 {
            return Vec::new();
        }
        let token = self.hasher.key_token(key);
        let mut seen: FxHashSet<&T> = FxHashSet::default();
        let mut out = Vec::new();
        let wrapped = inner
            .buckets
            .range(token..)
            .chain(inner.buckets.range(..token));
        for (_, value) in wrapped {
            if seen.insert(value) {
                out.push(value.clone());
                if out.len() == limit {
                    break;
                }
            }
        }
        out
    }

    /// Number of occupied token slots (diagnostics).
    pub fn token_count(&self) -> usize {
        self.inner.read().buckets.len()
    }
}

impl<T> Default for HashRing<T>
where
    T: Clone + Eq + Hash + fmt::Display,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for HashRing<T>
where
    T: Clone + Eq + Hash + fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("HashRing")
            .field("hasher", &self.hasher)
            .field("values", &inner.values.len())
            .field("tokens", &inner.buckets.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_of(values: &[&str]) -> HashRing<String> {
        let ring = HashRing::with_hasher(RingHasher::Md5);
        for value in values {
            ring.add(value.to_string());
        }
        ring
    }

    #[test]
    fn empty_ring_returns_none() {
        let ring: HashRing<String> = HashRing::new();
        assert_eq!(ring.lookup(b"anything"), None);
        assert!(ring.candidates(b"anything", 3).is_empty());
    }

    #[test]
    fn single_value_owns_every_key() {
        let ring = ring_of(&["only"]);
        for i in 0..50 {
            let key = format!("key{}", i);
            assert_eq!(ring.lookup(key.as_bytes()).as_deref(), Some("only"));
        }
    }

    #[test]
    fn lookup_is_deterministic() {
        let ring = ring_of(&["s1", "s2", "s3"]);
        let first = ring.lookup(b"key").expect("non-empty ring");
        for _ in 0..1000 {
            assert_eq!(ring.lookup(b"key").as_ref(), Some(&first));
        }
    }

    #[test]
    fn remove_moves_keys_off_the_removed_value() {
        let ring = ring_of(&["server1", "server2", "server3"]);
        let selected = ring.lookup(b"key").unwrap();

        ring.remove(&selected);
        let after = ring.lookup(b"key").unwrap();
        assert_ne!(after, selected);

        // Re-adding restores the original mapping.
        ring.add(selected.clone());
        assert_eq!(ring.lookup(b"key").unwrap(), selected);
    }

    #[test]
    fn membership_tracking() {
        let ring = ring_of(&["a", "b"]);
        assert!(ring.contains(&"a".to_string()));
        assert_eq!(ring.len(), 2);

        ring.remove(&"a".to_string());
        assert!(!ring.contains(&"a".to_string()));
        assert_eq!(ring.len(), 1);

        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.token_count(), 0);
    }

    #[test]
    fn candidates_start_at_the_owner_and_are_distinct() {
        let ring = ring_of(&["s1", "s2", "s3", "s4"]);
        let owner = ring.lookup(b"some-key").unwrap();
        let candidates = ring.candidates(b"some-key", 4);

        assert_eq!(candidates[0], owner);
        assert_eq!(candidates.len(), 4);
        let distinct: FxHashSet<&String> = candidates.iter().collect();
        assert_eq!(distinct.len(), 4);
    }

    #[test]
    fn candidates_respect_limit() {
        let ring = ring_of(&["s1", "s2", "s3", "s4"]);
        assert_eq!(ring.candidates(b"k", 2).len(), 2);
        // Asking for more than the member count caps at the member count.
        assert_eq!(ring.candidates(b"k", 10).len(), 4);
    }

    #[test]
    fn md5_ring_has_full_replica_fanout() {
        let ring = ring_of(&["server1"]);
        assert_eq!(ring.token_count(), REPLICA_COUNT);
    }

    #[test]
    fn crc32_fallback_routes_differently_but_consistently() {
        let md5_ring = ring_of(&["s1", "s2", "s3", "s4", "s5"]);
        let crc_ring = HashRing::with_hasher(RingHasher::Crc32);
        for value in ["s1", "s2", "s3", "s4", "s5"] {
            crc_ring.add(value.to_string());
        }

        // Stable within itself.
        let owner = crc_ring.lookup(b"stable-key").unwrap();
        assert_eq!(crc_ring.lookup(b"stable-key").unwrap(), owner);

        // 15-bit tokens collide; the CRC ring holds at most 5 * 160 slots
        // and in practice fewer than the MD5 ring.
        assert!(crc_ring.token_count() <= md5_ring.token_count());

        // Some key routes differently between the two hashers.
        let diverges = (0..200).any(|i| {
            let key = format!("divergence-{}", i);
            md5_ring.lookup(key.as_bytes()) != crc_ring.lookup(key.as_bytes())
        });
        assert!(diverges);
    }
}
