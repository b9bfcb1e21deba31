//! Bloom filters for set reconciliation and prune tracking
//!
//! Sizing is kept in pure functions so filter geometry can be checked
//! without any network or table state. A bloom filter never reports a
//! member as absent; it may report a non-member as present.

use crate::error::{Sanitize, SanitizeError};
use crate::types::{Hash, Pubkey};
use crate::wire::PACKET_DATA_SIZE;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::repeat_with;
use std::marker::PhantomData;

/// Target false-positive rate of pull filters.
pub const FALSE_RATE: f64 = 0.1;

/// Target number of hash keys of pull filters.
pub const KEYS: f64 = 8.0;

/// Upper bound on keys accepted from the wire.
pub const MAX_BLOOM_KEYS: usize = 64;

/// Upper bound on bits accepted from the wire; a filter never outgrows a packet.
pub const MAX_BLOOM_BITS: u64 = (PACKET_DATA_SIZE * 8) as u64;

const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over `bytes`, seeded with `key`.
fn fnv1a(key: u64, bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(key, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME))
}

/// Items that can be placed in a [`Bloom`].
pub trait BloomHashIndex {
    fn hash_at_index(&self, hash_index: u64) -> u64;
}

impl BloomHashIndex for Hash {
    fn hash_at_index(&self, hash_index: u64) -> u64 {
        fnv1a(hash_index, &self.0)
    }
}

impl BloomHashIndex for Pubkey {
    fn hash_at_index(&self, hash_index: u64) -> u64 {
        fnv1a(hash_index, &self.0)
    }
}

/// Bit-vector bloom filter with explicit hash keys.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Bloom<T> {
    pub keys: Vec<u64>,
    pub bits: Vec<u64>,
    pub num_bits: u64,
    num_bits_set: u64,
    #[serde(skip)]
    _item: PhantomData<T>,
}

impl<T> fmt::Debug for Bloom<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bloom {{ keys: {}, bits: {}, set: {} }}",
            self.keys.len(),
            self.num_bits,
            self.num_bits_set
        )
    }
}

impl<T: BloomHashIndex> Bloom<T> {
    pub fn new(num_bits: usize, keys: Vec<u64>) -> Self {
        let num_bits = num_bits.max(1);
        Self {
            keys,
            bits: vec![0u64; (num_bits + 63) / 64],
            num_bits: num_bits as u64,
            num_bits_set: 0,
            _item: PhantomData,
        }
    }

    /// Filter sized for `num_items` at `false_rate`, capped at `max_bits`,
    /// with random keys.
    pub fn random<R: Rng>(
        rng: &mut R,
        num_items: usize,
        false_rate: f64,
        max_bits: usize,
    ) -> Self {
        let num_bits = Self::num_bits(num_items as f64, false_rate);
        let num_bits = (num_bits as usize).clamp(1, max_bits.max(1));
        let num_keys = Self::num_keys(num_bits as f64, num_items as f64) as usize;
        let keys = repeat_with(|| rng.gen()).take(num_keys).collect();
        Self::new(num_bits, keys)
    }

    /// Optimal bit count for `num_items` at `false_rate`.
    pub fn num_bits(num_items: f64, false_rate: f64) -> f64 {
        let n = num_items;
        let p = false_rate;
        ((n * p.ln()) / (1f64 / 2f64.powf(2f64.ln())).ln()).ceil()
    }

    /// Optimal key count for `num_bits` holding `num_items`.
    pub fn num_keys(num_bits: f64, num_items: f64) -> f64 {
        let n = num_items;
        let m = num_bits;
        if n == 0.0 {
            0.0
        } else {
            1f64.max(((m / n) * 2f64.ln()).round())
        }
    }

    fn pos(&self, key: &T, k: u64) -> u64 {
        key.hash_at_index(k) % self.num_bits
    }

    fn get_bit(&self, pos: u64) -> bool {
        self.bits[(pos / 64) as usize] & (1u64 << (pos % 64)) != 0
    }

    pub fn add(&mut self, key: &T) {
        for k in 0..self.keys.len() {
            let pos = self.pos(key, self.keys[k]);
            let word = &mut self.bits[(pos / 64) as usize];
            let mask = 1u64 << (pos % 64);
            if *word & mask == 0 {
                *word |= mask;
                self.num_bits_set += 1;
            }
        }
    }

    pub fn contains(&self, key: &T) -> bool {
        self.keys
            .iter()
            .all(|k| self.get_bit(self.pos(key, *k)))
    }

    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|word| *word = 0);
        self.num_bits_set = 0;
    }

    pub fn num_bits_set(&self) -> u64 {
        self.num_bits_set
    }
}

impl<T> Default for Bloom<T> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            bits: Vec::new(),
            num_bits: 0,
            num_bits_set: 0,
            _item: PhantomData,
        }
    }
}

impl<T> Sanitize for Bloom<T> {
    fn sanitize(&self) -> Result<(), SanitizeError> {
        if self.keys.is_empty() || self.keys.len() > MAX_BLOOM_KEYS {
            return Err(SanitizeError::ValueOutOfBounds);
        }
        if self.num_bits == 0 || self.num_bits > MAX_BLOOM_BITS {
            return Err(SanitizeError::ValueOutOfBounds);
        }
        if self.bits.len() as u64 != self.num_bits.div_ceil(64) {
            return Err(SanitizeError::InvalidValue);
        }
        if self.num_bits_set > self.num_bits {
            return Err(SanitizeError::InvalidValue);
        }
        Ok(())
    }
}

// =============================================================================
// PULL FILTERS
// =============================================================================

/// One partition of a pull request's "have" set.
///
/// Covers exactly the hashes whose top `mask_bits` bits match `mask`;
/// the remaining low bits of `mask` are all ones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrdsFilter {
    pub filter: Bloom<Hash>,
    mask: u64,
    mask_bits: u32,
}

impl CrdsFilter {
    /// Empty filter covering the whole hash space.
    pub fn new_rand<R: Rng>(rng: &mut R, num_items: usize, max_bytes: usize) -> Self {
        let max_bits = (max_bytes * 8) as f64;
        let max_items = Self::max_items(max_bits, FALSE_RATE, KEYS);
        let mask_bits = Self::compute_mask_bits(num_items as f64, max_items);
        let filter = Bloom::random(rng, max_items as usize, FALSE_RATE, max_bits as usize);
        let seed: u64 = rng.gen_range(0..2u64.saturating_pow(mask_bits).max(1));
        Self {
            filter,
            mask: Self::compute_mask(seed, mask_bits),
            mask_bits,
        }
    }

    pub fn mask(&self) -> u64 {
        self.mask
    }

    pub fn mask_bits(&self) -> u32 {
        self.mask_bits
    }

    /// Mask selecting partition `seed` among `2^mask_bits`.
    pub fn compute_mask(seed: u64, mask_bits: u32) -> u64 {
        let seed = seed.checked_shl(64 - mask_bits).unwrap_or(0);
        seed | (!0u64).checked_shr(mask_bits).unwrap_or(0)
    }

    /// Items a filter of `max_bits` can hold at `false_rate` with `num_keys`.
    pub fn max_items(max_bits: f64, false_rate: f64, num_keys: f64) -> f64 {
        let m = max_bits;
        let p = false_rate;
        let k = num_keys;
        (m / (-k / (1f64 - (p.ln() / k).exp()).ln())).ceil()
    }

    /// Partition count exponent: `max(0, ceil(log2(num_items / max_items)))`.
    pub fn compute_mask_bits(num_items: f64, max_items: f64) -> u32 {
        ((num_items / max_items).log2().ceil()).max(0.0) as u32
    }

    /// Partition index of `hash` among `2^mask_bits`.
    pub fn partition_index(hash: &Hash, mask_bits: u32) -> usize {
        hash.as_u64().checked_shr(64 - mask_bits).unwrap_or(0) as usize
    }

    /// Whether `item` falls in this filter's partition.
    pub fn test_mask(&self, item: &Hash) -> bool {
        let ones = (!0u64).checked_shr(self.mask_bits).unwrap_or(0);
        (item.as_u64() | ones) == self.mask
    }

    pub fn filter_contains(&self, item: &Hash) -> bool {
        self.filter.contains(item)
    }

    pub fn add(&mut self, item: &Hash) {
        if self.test_mask(item) {
            self.filter.add(item);
        }
    }

    /// In this partition and (probably) already held by the requester.
    pub fn contains(&self, item: &Hash) -> bool {
        self.test_mask(item) && self.filter.contains(item)
    }
}

/// Empty filter; only useful for sizing the pull request envelope.
impl Default for CrdsFilter {
    fn default() -> Self {
        Self {
            filter: Bloom::default(),
            mask: !0u64,
            mask_bits: 0,
        }
    }
}

impl Sanitize for CrdsFilter {
    fn sanitize(&self) -> Result<(), SanitizeError> {
        if self.mask_bits > 64 {
            return Err(SanitizeError::ValueOutOfBounds);
        }
        let ones = (!0u64).checked_shr(self.mask_bits).unwrap_or(0);
        if self.mask & ones != ones {
            return Err(SanitizeError::InvalidValue);
        }
        self.filter.sanitize()
    }
}

/// Builder which partitions a "have" set over `2^mask_bits` filters.
pub struct CrdsFilterSet {
    filters: Vec<Bloom<Hash>>,
    mask_bits: u32,
}

impl CrdsFilterSet {
    pub fn new<R: Rng>(rng: &mut R, num_items: usize, max_bytes: usize) -> Self {
        let max_bits = (max_bytes * 8) as f64;
        let max_items = CrdsFilter::max_items(max_bits, FALSE_RATE, KEYS);
        let mask_bits = CrdsFilter::compute_mask_bits(num_items as f64, max_items);
        Self::with_mask_bits(rng, mask_bits, max_items as usize, max_bits as usize)
    }

    /// Explicit partition count, each filter sized for `max_items`.
    pub fn with_mask_bits<R: Rng>(
        rng: &mut R,
        mask_bits: u32,
        max_items: usize,
        max_bits: usize,
    ) -> Self {
        let filters = repeat_with(|| Bloom::random(rng, max_items, FALSE_RATE, max_bits))
            .take(1usize << mask_bits)
            .collect();
        Self { filters, mask_bits }
    }

    pub fn mask_bits(&self) -> u32 {
        self.mask_bits
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn add(&mut self, hash: Hash) {
        let index = CrdsFilter::partition_index(&hash, self.mask_bits);
        self.filters[index].add(&hash);
    }
}

impl From<CrdsFilterSet> for Vec<CrdsFilter> {
    fn from(set: CrdsFilterSet) -> Self {
        let mask_bits = set.mask_bits;
        set.filters
            .into_iter()
            .enumerate()
            .map(|(seed, filter)| CrdsFilter {
                filter,
                mask: CrdsFilter::compute_mask(seed as u64, mask_bits),
                mask_bits,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_bloom_has_no_false_negatives() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut bloom: Bloom<Hash> = Bloom::random(&mut rng, 100, 0.1, 8192);
        let hashes: Vec<Hash> = (0..100).map(|_| Hash(rng.gen())).collect();
        for hash in &hashes {
            bloom.add(hash);
        }
        assert!(hashes.iter().all(|hash| bloom.contains(hash)));
        assert!(bloom.num_bits_set() > 0);
    }

    #[test]
    fn test_bloom_false_positive_rate_is_bounded() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut bloom: Bloom<Hash> = Bloom::random(&mut rng, 1000, 0.1, 1 << 20);
        for _ in 0..1000 {
            bloom.add(&Hash(rng.gen()));
        }
        let false_positives = (0..10_000)
            .filter(|_| bloom.contains(&Hash(rng.gen())))
            .count();
        assert!(false_positives < 2_000, "{false_positives}");
    }

    #[test]
    fn test_bloom_sizing() {
        assert_eq!(Bloom::<Hash>::num_bits(0.0, 0.1), 0.0);
        assert_eq!(Bloom::<Hash>::num_keys(0.0, 0.0), 0.0);
        assert_eq!(Bloom::<Hash>::num_keys(10.0, 1000.0), 1.0);
        let bits = Bloom::<Hash>::num_bits(1000.0, 0.1);
        assert!((4700.0..4900.0).contains(&bits), "{bits}");
    }

    #[test]
    fn test_bloom_clear() {
        let mut bloom: Bloom<Pubkey> = Bloom::new(128, vec![1, 2, 3]);
        let key = Pubkey::new_unique();
        bloom.add(&key);
        assert!(bloom.contains(&key));
        bloom.clear();
        assert!(!bloom.contains(&key));
        assert_eq!(bloom.num_bits_set(), 0);
    }

    #[test]
    fn test_mask_bits() {
        assert_eq!(CrdsFilter::compute_mask_bits(0.0, 100.0), 0);
        assert_eq!(CrdsFilter::compute_mask_bits(100.0, 100.0), 0);
        assert_eq!(CrdsFilter::compute_mask_bits(101.0, 100.0), 1);
        assert_eq!(CrdsFilter::compute_mask_bits(400.0, 100.0), 2);
        assert_eq!(CrdsFilter::compute_mask_bits(401.0, 100.0), 3);
    }

    #[test]
    fn test_compute_mask() {
        assert_eq!(CrdsFilter::compute_mask(0, 0), !0u64);
        assert_eq!(CrdsFilter::compute_mask(0, 1), !0u64 >> 1);
        assert_eq!(CrdsFilter::compute_mask(1, 1), !0u64);
        assert_eq!(CrdsFilter::compute_mask(2, 2), 0xbfff_ffff_ffff_ffff);
    }

    #[test]
    fn test_filter_set_partitions_every_hash_once() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut set = CrdsFilterSet::with_mask_bits(&mut rng, 3, 100, 4096);
        assert_eq!(set.len(), 8);
        let hashes: Vec<Hash> = (0..200).map(|_| Hash(rng.gen())).collect();
        for hash in &hashes {
            set.add(*hash);
        }
        let filters: Vec<CrdsFilter> = set.into();
        for hash in &hashes {
            let covering: Vec<_> = filters.iter().filter(|f| f.test_mask(hash)).collect();
            assert_eq!(covering.len(), 1);
            assert!(covering[0].contains(hash));
        }
        assert!(filters.iter().all(|f| f.sanitize().is_ok()));
    }

    #[test]
    fn test_filter_set_sizing_follows_item_count() {
        let mut rng = StdRng::seed_from_u64(4);
        let max_bytes = 1000;
        let max_items = CrdsFilter::max_items((max_bytes * 8) as f64, FALSE_RATE, KEYS);
        let small = CrdsFilterSet::new(&mut rng, max_items as usize, max_bytes);
        assert_eq!(small.mask_bits(), 0);
        let large = CrdsFilterSet::new(&mut rng, 5 * max_items as usize, max_bytes);
        assert_eq!(large.mask_bits(), 3);
        assert_eq!(large.len(), 8);
    }

    #[test]
    fn test_sanitize_rejects_inconsistent_mask() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut filter = CrdsFilter::new_rand(&mut rng, 10, 512);
        assert!(filter.sanitize().is_ok());
        filter.mask_bits = 65;
        assert_eq!(filter.sanitize(), Err(SanitizeError::ValueOutOfBounds));
        filter.mask_bits = 4;
        filter.mask = 0;
        assert_eq!(filter.sanitize(), Err(SanitizeError::InvalidValue));
    }

    #[test]
    fn test_sanitize_rejects_oversized_bit_count() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut bloom: Bloom<Hash> = Bloom::random(&mut rng, 10, FALSE_RATE, 512);
        assert!(bloom.sanitize().is_ok());

        bloom.num_bits = u64::MAX - 10;
        bloom.bits.clear();
        assert_eq!(bloom.sanitize(), Err(SanitizeError::ValueOutOfBounds));

        bloom.num_bits = MAX_BLOOM_BITS + 64;
        bloom.bits = vec![0; bloom.num_bits.div_ceil(64) as usize];
        assert_eq!(bloom.sanitize(), Err(SanitizeError::ValueOutOfBounds));

        // bit count claims more words than are present
        bloom.num_bits = 640;
        bloom.bits = vec![0; 2];
        assert_eq!(bloom.sanitize(), Err(SanitizeError::InvalidValue));
    }
}
