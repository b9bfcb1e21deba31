//! Hash-prefix shard index over the table
//!
//! Entries are bucketed by the top `shard_bits` bits of their value hash, so
//! a pull filter of any mask width can be answered without scanning the
//! whole table.

use std::cmp::Ordering;
use std::collections::HashMap;

/// Bucket bits of the index.
pub const CRDS_SHARDS_BITS: u32 = 12;

pub struct CrdsShards {
    // slot index -> leading 8 bytes of the value hash
    shards: Vec<HashMap<usize, u64>>,
    shard_bits: u32,
}

impl CrdsShards {
    pub fn new(shard_bits: u32) -> Self {
        CrdsShards {
            shards: vec![HashMap::new(); 1 << shard_bits],
            shard_bits,
        }
    }

    pub fn shard_bits(&self) -> u32 {
        self.shard_bits
    }

    fn shard_index(&self, hash: u64) -> usize {
        hash.checked_shr(64 - self.shard_bits).unwrap_or(0) as usize
    }

    /// Returns false if `index` was already present in its bucket.
    pub fn insert(&mut self, index: usize, hash: u64) -> bool {
        let shard_index = self.shard_index(hash);
        self.shards[shard_index].insert(index, hash).is_none()
    }

    /// Returns false if `index` was not present.
    pub fn remove(&mut self, index: usize, hash: u64) -> bool {
        let shard_index = self.shard_index(hash);
        self.shards[shard_index].remove(&index).is_some()
    }

    /// Slot indices of entries whose hash matches the top `mask_bits` bits of `mask`.
    pub fn find(&self, mask: u64, mask_bits: u32) -> Box<dyn Iterator<Item = usize> + '_> {
        let ones = (!0u64).checked_shr(mask_bits).unwrap_or(0);
        let mask = mask | ones;
        match self.shard_bits.cmp(&mask_bits) {
            Ordering::Less => {
                let shard = &self.shards[self.shard_index(mask)];
                Box::new(
                    shard
                        .iter()
                        .filter(move |(_, hash)| **hash | ones == mask)
                        .map(|(index, _)| *index),
                )
            }
            Ordering::Equal => {
                let shard = &self.shards[self.shard_index(mask)];
                Box::new(shard.keys().copied())
            }
            Ordering::Greater => {
                let count = 1usize << (self.shard_bits - mask_bits);
                let start = self.shard_index(mask & !ones);
                Box::new(
                    self.shards[start..start + count]
                        .iter()
                        .flat_map(|shard| shard.keys().copied()),
                )
            }
        }
    }

    /// Whether `index` with `hash` is held by exactly one bucket, the right one.
    pub fn check(&self, index: usize, hash: u64) -> bool {
        let shard_index = self.shard_index(hash);
        let holders = self
            .shards
            .iter()
            .filter(|shard| shard.contains_key(&index))
            .count();
        holders == 1 && self.shards[shard_index].get(&index) == Some(&hash)
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(HashMap::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;

    fn matches(hash: u64, mask: u64, mask_bits: u32) -> bool {
        let ones = (!0u64).checked_shr(mask_bits).unwrap_or(0);
        (hash | ones) == (mask | ones)
    }

    fn check_find(shards: &CrdsShards, hashes: &[u64], mask: u64, mask_bits: u32) {
        let found: HashSet<usize> = shards.find(mask, mask_bits).collect();
        let expected: HashSet<usize> = hashes
            .iter()
            .enumerate()
            .filter(|(_, hash)| matches(**hash, mask, mask_bits))
            .map(|(index, _)| index)
            .collect();
        assert_eq!(found, expected, "mask_bits {mask_bits}");
    }

    #[test]
    fn test_find_all_mask_widths() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut shards = CrdsShards::new(CRDS_SHARDS_BITS);
        let hashes: Vec<u64> = (0..4096).map(|_| rng.gen()).collect();
        for (index, hash) in hashes.iter().enumerate() {
            assert!(shards.insert(index, *hash));
        }
        assert_eq!(shards.len(), hashes.len());

        for mask_bits in [0, 1, 5, CRDS_SHARDS_BITS, CRDS_SHARDS_BITS + 1, 20] {
            for _ in 0..8 {
                // masks taken from existing hashes so that the deep cases hit something
                let mask = hashes[rng.gen_range(0..hashes.len())];
                check_find(&shards, &hashes, mask, mask_bits);
            }
        }
    }

    #[test]
    fn test_insert_remove_consistency() {
        let mut rng = StdRng::seed_from_u64(12);
        let mut shards = CrdsShards::new(CRDS_SHARDS_BITS);
        let hashes: Vec<u64> = (0..256).map(|_| rng.gen()).collect();
        for (index, hash) in hashes.iter().enumerate() {
            shards.insert(index, *hash);
        }
        for (index, hash) in hashes.iter().enumerate().step_by(2) {
            assert!(shards.remove(index, *hash));
            assert!(!shards.remove(index, *hash));
        }
        for (index, hash) in hashes.iter().enumerate() {
            assert_eq!(shards.check(index, *hash), index % 2 == 1);
        }
        assert_eq!(shards.len(), 128);
    }

    #[test]
    fn test_zero_mask_bits_returns_everything() {
        let mut shards = CrdsShards::new(4);
        for index in 0..10 {
            shards.insert(index, (index as u64) << 60);
        }
        assert_eq!(shards.find(0, 0).count(), 10);
        assert!(!shards.is_empty());
    }
}
