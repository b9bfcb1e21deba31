//! Stake-bucketed set of push destinations
//!
//! Entry `k` serves values whose effective stake (the smaller of ours and
//! the origin's) falls in bucket `k`. Each peer carries a bloom filter of
//! origins it asked us to stop relaying.

use crate::stakes::StakeTable;
use crds_gossip_core::bloom::Bloom;
use crds_gossip_core::Pubkey;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::warn;

/// Number of stake buckets.
pub const NUM_PUSH_ACTIVE_SET_ENTRIES: usize = 25;

/// Prune filters hold at least this many origins.
const MIN_NUM_BLOOM_ITEMS: usize = 512;
const BLOOM_FALSE_RATE: f64 = 0.1;
const BLOOM_MAX_BITS: usize = 1024 * 8 * 4;

/// `min(bit_length(stake), 24)`: `floor(log2(stake)) + 1`, and 0 for no stake.
pub fn get_stake_bucket(stake: u64) -> usize {
    let bucket = u64::BITS - stake.leading_zeros();
    (bucket as usize).min(NUM_PUSH_ACTIVE_SET_ENTRIES - 1)
}

#[derive(Default)]
struct PushActiveSetEntry(Vec<(Pubkey, Bloom<Pubkey>)>);

pub struct PushActiveSet([PushActiveSetEntry; NUM_PUSH_ACTIVE_SET_ENTRIES]);

impl Default for PushActiveSet {
    fn default() -> Self {
        Self(std::array::from_fn(|_| PushActiveSetEntry::default()))
    }
}

impl PushActiveSet {
    /// Peers that should receive a value from `origin`.
    ///
    /// Peers that pruned `origin` are skipped unless `ignore_prunes`.
    pub fn get_nodes<'a>(
        &'a self,
        pubkey: &Pubkey,
        origin: &'a Pubkey,
        ignore_prunes: bool,
        stakes: &StakeTable,
    ) -> impl Iterator<Item = &'a Pubkey> + 'a {
        let stake = stakes.stake_of(pubkey).min(stakes.stake_of(origin));
        self.entry(stake).get_nodes(origin, ignore_prunes)
    }

    /// Every peer across all buckets, deduplicated.
    pub fn all_nodes(&self) -> Vec<Pubkey> {
        let mut nodes: Vec<Pubkey> = self
            .0
            .iter()
            .flat_map(|entry| entry.0.iter().map(|(node, _)| *node))
            .collect();
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }

    /// Record that `node` no longer wants `origins` relayed by us.
    pub fn prune(&mut self, pubkey: &Pubkey, node: &Pubkey, origins: &[Pubkey], stakes: &StakeTable) {
        let stake = stakes.stake_of(pubkey);
        for origin in origins {
            if origin == pubkey {
                continue;
            }
            let stake = stake.min(stakes.stake_of(origin));
            self.entry_mut(stake).prune(node, origin);
        }
    }

    /// Resample every bucket from `nodes`.
    pub fn rotate<R: Rng>(
        &mut self,
        rng: &mut R,
        size: usize,
        cluster_size: usize,
        nodes: &[Pubkey],
        stakes: &StakeTable,
    ) {
        let num_bloom_filter_items = cluster_size.max(MIN_NUM_BLOOM_ITEMS);
        let buckets: Vec<usize> = nodes
            .iter()
            .map(|node| get_stake_bucket(stakes.stake_of(node)))
            .collect();
        for (k, entry) in self.0.iter_mut().enumerate() {
            let weights: Vec<u64> = buckets
                .iter()
                .map(|bucket| {
                    let bucket = (*bucket).min(k) as u64;
                    (bucket + 1).pow(2)
                })
                .collect();
            entry.rotate(rng, size, num_bloom_filter_items, nodes, &weights);
        }
    }

    fn entry(&self, stake: u64) -> &PushActiveSetEntry {
        &self.0[get_stake_bucket(stake)]
    }

    fn entry_mut(&mut self, stake: u64) -> &mut PushActiveSetEntry {
        &mut self.0[get_stake_bucket(stake)]
    }
}

impl PushActiveSetEntry {
    fn get_nodes<'a>(
        &'a self,
        origin: &'a Pubkey,
        ignore_prunes: bool,
    ) -> impl Iterator<Item = &'a Pubkey> + 'a {
        self.0
            .iter()
            .filter(move |(node, bloom)| {
                node != origin && (ignore_prunes || !bloom.contains(origin))
            })
            .map(|(node, _)| node)
    }

    fn prune(&mut self, node: &Pubkey, origin: &Pubkey) {
        if let Some((_, bloom)) = self.0.iter_mut().find(|(peer, _)| peer == node) {
            bloom.add(origin);
        }
    }

    fn rotate<R: Rng>(
        &mut self,
        rng: &mut R,
        size: usize,
        num_bloom_filter_items: usize,
        nodes: &[Pubkey],
        weights: &[u64],
    ) {
        let candidates: Vec<(Pubkey, u64)> =
            nodes.iter().copied().zip(weights.iter().copied()).collect();
        let selected: Vec<Pubkey> =
            match candidates.choose_multiple_weighted(rng, size, |(_, weight)| *weight as f64) {
                Ok(selected) => selected.map(|(node, _)| *node).collect(),
                Err(e) => {
                    warn!("Active set rotation skipped: {}", e);
                    return;
                }
            };
        let mut old = std::mem::take(&mut self.0);
        for node in selected {
            let bloom = match old.iter().position(|(peer, _)| *peer == node) {
                Some(position) => old.swap_remove(position).1,
                None => {
                    let mut bloom =
                        Bloom::random(rng, num_bloom_filter_items, BLOOM_FALSE_RATE, BLOOM_MAX_BITS);
                    // never echo a peer's own values back to it
                    bloom.add(&node);
                    bloom
                }
            };
            self.0.push((node, bloom));
        }
    }
}
