//! Per-origin record of which peers delivered push traffic first
//!
//! Peers that keep delivering an origin's values late are redundant paths;
//! once enough values from an origin have arrived they are pruned.

use crate::stakes::StakeTable;
use crds_gossip_core::Pubkey;
use lru::LruCache;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::num::NonZeroUsize;

/// Accepted values from an origin before its senders are ranked.
pub const NUM_UPSERTS_THRESHOLD: usize = 20;

/// A sender scores when it delivered a value as 1st or 2nd.
const NUM_DUPS_THRESHOLD: usize = 2;

#[derive(Debug, Default)]
struct ReceivedCacheEntry {
    /// sender -> score
    nodes: HashMap<Pubkey, usize>,
    num_upserts: usize,
}

impl ReceivedCacheEntry {
    /// `num_dups` is how many copies of the value arrived before this one.
    fn record(&mut self, node: Pubkey, num_dups: usize) {
        if num_dups == 0 {
            self.num_upserts = self.num_upserts.saturating_add(1);
        }
        let score = self.nodes.entry(node).or_default();
        if num_dups < NUM_DUPS_THRESHOLD {
            *score = score.saturating_add(1);
        }
    }

    /// Senders outside the minimal prefix, ranked by (score, stake), that
    /// holds at least `min_ingress_nodes` and exceeds `min_ingress_stake`.
    ///
    /// A zero threshold is exceeded by any prefix, so only the node floor applies.
    fn prune(
        self,
        origin: &Pubkey,
        min_ingress_stake: f64,
        min_ingress_nodes: usize,
        stakes: &StakeTable,
    ) -> Vec<Pubkey> {
        let mut nodes: Vec<(usize, u64, Pubkey)> = self
            .nodes
            .into_iter()
            .map(|(node, score)| (score, stakes.stake_of(&node), node))
            .collect();
        nodes.sort_unstable_by_key(|(score, stake, node)| Reverse((*score, *stake, *node)));

        let mut cumulative_stake = 0u64;
        let mut pruned = Vec::new();
        for (i, (_, stake, node)) in nodes.into_iter().enumerate() {
            let below_threshold =
                min_ingress_stake > 0.0 && cumulative_stake as f64 <= min_ingress_stake;
            if i < min_ingress_nodes || below_threshold {
                cumulative_stake = cumulative_stake.saturating_add(stake);
            } else if &node != origin {
                pruned.push(node);
            }
        }
        pruned
    }
}

pub struct ReceivedCache(LruCache<Pubkey, ReceivedCacheEntry>);

impl ReceivedCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self(LruCache::new(capacity))
    }

    pub fn record(&mut self, origin: Pubkey, node: Pubkey, num_dups: usize) {
        match self.0.get_mut(&origin) {
            Some(entry) => entry.record(node, num_dups),
            None => {
                let mut entry = ReceivedCacheEntry::default();
                entry.record(node, num_dups);
                self.0.put(origin, entry);
            }
        }
    }

    /// Senders of `origin`'s values to prune, if enough values have arrived.
    ///
    /// Evaluating resets the origin's entry.
    pub fn prune(
        &mut self,
        pubkey: &Pubkey,
        origin: Pubkey,
        stake_threshold: f64,
        min_ingress_nodes: usize,
        stakes: &StakeTable,
    ) -> Vec<Pubkey> {
        match self.0.peek(&origin) {
            Some(entry) if entry.num_upserts >= NUM_UPSERTS_THRESHOLD => {}
            _ => return Vec::new(),
        }
        let Some(entry) = self.0.pop(&origin) else {
            return Vec::new();
        };
        let min_stake = stakes.stake_of(pubkey).min(stakes.stake_of(&origin));
        let min_ingress_stake = min_stake as f64 * stake_threshold;
        entry.prune(&origin, min_ingress_stake, min_ingress_nodes, stakes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
