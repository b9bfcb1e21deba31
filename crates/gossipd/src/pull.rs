//! Pull side of gossip
//!
//! A requester summarizes everything it holds (table, purged and failed
//! inserts) in a set of partitioned bloom filters and sends each to a
//! stake-weighted random peer. The responder answers with the values in
//! the filter's partition that the filter does not contain.

use crate::config::GossipParams;
use crate::crds::{Crds, GossipRoute};
use crate::ping_pong::PingCache;
use crate::push_active_set::get_stake_bucket;
use crate::stakes::StakeTable;
use crds_gossip_core::bloom::{CrdsFilter, CrdsFilterSet};
use crds_gossip_core::crypto::KeyPair;
use crds_gossip_core::protocol::Protocol;
use crds_gossip_core::wire::{self, PACKET_DATA_SIZE};
use crds_gossip_core::{ContactInfo, CrdsValue, Hash, Pubkey};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::collections::VecDeque;
use std::net::SocketAddr;
use tracing::{debug, trace};

/// Lower bound on the item count filters are sized for.
pub const MIN_NUM_BLOOM_ITEMS: usize = 512;

/// Room left for the bloom keys of a non-empty filter.
const BLOOM_KEYS_OVERHEAD: usize = 40;

#[derive(Clone, Debug, Default)]
pub struct PullStats {
    pub requests_sent: u64,
    pub requests_received: u64,
    pub values_served: u64,
    pub responses_received: u64,
    pub values_accepted: u64,
    pub values_expired: u64,
    pub values_failed: u64,
}

/// Purge timeout per origin: our own values never expire, staked origins
/// are kept far longer than unstaked ones.
pub fn crds_timeouts<'a>(
    pubkey: Pubkey,
    stakes: &'a StakeTable,
    params: &'a GossipParams,
) -> impl Fn(&Pubkey) -> u64 + 'a {
    move |origin| {
        if *origin == pubkey {
            u64::MAX
        } else if stakes.stake_of(origin) > 0 {
            params.staked_crds_timeout
        } else {
            params.crds_timeout
        }
    }
}

/// Bytes available to a filter in a pull request carrying `caller`.
pub fn max_bloom_filter_bytes(caller: &CrdsValue) -> crds_gossip_core::Result<usize> {
    let empty = Protocol::PullRequest(CrdsFilter::default(), caller.clone());
    let size = wire::serialized_size(&empty)? as usize;
    Ok(PACKET_DATA_SIZE.saturating_sub(size + BLOOM_KEYS_OVERHEAD))
}

/// Response values sorted by what to do with them.
#[derive(Debug, Default)]
pub struct PullResponseValues {
    /// Fresh and newer than what we hold
    pub active: Vec<CrdsValue>,
    /// Newer than what we hold but past the origin's timeout
    pub expired: Vec<CrdsValue>,
    /// Hashes to report as held in future requests
    pub failed: Vec<Hash>,
}

#[derive(Default)]
pub struct CrdsGossipPull {
    /// Hashes of response values we did not store, with their time
    failed_inserts: VecDeque<(Hash, u64)>,
    stats: PullStats,
}

impl CrdsGossipPull {
    pub fn stats(&self) -> &PullStats {
        &self.stats
    }

    pub fn num_failed_inserts(&self) -> usize {
        self.failed_inserts.len()
    }

    // ===== REQUESTER =====

    /// Reachable peers with their selection weights.
    pub fn pull_peers(
        &self,
        pubkey: &Pubkey,
        crds: &Crds,
        now: u64,
        stakes: &StakeTable,
        params: &GossipParams,
    ) -> Vec<(ContactInfo, u64)> {
        let self_stake = stakes.stake_of(pubkey);
        let active_cutoff = now.saturating_sub(params.pull_active_window);
        crds.contact_infos()
            .filter(|entry| entry.local_timestamp >= active_cutoff)
            .filter_map(|entry| entry.value.contact_info())
            .filter(|node| &node.pubkey != pubkey)
            .filter(|node| ContactInfo::is_valid_address(&node.gossip))
            .filter(|node| {
                params.shred_version == 0
                    || node.shred_version == 0
                    || node.shred_version == params.shred_version
            })
            .map(|node| {
                let stake = self_stake.min(stakes.stake_of(&node.pubkey));
                let bucket = get_stake_bucket(stake) as u64;
                (node.clone(), (bucket + 1).pow(2))
            })
            .collect()
    }

    /// Filters covering everything we hold, split so each fits `bloom_size` bytes.
    pub fn build_crds_filters<R: Rng>(
        &self,
        rng: &mut R,
        crds: &Crds,
        bloom_size: usize,
    ) -> Vec<CrdsFilter> {
        let num_items = crds.len() + crds.num_purged() + self.failed_inserts.len();
        let num_items = num_items.max(MIN_NUM_BLOOM_ITEMS);
        let mut filters = CrdsFilterSet::new(rng, num_items, bloom_size);
        crds.values()
            .map(|entry| *entry.value.hash())
            .chain(crds.purged().copied())
            .chain(self.failed_inserts.iter().map(|(hash, _)| *hash))
            .for_each(|hash| filters.add(hash));
        filters.into()
    }

    /// Pull requests for this cycle, plus pings to peers not yet verified.
    ///
    /// Each filter goes to one verified peer picked by weight. Entrypoints
    /// whose identity is still unknown get one random filter each.
    #[allow(clippy::too_many_arguments)]
    pub fn new_pull_requests<R: Rng>(
        &mut self,
        rng: &mut R,
        keypair: &KeyPair,
        self_value: &CrdsValue,
        crds: &Crds,
        ping_cache: &mut PingCache,
        entrypoints: &[SocketAddr],
        now: u64,
        stakes: &StakeTable,
        params: &GossipParams,
    ) -> Vec<(SocketAddr, Protocol)> {
        let mut out = Vec::new();
        let mut peers = Vec::new();
        let mut weights = Vec::new();
        for (node, weight) in self.pull_peers(&keypair.pubkey(), crds, now, stakes, params) {
            let (verified, ping) = ping_cache.check(rng, keypair, now, (node.pubkey, node.gossip));
            if let Some(ping) = ping {
                out.push((node.gossip, Protocol::PingMessage(ping)));
            }
            if verified {
                peers.push(node.gossip);
                weights.push(weight);
            }
        }
        if peers.is_empty() && entrypoints.is_empty() {
            trace!("No pull peers");
            return out;
        }
        let bloom_size = match max_bloom_filter_bytes(self_value) {
            Ok(size) if size > 0 => size,
            Ok(_) => return out,
            Err(e) => {
                debug!("Cannot size pull filters: {}", e);
                return out;
            }
        };
        let mut filters = self.build_crds_filters(rng, crds, bloom_size);

        for entrypoint in entrypoints {
            if filters.is_empty() {
                break;
            }
            let filter = filters[rng.gen_range(0..filters.len())].clone();
            out.push((*entrypoint, Protocol::PullRequest(filter, self_value.clone())));
            self.stats.requests_sent += 1;
        }
        if let Ok(index) = WeightedIndex::new(&weights) {
            for filter in filters.drain(..) {
                let peer = peers[index.sample(rng)];
                out.push((peer, Protocol::PullRequest(filter, self_value.clone())));
                self.stats.requests_sent += 1;
            }
        }
        out
    }

    // ===== RESPONDER =====

    /// Store the callers of incoming requests and refresh their records.
    pub fn process_pull_requests(
        &mut self,
        crds: &mut Crds,
        callers: impl IntoIterator<Item = CrdsValue>,
        now: u64,
    ) {
        for caller in callers {
            self.stats.requests_received += 1;
            let origin = caller.pubkey();
            if let Err(e) = crds.upsert(caller, now, GossipRoute::PullRequest) {
                trace!("Pull request caller {} not stored: {}", origin, e);
            }
            crds.update_record_timestamp(&origin, now);
        }
    }

    /// Values in `filter`'s partition that the requester is missing.
    ///
    /// Values newer than the caller's wallclock and stake-gated kinds from
    /// unstaked origins are withheld.
    pub fn generate_pull_responses(
        &mut self,
        crds: &Crds,
        caller: &CrdsValue,
        filter: &CrdsFilter,
        stakes: &StakeTable,
        params: &GossipParams,
    ) -> Vec<CrdsValue> {
        let caller_wallclock = caller.wallclock();
        let values: Vec<CrdsValue> = crds
            .filter_bitmask(filter.mask(), filter.mask_bits())
            .map(|entry| &entry.value)
            .filter(|value| value.wallclock() <= caller_wallclock)
            .filter(|value| !filter.filter_contains(value.hash()))
            .filter(|value| {
                !params.stake_gated.contains(&value.kind()) || stakes.stake_of(&value.pubkey()) > 0
            })
            .take(params.pull_response_limit)
            .cloned()
            .collect();
        self.stats.values_served += values.len() as u64;
        values
    }

    // ===== RESPONSES =====

    /// Split response values by whether and how they should be stored.
    pub fn filter_pull_responses(
        &self,
        crds: &Crds,
        timeouts: impl Fn(&Pubkey) -> u64,
        values: Vec<CrdsValue>,
        now: u64,
    ) -> PullResponseValues {
        let mut out = PullResponseValues::default();
        for value in values {
            if !crds.would_accept(&value) {
                out.failed.push(*value.hash());
                continue;
            }
            let origin = value.pubkey();
            let timeout = timeouts(&origin);
            let wallclock = value.wallclock();
            let fresh = now <= wallclock.saturating_add(timeout)
                && wallclock <= now.saturating_add(timeout);
            if fresh {
                out.active.push(value);
            } else if crds.get_contact_info(&origin).is_some() {
                out.expired.push(value);
            } else {
                out.failed.push(*value.hash());
            }
        }
        out
    }

    /// Store filtered response values; returns how many were inserted.
    pub fn process_pull_responses(
        &mut self,
        crds: &mut Crds,
        from: &Pubkey,
        values: PullResponseValues,
        now: u64,
    ) -> usize {
        self.stats.responses_received += 1;
        let mut num_inserts = 0;
        for value in values.active {
            let origin = value.pubkey();
            if crds.upsert(value, now, GossipRoute::PullResponse).is_ok() {
                num_inserts += 1;
                crds.update_record_timestamp(&origin, now);
            }
        }
        self.stats.values_accepted += num_inserts as u64;
        for value in values.expired {
            if crds.upsert(value, now, GossipRoute::PullResponse).is_ok() {
                num_inserts += 1;
                self.stats.values_expired += 1;
            }
        }
        crds.update_record_timestamp(from, now);
        self.stats.values_failed += values.failed.len() as u64;
        self.failed_inserts
            .extend(values.failed.into_iter().map(|hash| (hash, now)));
        num_inserts
    }

    /// Drop failed-insert hashes older than `retention`.
    pub fn purge_failed_inserts(&mut self, now: u64, retention: u64) {
        let cutoff = now.saturating_sub(retention);
        while let Some((_, timestamp)) = self.failed_inserts.front() {
            if *timestamp >= cutoff {
                break;
            }
            self.failed_inserts.pop_front();
        }
    }
}
