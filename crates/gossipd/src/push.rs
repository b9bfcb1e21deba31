//! Push side of gossip
//!
//! New table entries are streamed through a cursor and forwarded to a
//! stake-weighted subset of the active set. Receivers track which peers
//! delivered each origin's values first and prune the redundant ones.

use crate::config::GossipParams;
use crate::crds::{Crds, CrdsError, Cursor, GossipRoute};
use crate::push_active_set::PushActiveSet;
use crate::received_cache::ReceivedCache;
use crate::stakes::StakeTable;
use crds_gossip_core::protocol::{split_gossip_messages, MAX_VALUES_PAYLOAD_SIZE};
use crds_gossip_core::{ContactInfo, CrdsKind, CrdsValue, Pubkey};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

/// Stage of an outbound push round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushPhase {
    Idle,
    /// Reading new entries since the push cursor
    Collecting,
    /// Choosing destinations per value
    Selecting,
    /// Packing per-peer batches
    Dispatching,
}

#[derive(Clone, Debug, Default)]
pub struct PushStats {
    pub values_received: u64,
    pub values_accepted: u64,
    pub values_timed_out: u64,
    pub values_duplicate: u64,
    pub values_stale: u64,
    pub values_pushed: u64,
    pub messages_pushed: u64,
    pub prunes_received: u64,
    pub origins_pruned: u64,
}

pub struct CrdsGossipPush {
    active_set: PushActiveSet,
    crds_cursor: Cursor,
    received_cache: ReceivedCache,
    phase: PushPhase,
    stats: PushStats,
}

impl CrdsGossipPush {
    pub fn new(received_cache_capacity: usize) -> Self {
        Self {
            active_set: PushActiveSet::default(),
            crds_cursor: Cursor::default(),
            received_cache: ReceivedCache::new(received_cache_capacity),
            phase: PushPhase::Idle,
            stats: PushStats::default(),
        }
    }

    fn set_phase(&mut self, phase: PushPhase) {
        trace!("Push phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    pub fn phase(&self) -> PushPhase {
        self.phase
    }

    pub fn stats(&self) -> &PushStats {
        &self.stats
    }

    // ===== INBOUND =====

    /// Upsert values pushed by `from`.
    ///
    /// Returns the origins of every value inside the wallclock window;
    /// these are the candidates for [`Self::prune_received_cache`].
    pub fn process_push_message(
        &mut self,
        crds: &mut Crds,
        from: Pubkey,
        values: Vec<CrdsValue>,
        now: u64,
        params: &GossipParams,
    ) -> HashSet<Pubkey> {
        let mut origins = HashSet::new();
        for value in values {
            self.stats.values_received += 1;
            let wallclock = value.wallclock();
            if wallclock.saturating_add(params.push_msg_timeout) < now
                || now.saturating_add(params.push_msg_timeout) < wallclock
            {
                self.stats.values_timed_out += 1;
                continue;
            }
            let origin = value.pubkey();
            let num_dups = match crds.upsert(value, now, GossipRoute::PushMessage) {
                Ok(_) => {
                    self.stats.values_accepted += 1;
                    0
                }
                Err(CrdsError::Duplicate { count }) => {
                    self.stats.values_duplicate += 1;
                    usize::from(count)
                }
                Err(CrdsError::Stale) => {
                    self.stats.values_stale += 1;
                    usize::MAX
                }
            };
            self.received_cache.record(origin, from, num_dups);
            origins.insert(origin);
        }
        origins
    }

    /// Redundant senders per origin: node -> origins it should stop relaying.
    pub fn prune_received_cache(
        &mut self,
        pubkey: &Pubkey,
        origins: impl IntoIterator<Item = Pubkey>,
        stakes: &StakeTable,
        params: &GossipParams,
    ) -> HashMap<Pubkey, HashSet<Pubkey>> {
        let mut prunes: HashMap<Pubkey, HashSet<Pubkey>> = HashMap::new();
        for origin in origins {
            if &origin == pubkey {
                continue;
            }
            let nodes = self.received_cache.prune(
                pubkey,
                origin,
                params.prune_stake_threshold,
                params.min_num_ingress_nodes,
                stakes,
            );
            for node in nodes {
                prunes.entry(node).or_default().insert(origin);
            }
        }
        prunes
    }

    /// Stop pushing `origins` to `node`.
    pub fn process_prune_msg(
        &mut self,
        pubkey: &Pubkey,
        node: &Pubkey,
        origins: &[Pubkey],
        stakes: &StakeTable,
    ) {
        self.stats.prunes_received += 1;
        self.stats.origins_pruned += origins.len() as u64;
        self.active_set.prune(pubkey, node, origins, stakes);
    }

    // ===== OUTBOUND =====

    /// Batches of new values per destination, each fitting one packet.
    pub fn new_push_messages(
        &mut self,
        pubkey: &Pubkey,
        crds: &Crds,
        now: u64,
        stakes: &StakeTable,
        params: &GossipParams,
    ) -> Vec<(Pubkey, Vec<CrdsValue>)> {
        self.set_phase(PushPhase::Collecting);
        let values: Vec<CrdsValue> = crds
            .get_since(&mut self.crds_cursor)
            .map(|entry| &entry.value)
            .filter(|value| {
                let wallclock = value.wallclock();
                wallclock.saturating_add(params.push_msg_timeout) >= now
                    && wallclock <= now.saturating_add(params.push_msg_timeout)
            })
            .cloned()
            .collect();

        self.set_phase(PushPhase::Selecting);
        let mut batches: HashMap<Pubkey, Vec<CrdsValue>> = HashMap::new();
        let everyone = self.active_set.all_nodes();
        for value in values {
            let origin = value.pubkey();
            let kind = value.kind();
            if params.stake_gated.contains(&kind) && stakes.stake_of(&origin) == 0 {
                continue;
            }
            let nodes: Vec<Pubkey> = if &origin == pubkey
                && matches!(kind, CrdsKind::ContactInfo | CrdsKind::Version)
            {
                everyone.clone()
            } else {
                let ignore_prunes = params.always_relay.contains(&kind);
                self.active_set
                    .get_nodes(pubkey, &origin, ignore_prunes, stakes)
                    .take(params.push_fanout)
                    .copied()
                    .collect()
            };
            for node in nodes {
                batches.entry(node).or_default().push(value.clone());
            }
        }

        self.set_phase(PushPhase::Dispatching);
        let mut messages = Vec::new();
        for (node, values) in batches {
            self.stats.values_pushed += values.len() as u64;
            for chunk in split_gossip_messages(MAX_VALUES_PAYLOAD_SIZE, values) {
                messages.push((node, chunk));
            }
        }
        self.stats.messages_pushed += messages.len() as u64;
        self.set_phase(PushPhase::Idle);
        messages
    }

    // ===== ACTIVE SET =====

    /// Resample push destinations from the known reachable nodes.
    pub fn rotate_active_set<R: Rng>(
        &mut self,
        rng: &mut R,
        pubkey: &Pubkey,
        crds: &Crds,
        stakes: &StakeTable,
        params: &GossipParams,
    ) {
        let nodes: Vec<Pubkey> = crds
            .contact_infos()
            .filter_map(|entry| entry.value.contact_info())
            .filter(|node| &node.pubkey != pubkey)
            .filter(|node| ContactInfo::is_valid_address(&node.gossip))
            .filter(|node| {
                params.shred_version == 0
                    || node.shred_version == 0
                    || node.shred_version == params.shred_version
            })
            .map(|node| node.pubkey)
            .collect();
        self.active_set.rotate(
            rng,
            params.push_active_set_size,
            crds.num_pubkeys(),
            &nodes,
            stakes,
        );
        debug!("Rotated push active set over {} candidates", nodes.len());
    }

    pub fn active_peers(&self) -> Vec<Pubkey> {
        self.active_set.all_nodes()
    }
}
