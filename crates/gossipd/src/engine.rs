//! Gossip engine
//!
//! Owns the table, the push and pull state and the liveness cache. The
//! processing stage feeds it verified packets and cycle ticks; it answers
//! with the messages to send. Nothing here touches the network.

use crate::config::GossipParams;
use crate::crds::{Crds, CrdsStats, GossipRoute};
use crate::ping_pong::PingCache;
use crate::pull::{crds_timeouts, CrdsGossipPull, PullStats};
use crate::push::{CrdsGossipPush, PushStats};
use crate::scheduler::{CyclePhase, GossipScheduler};
use crate::stakes::StakeTable;
use crds_gossip_core::bloom::CrdsFilter;
use crds_gossip_core::crypto::KeyPair;
use crds_gossip_core::protocol::{
    split_gossip_messages, Ping, Pong, Protocol, PruneData, MAX_PRUNE_DATA_NODES,
    MAX_VALUES_PAYLOAD_SIZE,
};
use crds_gossip_core::{
    ContactInfo, CrdsData, CrdsKind, CrdsValue, CrdsValueLabel, NodeInstance, Pubkey, Version,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::{debug, error, info, trace};

/// Reasons an inbound message was dropped.
#[derive(Debug, Error)]
pub enum GossipError {
    #[error("Every pushed value is outside the wallclock window")]
    PushMessageTimeout,
    #[error("Pull request caller wallclock {0} outside the accepted window")]
    PullRequestExpired(u64),
    #[error("Prune message addressed to {0}")]
    BadPruneDestination(Pubkey),
    #[error("Prune message wallclock {0} too old")]
    PruneMessageTimeout(u64),
    #[error("Prune message from {0} signed by another node")]
    UnauthorizedPrune(Pubkey),
    #[error("Peer {0} has not answered a ping")]
    PeerNotVerified(Pubkey),
    #[error("Core error: {0}")]
    Core(#[from] crds_gossip_core::Error),
}

/// Drop and traffic counters.
#[derive(Clone, Debug, Default)]
pub struct GossipStats {
    pub packets_handled: u64,
    pub push_message_timeouts: u64,
    pub pull_requests_expired: u64,
    pub bad_prune_destinations: u64,
    pub prune_message_timeouts: u64,
    pub unauthorized_prunes: u64,
    pub peers_not_verified: u64,
    pub core_errors: u64,
    pub prunes_sent: u64,
    pub pings_sent: u64,
    pub pongs_sent: u64,
    pub pongs_accepted: u64,
    pub values_purged: u64,
}

/// Snapshot returned by [`GossipEngine::stats`].
#[derive(Clone, Debug)]
pub struct EngineStats {
    pub gossip: GossipStats,
    pub push: PushStats,
    pub pull: PullStats,
    pub crds: CrdsStats,
    pub num_values: usize,
    pub num_nodes: usize,
    pub num_purged: usize,
    pub num_active_peers: usize,
    pub num_cycles: u64,
}

/// Result of one gossip cycle.
#[derive(Debug, Default)]
pub struct CycleOutput {
    /// Phases executed, in order
    pub phases: Vec<CyclePhase>,
    /// Messages to send, in the order they were produced
    pub messages: Vec<(SocketAddr, Protocol)>,
}

pub struct GossipEngine {
    keypair: KeyPair,
    params: GossipParams,
    contact_info: ContactInfo,
    instance: NodeInstance,
    entrypoints: Vec<SocketAddr>,
    crds: Crds,
    push: CrdsGossipPush,
    pull: CrdsGossipPull,
    ping_cache: PingCache,
    stakes: StakeTable,
    scheduler: GossipScheduler,
    rng: StdRng,
    stats: GossipStats,
    superseded: bool,
}

impl GossipEngine {
    pub fn new(
        keypair: KeyPair,
        gossip_addr: SocketAddr,
        entrypoints: Vec<SocketAddr>,
        stakes: StakeTable,
        params: GossipParams,
        now: u64,
    ) -> Result<Self, GossipError> {
        Self::with_rng(
            keypair,
            gossip_addr,
            entrypoints,
            stakes,
            params,
            now,
            StdRng::from_entropy(),
        )
    }

    /// Same as [`GossipEngine::new`] with a caller supplied rng.
    pub fn with_rng(
        keypair: KeyPair,
        gossip_addr: SocketAddr,
        entrypoints: Vec<SocketAddr>,
        stakes: StakeTable,
        params: GossipParams,
        now: u64,
        rng: StdRng,
    ) -> Result<Self, GossipError> {
        let pubkey = keypair.pubkey();
        let mut contact_info = ContactInfo::new(pubkey, now, gossip_addr);
        contact_info.shred_version = params.shred_version;
        let mut engine = Self {
            instance: NodeInstance::new(pubkey, now),
            contact_info,
            entrypoints,
            crds: Crds::new(),
            push: CrdsGossipPush::new(params.received_cache_capacity),
            pull: CrdsGossipPull::default(),
            ping_cache: PingCache::new(
                params.ping_cache_ttl,
                params.ping_rate_limit_delay,
                params.ping_cache_capacity,
            ),
            scheduler: GossipScheduler::new(params.rotate_interval),
            stakes,
            params,
            keypair,
            rng,
            stats: GossipStats::default(),
            superseded: false,
        };
        engine.refresh_identity(now)?;
        Ok(engine)
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn contact_info(&self) -> &ContactInfo {
        &self.contact_info
    }

    pub fn crds(&self) -> &Crds {
        &self.crds
    }

    /// Another process with our identity and a later start was observed.
    pub fn is_superseded(&self) -> bool {
        self.superseded
    }

    pub fn set_stakes(&mut self, stakes: StakeTable) {
        self.stakes = stakes;
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            gossip: self.stats.clone(),
            push: self.push.stats().clone(),
            pull: self.pull.stats().clone(),
            crds: self.crds.stats().clone(),
            num_values: self.crds.len(),
            num_nodes: self.crds.num_nodes(),
            num_purged: self.crds.num_purged(),
            num_active_peers: self.push.active_peers().len(),
            num_cycles: self.scheduler.num_cycles(),
        }
    }

    // ===== LOCAL VALUES =====

    /// Re-sign our contact info, version and node instance at `now`.
    pub fn refresh_identity(&mut self, now: u64) -> Result<(), GossipError> {
        self.contact_info.wallclock = now;
        self.instance = self.instance.with_wallclock(now);
        let version = Version {
            from: self.pubkey(),
            wallclock: now,
            major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or_default(),
            minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or_default(),
            patch: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or_default(),
            commit: 0,
            feature_set: 0,
        };
        for data in [
            CrdsData::ContactInfo(self.contact_info.clone()),
            CrdsData::Version(version),
            CrdsData::NodeInstance(self.instance.clone()),
        ] {
            let value = CrdsValue::new_signed(data, &self.keypair)?;
            if let Err(e) = self.crds.upsert(value, now, GossipRoute::LocalMessage) {
                trace!("Local value not refreshed: {}", e);
            }
        }
        Ok(())
    }

    /// Insert a locally produced value signed by us.
    pub fn push_local_value(&mut self, data: CrdsData, now: u64) -> Result<(), GossipError> {
        let value = CrdsValue::new_signed(data, &self.keypair)?;
        if let Err(e) = self.crds.upsert(value, now, GossipRoute::LocalMessage) {
            debug!("Local value rejected: {}", e);
        }
        Ok(())
    }

    /// Contact infos of other nodes, for persistence.
    pub fn contact_info_snapshot(&self) -> Vec<CrdsValue> {
        let pubkey = self.pubkey();
        self.crds
            .contact_infos()
            .map(|entry| &entry.value)
            .filter(|value| value.pubkey() != pubkey)
            .cloned()
            .collect()
    }

    /// Feed previously persisted contact infos back into the table.
    ///
    /// Values are verified and go through the regular upsert path.
    pub fn restore_contact_infos(&mut self, values: Vec<CrdsValue>, now: u64) -> usize {
        let pubkey = self.pubkey();
        let mut restored = 0;
        for value in values {
            if value.kind() != CrdsKind::ContactInfo || value.pubkey() == pubkey {
                continue;
            }
            if value.verify().is_err() {
                continue;
            }
            if self.crds.upsert(value, now, GossipRoute::PullResponse).is_ok() {
                restored += 1;
            }
        }
        restored
    }

    fn self_value(&self) -> Option<CrdsValue> {
        self.crds
            .get(&CrdsValueLabel::contact_info(self.pubkey()))
            .map(|entry| entry.value.clone())
    }

    fn gossip_addr_of(&self, pubkey: &Pubkey) -> Option<SocketAddr> {
        self.crds
            .get_contact_info(pubkey)
            .map(|node| node.gossip)
            .filter(ContactInfo::is_valid_address)
    }

    // ===== INBOUND =====

    /// Handle one verified message from `from_addr`; returns replies.
    ///
    /// Drops are counted in [`GossipStats`] and never fail the caller.
    pub fn handle_packet(
        &mut self,
        from_addr: SocketAddr,
        message: Protocol,
        now: u64,
    ) -> Vec<(SocketAddr, Protocol)> {
        self.stats.packets_handled += 1;
        let name = message.name();
        let mut out = Vec::new();
        let result = match message {
            Protocol::PullRequest(filter, caller) => {
                self.handle_pull_request(from_addr, filter, caller, now, &mut out)
            }
            Protocol::PullResponse(from, values) => {
                self.handle_pull_response(from, values, now);
                Ok(())
            }
            Protocol::PushMessage(from, values) => self.handle_push_message(from, values, now, &mut out),
            Protocol::PruneMessage(from, data) => self.handle_prune_message(from, data, now),
            Protocol::PingMessage(ping) => {
                self.handle_ping(from_addr, ping, &mut out);
                Ok(())
            }
            Protocol::PongMessage(pong) => {
                self.handle_pong(from_addr, pong, now);
                Ok(())
            }
        };
        if let Err(e) = result {
            debug!("Dropped {} from {}: {}", name, from_addr, e);
            self.record_error(&e);
        }
        out
    }

    fn record_error(&mut self, error: &GossipError) {
        let counter = match error {
            GossipError::PushMessageTimeout => &mut self.stats.push_message_timeouts,
            GossipError::PullRequestExpired(_) => &mut self.stats.pull_requests_expired,
            GossipError::BadPruneDestination(_) => &mut self.stats.bad_prune_destinations,
            GossipError::PruneMessageTimeout(_) => &mut self.stats.prune_message_timeouts,
            GossipError::UnauthorizedPrune(_) => &mut self.stats.unauthorized_prunes,
            GossipError::PeerNotVerified(_) => &mut self.stats.peers_not_verified,
            GossipError::Core(_) => &mut self.stats.core_errors,
        };
        *counter += 1;
    }

    fn handle_pull_request(
        &mut self,
        from_addr: SocketAddr,
        filter: CrdsFilter,
        caller: CrdsValue,
        now: u64,
        out: &mut Vec<(SocketAddr, Protocol)>,
    ) -> Result<(), GossipError> {
        let caller_pubkey = caller.pubkey();
        if caller_pubkey == self.pubkey() {
            return Ok(());
        }
        let wallclock = caller.wallclock();
        if now.abs_diff(wallclock) > self.params.pull_request_timeout {
            return Err(GossipError::PullRequestExpired(wallclock));
        }
        self.pull
            .process_pull_requests(&mut self.crds, [caller.clone()], now);

        let (verified, ping) =
            self.ping_cache
                .check(&mut self.rng, &self.keypair, now, (caller_pubkey, from_addr));
        if let Some(ping) = ping {
            self.stats.pings_sent += 1;
            out.push((from_addr, Protocol::PingMessage(ping)));
        }
        if !verified {
            return Err(GossipError::PeerNotVerified(caller_pubkey));
        }

        let values =
            self.pull
                .generate_pull_responses(&self.crds, &caller, &filter, &self.stakes, &self.params);
        let pubkey = self.pubkey();
        for chunk in split_gossip_messages(MAX_VALUES_PAYLOAD_SIZE, values) {
            out.push((from_addr, Protocol::PullResponse(pubkey, chunk)));
        }
        Ok(())
    }

    fn handle_pull_response(&mut self, from: Pubkey, values: Vec<CrdsValue>, now: u64) {
        self.check_duplicate_instance(&values);
        let timeouts = crds_timeouts(self.pubkey(), &self.stakes, &self.params);
        let values = self
            .pull
            .filter_pull_responses(&self.crds, timeouts, values, now);
        let num_inserts = self
            .pull
            .process_pull_responses(&mut self.crds, &from, values, now);
        trace!("Pull response from {}: {} inserted", from, num_inserts);
    }

    fn handle_push_message(
        &mut self,
        from: Pubkey,
        values: Vec<CrdsValue>,
        now: u64,
        out: &mut Vec<(SocketAddr, Protocol)>,
    ) -> Result<(), GossipError> {
        self.check_duplicate_instance(&values);
        let num_values = values.len() as u64;
        let timeouts_before = self.push.stats().values_timed_out;
        let origins =
            self.push
                .process_push_message(&mut self.crds, from, values, now, &self.params);
        if self.push.stats().values_timed_out - timeouts_before == num_values {
            return Err(GossipError::PushMessageTimeout);
        }

        let pubkey = self.pubkey();
        let prunes = self
            .push
            .prune_received_cache(&pubkey, origins, &self.stakes, &self.params);
        for (node, origins) in prunes {
            let Some(addr) = self.gossip_addr_of(&node) else {
                continue;
            };
            let origins: Vec<Pubkey> = origins.into_iter().collect();
            for chunk in origins.chunks(MAX_PRUNE_DATA_NODES) {
                let data = PruneData::new_signed(&self.keypair, chunk.to_vec(), node, now)?;
                self.stats.prunes_sent += 1;
                out.push((addr, Protocol::PruneMessage(pubkey, data)));
            }
        }
        Ok(())
    }

    fn handle_prune_message(
        &mut self,
        from: Pubkey,
        data: PruneData,
        now: u64,
    ) -> Result<(), GossipError> {
        if from != data.pubkey {
            return Err(GossipError::UnauthorizedPrune(from));
        }
        if data.destination != self.pubkey() {
            return Err(GossipError::BadPruneDestination(data.destination));
        }
        if data.wallclock.saturating_add(self.params.prune_msg_timeout) < now {
            return Err(GossipError::PruneMessageTimeout(data.wallclock));
        }
        let pubkey = self.pubkey();
        self.push
            .process_prune_msg(&pubkey, &data.pubkey, &data.prunes, &self.stakes);
        Ok(())
    }

    fn handle_ping(&mut self, from_addr: SocketAddr, ping: Ping, out: &mut Vec<(SocketAddr, Protocol)>) {
        self.stats.pongs_sent += 1;
        out.push((from_addr, Protocol::PongMessage(Pong::new(&ping, &self.keypair))));
    }

    fn handle_pong(&mut self, from_addr: SocketAddr, pong: Pong, now: u64) {
        if self.ping_cache.add(&pong, from_addr, now) {
            self.stats.pongs_accepted += 1;
        }
    }

    fn check_duplicate_instance(&mut self, values: &[CrdsValue]) {
        for value in values {
            if let CrdsData::NodeInstance(other) = value.data() {
                if self.instance.check_duplicate(other) {
                    error!(
                        "Duplicate running instance of {} detected (token {})",
                        other.from, other.token
                    );
                    self.superseded = true;
                }
            }
        }
    }

    // ===== CYCLE =====

    /// Run one scheduled gossip cycle at `now`.
    pub fn run_cycle(&mut self, now: u64) -> CycleOutput {
        let phases = self.scheduler.plan(now);
        let mut output = CycleOutput {
            phases: phases.to_vec(),
            messages: Vec::new(),
        };
        let mut pending = Vec::new();
        let pubkey = self.pubkey();
        for phase in phases {
            trace!("Cycle phase {:?}", phase);
            match phase {
                CyclePhase::Rotate => {
                    self.push.rotate_active_set(
                        &mut self.rng,
                        &pubkey,
                        &self.crds,
                        &self.stakes,
                        &self.params,
                    );
                    let stats = self.stats();
                    info!(
                        values = stats.num_values,
                        nodes = stats.num_nodes,
                        active_peers = stats.num_active_peers,
                        pushed = stats.push.values_pushed,
                        pull_requests = stats.pull.requests_sent,
                        prunes_sent = stats.gossip.prunes_sent,
                        "Gossip stats"
                    );
                }
                CyclePhase::RefreshIdentity => {
                    if let Err(e) = self.refresh_identity(now) {
                        error!("Failed to refresh identity values: {}", e);
                    }
                }
                CyclePhase::Push => {
                    let messages = self.push.new_push_messages(
                        &pubkey,
                        &self.crds,
                        now,
                        &self.stakes,
                        &self.params,
                    );
                    for (node, values) in messages {
                        if let Some(addr) = self.gossip_addr_of(&node) {
                            pending.push((addr, Protocol::PushMessage(pubkey, values)));
                        }
                    }
                }
                CyclePhase::Pull => {
                    let Some(self_value) = self.self_value() else {
                        continue;
                    };
                    let entrypoints = self.unknown_entrypoints();
                    let requests = self.pull.new_pull_requests(
                        &mut self.rng,
                        &self.keypair,
                        &self_value,
                        &self.crds,
                        &mut self.ping_cache,
                        &entrypoints,
                        now,
                        &self.stakes,
                        &self.params,
                    );
                    pending.extend(requests);
                }
                CyclePhase::Ping => {
                    for node in self.push.active_peers() {
                        let Some(addr) = self.gossip_addr_of(&node) else {
                            continue;
                        };
                        let (_, ping) =
                            self.ping_cache
                                .check(&mut self.rng, &self.keypair, now, (node, addr));
                        if let Some(ping) = ping {
                            pending.push((addr, Protocol::PingMessage(ping)));
                        }
                    }
                }
                CyclePhase::Dispatch => {
                    self.stats.pings_sent += pending
                        .iter()
                        .filter(|(_, message)| matches!(message, Protocol::PingMessage(_)))
                        .count() as u64;
                    output.messages.append(&mut pending);
                }
                CyclePhase::Purge => {
                    let timeouts = crds_timeouts(pubkey, &self.stakes, &self.params);
                    let purged = self.crds.purge_older_than(now, timeouts);
                    if purged > 0 {
                        debug!("Purged {} values", purged);
                    }
                    self.stats.values_purged += purged as u64;
                    let retention = self.params.purged_retention;
                    self.crds.trim_purged(now.saturating_sub(retention));
                    self.pull.purge_failed_inserts(now, retention);
                }
            }
        }
        output
    }

    /// Entrypoints not yet matched by a known contact info.
    fn unknown_entrypoints(&self) -> Vec<SocketAddr> {
        if self.entrypoints.is_empty() {
            return Vec::new();
        }
        let known: HashSet<SocketAddr> = self
            .crds
            .contact_infos()
            .filter_map(|entry| entry.value.contact_info())
            .map(|node| node.gossip)
            .collect();
        self.entrypoints
            .iter()
            .filter(|addr| !known.contains(addr))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::tests::new_contact_info;
    use crate::received_cache::NUM_UPSERTS_THRESHOLD;
    use crds_gossip_core::LowestSlot;

    const NOW: u64 = 1_700_000_000_000;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 1, 1], port))
    }

    fn engine(port: u16, seed: u64) -> (GossipEngine, KeyPair) {
        let keypair = KeyPair::generate();
        let engine = GossipEngine::with_rng(
            keypair.clone(),
            addr(port),
            Vec::new(),
            StakeTable::default(),
            GossipParams::default(),
            NOW,
            StdRng::seed_from_u64(seed),
        )
        .unwrap();
        (engine, keypair)
    }

    fn contact_info_at(keypair: &KeyPair, port: u16, wallclock: u64) -> CrdsValue {
        let node = ContactInfo::new(keypair.pubkey(), wallclock, addr(port));
        CrdsValue::new_signed(CrdsData::ContactInfo(node), keypair).unwrap()
    }

    fn lowest_slot(keypair: &KeyPair, lowest: u64, wallclock: u64) -> CrdsValue {
        let data = CrdsData::LowestSlot(
            0,
            LowestSlot {
                from: keypair.pubkey(),
                lowest,
                wallclock,
            },
        );
        CrdsValue::new_signed(data, keypair).unwrap()
    }

    /// Engine `a` learns `b`'s contact info, as if it had been pushed.
    fn introduce(a: &mut GossipEngine, b: &GossipEngine) {
        let value = b.self_value().unwrap();
        a.crds.upsert(value, NOW, GossipRoute::PushMessage).unwrap();
    }

    /// Deliver messages between engines until none are left.
    fn deliver(
        engines: &mut [&mut GossipEngine],
        mut messages: Vec<(SocketAddr, SocketAddr, Protocol)>,
        now: u64,
    ) {
        for _ in 0..16 {
            let mut next = Vec::new();
            for (from, to, message) in messages.drain(..) {
                let message = Protocol::from_bytes(&message.to_bytes().unwrap())
                    .unwrap()
                    .verify()
                    .unwrap();
                if let Some(engine) = engines.iter_mut().find(|e| e.contact_info().gossip == to) {
                    for (dest, reply) in engine.handle_packet(from, message, now) {
                        next.push((to, dest, reply));
                    }
                }
            }
            if next.is_empty() {
                return;
            }
            messages = next;
        }
    }

    fn cycle(engine: &mut GossipEngine, now: u64) -> Vec<(SocketAddr, SocketAddr, Protocol)> {
        let from = engine.contact_info().gossip;
        engine
            .run_cycle(now)
            .messages
            .into_iter()
            .map(|(to, message)| (from, to, message))
            .collect()
    }

    #[test]
    fn test_new_engine_holds_identity_values() {
        let (engine, keypair) = engine(8001, 1);
        let pubkey = keypair.pubkey();
        for kind in [CrdsKind::ContactInfo, CrdsKind::Version, CrdsKind::NodeInstance] {
            assert!(engine.crds().get(&CrdsValueLabel::new(kind, pubkey)).is_some());
        }
        assert_eq!(engine.crds().len(), 3);
    }

    #[test]
    fn test_ping_is_answered() {
        let (mut a, _) = engine(8001, 2);
        let remote = KeyPair::generate();
        let ping = Ping::new([5u8; 32], &remote);
        let out = a.handle_packet(addr(9000), Protocol::PingMessage(ping.clone()), NOW);
        assert_eq!(out.len(), 1);
        let (to, Protocol::PongMessage(pong)) = &out[0] else {
            panic!("expected a pong");
        };
        assert_eq!(*to, addr(9000));
        assert!(pong.verify().is_ok());
        assert_eq!(pong.hash, crds_gossip_core::crypto::pong_hash(&ping.token));
    }

    #[test]
    fn test_pull_request_requires_pong() {
        let (mut a, _) = engine(8001, 3);
        let (mut b, _) = engine(8002, 4);
        let b_addr = b.contact_info().gossip;
        let caller = b.self_value().unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let mut filter = CrdsFilter::new_rand(&mut rng, 10, 512);
        filter.add(caller.hash());

        let out = a.handle_packet(b_addr, Protocol::PullRequest(filter.clone(), caller.clone()), NOW);
        assert_eq!(a.stats().gossip.peers_not_verified, 1);
        let [(to, Protocol::PingMessage(ping))] = &out[..] else {
            panic!("expected a single ping");
        };
        assert_eq!(*to, b_addr);
        // caller is stored even though it is not served yet
        assert!(a.crds().get_contact_info(&b.pubkey()).is_some());

        let pong = b.handle_packet(a.contact_info().gossip, Protocol::PingMessage(ping.clone()), NOW);
        let (_, pong) = pong.into_iter().next().unwrap();
        a.handle_packet(b_addr, pong, NOW);
        assert_eq!(a.stats().gossip.pongs_accepted, 1);

        let out = a.handle_packet(b_addr, Protocol::PullRequest(filter, caller), NOW);
        let served: Vec<CrdsValue> = out
            .into_iter()
            .flat_map(|(_, message)| match message {
                Protocol::PullResponse(_, values) => values,
                _ => Vec::new(),
            })
            .collect();
        // a's own contact info, version and node instance
        assert_eq!(served.len(), 3);
        assert!(served.iter().all(|value| value.pubkey() == a.pubkey()));
    }

    #[test]
    fn test_expired_pull_request_is_dropped() {
        let (mut a, _) = engine(8001, 6);
        let caller_kp = KeyPair::generate();
        let caller = contact_info_at(&caller_kp, 8002, NOW - 20_000);
        let mut rng = StdRng::seed_from_u64(7);
        let filter = CrdsFilter::new_rand(&mut rng, 10, 512);
        let out = a.handle_packet(addr(8002), Protocol::PullRequest(filter, caller), NOW);
        assert!(out.is_empty());
        assert_eq!(a.stats().gossip.pull_requests_expired, 1);
        assert!(a.crds().get_contact_info(&caller_kp.pubkey()).is_none());
    }

    #[test]
    fn test_bad_prune_destination_is_ignored() {
        // a prune addressed elsewhere must not stop pushes to its sender
        let (mut a, a_kp) = engine(8001, 8);
        let (b, b_kp) = engine(8002, 9);
        introduce(&mut a, &b);
        a.run_cycle(NOW);

        let origin = KeyPair::generate();
        let data =
            PruneData::new_signed(&b_kp, vec![origin.pubkey()], Pubkey::new_unique(), NOW).unwrap();
        let out = a.handle_packet(b.contact_info().gossip, Protocol::PruneMessage(b_kp.pubkey(), data), NOW);
        assert!(out.is_empty());
        assert_eq!(a.stats().gossip.bad_prune_destinations, 1);

        a.crds
            .upsert(lowest_slot(&origin, 7, NOW), NOW, GossipRoute::PushMessage)
            .unwrap();
        let output = a.run_cycle(NOW + 100);
        let pushed = output.messages.iter().any(|(to, message)| {
            *to == b.contact_info().gossip
                && matches!(message, Protocol::PushMessage(from, values)
                    if *from == a_kp.pubkey() && values.iter().any(|v| v.pubkey() == origin.pubkey()))
        });
        assert!(pushed);
    }

    #[test]
    fn test_valid_prune_stops_pushes() {
        let (mut a, a_kp) = engine(8001, 10);
        let (b, b_kp) = engine(8002, 11);
        introduce(&mut a, &b);
        a.run_cycle(NOW);

        let origin = KeyPair::generate();
        let data = PruneData::new_signed(&b_kp, vec![origin.pubkey()], a_kp.pubkey(), NOW).unwrap();
        a.handle_packet(b.contact_info().gossip, Protocol::PruneMessage(b_kp.pubkey(), data), NOW);
        assert_eq!(a.stats().push.prunes_received, 1);

        a.crds
            .upsert(lowest_slot(&origin, 7, NOW), NOW, GossipRoute::PushMessage)
            .unwrap();
        let output = a.run_cycle(NOW + 100);
        assert!(!output
            .messages
            .iter()
            .any(|(_, message)| matches!(message, Protocol::PushMessage(..))));
    }

    #[test]
    fn test_old_prune_is_rejected() {
        let (mut a, a_kp) = engine(8001, 12);
        let b_kp = KeyPair::generate();
        let data = PruneData::new_signed(&b_kp, vec![Pubkey::new_unique()], a_kp.pubkey(), NOW).unwrap();
        a.handle_packet(addr(8002), Protocol::PruneMessage(b_kp.pubkey(), data), NOW + 501);
        assert_eq!(a.stats().gossip.prune_message_timeouts, 1);
    }

    #[test]
    fn test_redundant_pusher_receives_prune() {
        let (mut a, a_kp) = engine(8001, 13);
        let senders: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        for (i, kp) in senders.iter().enumerate() {
            let value = contact_info_at(kp, 9001 + i as u16, NOW);
            a.crds.upsert(value, NOW, GossipRoute::PushMessage).unwrap();
        }
        let origin = KeyPair::generate();
        let mut prunes = Vec::new();
        for i in 0..NUM_UPSERTS_THRESHOLD as u64 {
            let value = lowest_slot(&origin, i, NOW + i);
            for (j, kp) in senders.iter().enumerate() {
                let message = Protocol::PushMessage(kp.pubkey(), vec![value.clone()]);
                prunes.extend(a.handle_packet(addr(9001 + j as u16), message, NOW));
            }
        }
        assert_eq!(prunes.len(), 1);
        let (to, Protocol::PruneMessage(from, data)) = &prunes[0] else {
            panic!("expected a prune");
        };
        assert_eq!(*to, addr(9003));
        assert_eq!(*from, a_kp.pubkey());
        assert_eq!(data.destination, senders[2].pubkey());
        assert_eq!(data.prunes, vec![origin.pubkey()]);
        assert!(data.verify().is_ok());
        assert_eq!(a.stats().gossip.prunes_sent, 1);
    }

    #[test]
    fn test_push_outside_window_is_counted() {
        let (mut a, _) = engine(8001, 14);
        let origin = KeyPair::generate();
        let value = lowest_slot(&origin, 1, NOW - 60_000);
        a.handle_packet(addr(9000), Protocol::PushMessage(origin.pubkey(), vec![value]), NOW);
        assert_eq!(a.stats().gossip.push_message_timeouts, 1);
    }

    #[test]
    fn test_duplicate_instance_supersedes() {
        let (mut a, a_kp) = engine(8001, 15);
        let twin = NodeInstance::new(a_kp.pubkey(), NOW + 10);
        let value = CrdsValue::new_signed(CrdsData::NodeInstance(twin), &a_kp).unwrap();
        a.handle_packet(addr(9000), Protocol::PushMessage(Pubkey::new_unique(), vec![value]), NOW + 10);
        assert!(a.is_superseded());
    }

    #[test]
    fn test_own_instance_echo_is_not_duplicate() {
        let (mut a, a_kp) = engine(8001, 16);
        let echo = a
            .crds()
            .get(&CrdsValueLabel::new(CrdsKind::NodeInstance, a_kp.pubkey()))
            .unwrap()
            .value
            .clone();
        a.handle_packet(addr(9000), Protocol::PushMessage(Pubkey::new_unique(), vec![echo]), NOW);
        assert!(!a.is_superseded());
    }

    #[test]
    fn test_purge_keeps_own_values() {
        let (mut a, _) = engine(8001, 17);
        let other = KeyPair::generate();
        a.crds
            .upsert(new_contact_info(&other, NOW), NOW, GossipRoute::PushMessage)
            .unwrap();
        assert_eq!(a.crds().num_nodes(), 2);
        let later = NOW + GossipParams::default().crds_timeout + 1;
        a.run_cycle(later);
        assert_eq!(a.crds().num_nodes(), 1);
        assert!(a.crds().get_contact_info(&a.pubkey()).is_some());
        assert_eq!(a.stats().gossip.values_purged, 1);
    }

    #[test]
    fn test_entrypoint_receives_pull_request() {
        let keypair = KeyPair::generate();
        let entrypoint = addr(8100);
        let mut a = GossipEngine::with_rng(
            keypair,
            addr(8001),
            vec![entrypoint],
            StakeTable::default(),
            GossipParams::default(),
            NOW,
            StdRng::seed_from_u64(18),
        )
        .unwrap();
        let output = a.run_cycle(NOW);
        assert!(output
            .messages
            .iter()
            .any(|(to, message)| *to == entrypoint && matches!(message, Protocol::PullRequest(..))));
        // the ping phase covers active-set peers only
        assert!(!output
            .messages
            .iter()
            .any(|(to, message)| *to == entrypoint && matches!(message, Protocol::PingMessage(_))));
    }

    #[test]
    fn test_snapshot_and_restore() {
        let (mut a, _) = engine(8001, 19);
        let (mut b, _) = engine(8002, 20);
        let other = KeyPair::generate();
        a.crds
            .upsert(contact_info_at(&other, 8003, NOW), NOW, GossipRoute::PushMessage)
            .unwrap();
        let snapshot = a.contact_info_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(b.restore_contact_infos(snapshot, NOW), 1);
        assert!(b.crds().get_contact_info(&other.pubkey()).is_some());
    }

    #[test]
    fn test_two_nodes_converge() {
        let (mut a, _) = engine(8001, 21);
        let (mut b, _) = engine(8002, 22);
        introduce(&mut a, &b);
        introduce(&mut b, &a);

        let third = KeyPair::generate();
        a.crds
            .upsert(contact_info_at(&third, 8003, NOW), NOW, GossipRoute::PushMessage)
            .unwrap();
        a.crds
            .upsert(lowest_slot(&third, 42, NOW), NOW, GossipRoute::PushMessage)
            .unwrap();

        for step in 0..5u64 {
            let now = NOW + step * 100;
            let mut messages = cycle(&mut a, now);
            messages.extend(cycle(&mut b, now));
            deliver(&mut [&mut a, &mut b], messages, now);
        }

        let labels = |engine: &GossipEngine| -> HashSet<CrdsValueLabel> {
            engine.crds().values().map(|entry| entry.value.label()).collect()
        };
        assert_eq!(labels(&a), labels(&b));
        assert_eq!(a.crds().len(), 8);
        assert!(b.crds().get_contact_info(&third.pubkey()).is_some());
    }
}
