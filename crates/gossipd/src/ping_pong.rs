//! Ping/pong liveness cache
//!
//! A remote node is verified for an address once it answers one of our
//! pings with the matching pong. Verification lasts `ttl`; pings to
//! extend it are sent when the last pong is older than `ttl / 8`.

use crds_gossip_core::crypto::{pong_hash, KeyPair};
use crds_gossip_core::protocol::{Ping, Pong};
use crds_gossip_core::{Hash, Pubkey};
use lru::LruCache;
use rand::Rng;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use tracing::trace;

/// Time a pong keeps a node verified (ms).
pub const DEFAULT_PING_CACHE_TTL: u64 = 1_280_000;
/// Minimum gap between pings to the same node (ms).
pub const DEFAULT_PING_RATE_LIMIT_DELAY: u64 = 20_000;
pub const DEFAULT_PING_CACHE_CAPACITY: usize = 65_536;

type Node = (Pubkey, SocketAddr);

pub struct PingCache {
    ttl: u64,
    rate_limit_delay: u64,
    /// Time a pong was last received from the node
    pongs: LruCache<Node, u64>,
    /// Time a ping was last sent to the node
    pings: LruCache<Node, u64>,
    /// Expected pong hash -> node the ping went to
    pending: LruCache<Hash, Node>,
}

impl Default for PingCache {
    fn default() -> Self {
        Self::new(
            DEFAULT_PING_CACHE_TTL,
            DEFAULT_PING_RATE_LIMIT_DELAY,
            DEFAULT_PING_CACHE_CAPACITY,
        )
    }
}

impl PingCache {
    pub fn new(ttl: u64, rate_limit_delay: u64, capacity: usize) -> Self {
        // Pings are not sent more often than the pong refresh interval.
        debug_assert!(rate_limit_delay <= ttl / 2);
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            rate_limit_delay,
            pongs: LruCache::new(capacity),
            pings: LruCache::new(capacity),
            pending: LruCache::new(capacity),
        }
    }

    /// Record `pong` received from `addr`.
    ///
    /// Returns false for pongs that do not answer a ping we sent to that
    /// node and address.
    pub fn add(&mut self, pong: &Pong, addr: SocketAddr, now: u64) -> bool {
        let node = (pong.from, addr);
        match self.pending.pop(&pong.hash) {
            Some(expected) if expected == node => {
                self.pongs.put(node, now);
                true
            }
            Some(expected) => {
                // someone else's answer; keep waiting for the real one
                self.pending.put(pong.hash, expected);
                trace!("Pong from {} at {} does not match ping", pong.from, addr);
                false
            }
            None => {
                trace!("Unsolicited pong from {} at {}", pong.from, addr);
                false
            }
        }
    }

    /// A fresh ping for `node`, unless one was sent within the rate limit.
    pub fn maybe_ping<R: Rng>(
        &mut self,
        rng: &mut R,
        keypair: &KeyPair,
        now: u64,
        node: Node,
    ) -> Option<Ping> {
        if matches!(self.pings.peek(&node), Some(t) if now.saturating_sub(*t) < self.rate_limit_delay)
        {
            return None;
        }
        let ping = Ping::new_rand(rng, keypair);
        self.pings.put(node, now);
        self.pending.put(pong_hash(&ping.token), node);
        Some(ping)
    }

    /// Whether `node` is verified, with a ping to send if its pong is
    /// missing or getting old.
    pub fn check<R: Rng>(
        &mut self,
        rng: &mut R,
        keypair: &KeyPair,
        now: u64,
        node: Node,
    ) -> (bool, Option<Ping>) {
        let (verified, should_ping) = match self.pongs.get(&node) {
            None => (false, true),
            Some(t) => {
                let age = now.saturating_sub(*t);
                if age > self.ttl {
                    self.pongs.pop(&node);
                    (false, true)
                } else {
                    (true, age > self.ttl / 8)
                }
            }
        };
        let ping = if should_ping {
            self.maybe_ping(rng, keypair, now, node)
        } else {
            None
        };
        (verified, ping)
    }

    /// Verified without side effects.
    pub fn is_verified(&self, now: u64, node: &Node) -> bool {
        matches!(self.pongs.peek(node), Some(t) if now.saturating_sub(*t) <= self.ttl)
    }

    pub fn num_verified(&self) -> usize {
        self.pongs.len()
    }

    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }
}
