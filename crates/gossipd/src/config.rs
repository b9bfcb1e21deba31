//! Configuration for gossipd

use crate::ping_pong::{DEFAULT_PING_CACHE_CAPACITY, DEFAULT_PING_CACHE_TTL, DEFAULT_PING_RATE_LIMIT_DELAY};
use clap::Parser;
use crds_gossip_core::CrdsKind;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

/// gossipd - CRDS anti-entropy gossip daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "gossipd")]
#[command(about = "Cluster state replication over push/pull gossip")]
pub struct Config {
    /// UDP address for gossip traffic
    #[arg(short, long, default_value = "0.0.0.0:8001")]
    pub listen: SocketAddr,

    /// Gossip address advertised in our contact info (defaults to listen)
    #[arg(long)]
    pub advertise: Option<SocketAddr>,

    /// Data directory for persistent storage
    #[arg(short, long, default_value = "./data/gossipd")]
    pub data_dir: PathBuf,

    /// Entrypoint gossip addresses (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub entrypoints: Vec<SocketAddr>,

    /// Cluster shred version; 0 accepts any
    #[arg(long, default_value = "0")]
    pub shred_version: u16,

    /// JSON stake table, `{ "<hex pubkey>": stake }`
    #[arg(long, env = "GOSSIPD_STAKES")]
    pub stakes: Option<PathBuf>,

    /// Gossip cycle interval in milliseconds
    #[arg(long, default_value = "100")]
    pub cycle_interval_ms: u64,

    /// Active set rotation and identity refresh interval in milliseconds
    #[arg(long, default_value = "7500")]
    pub rotate_interval_ms: u64,

    /// Number of packet verification workers
    #[arg(long, default_value = "4")]
    pub verify_workers: usize,

    /// Value kinds relayed regardless of prunes (comma-separated)
    #[arg(long, value_delimiter = ',', default_value = "NodeInstance")]
    pub always_relay: Vec<CrdsKind>,

    /// Restore persisted contact infos younger than this many seconds
    #[arg(long, default_value = "3600")]
    pub restore_max_age_secs: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cycle_interval_ms == 0 {
            anyhow::bail!("Cycle interval must be positive");
        }
        if self.rotate_interval_ms < self.cycle_interval_ms {
            anyhow::bail!("Rotation interval cannot be shorter than the cycle interval");
        }
        if self.verify_workers == 0 {
            anyhow::bail!("At least one verify worker is required");
        }
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            anyhow::bail!("Unknown log format: {}", self.log_format);
        }
        if self.entrypoints.contains(&self.gossip_addr()) {
            anyhow::bail!("Entrypoints cannot include our own gossip address");
        }
        Ok(())
    }

    pub fn gossip_addr(&self) -> SocketAddr {
        self.advertise.unwrap_or(self.listen)
    }

    /// Engine parameters with the command line overrides applied.
    pub fn gossip_params(&self) -> GossipParams {
        GossipParams {
            shred_version: self.shred_version,
            rotate_interval: self.rotate_interval_ms,
            always_relay: self.always_relay.iter().copied().collect(),
            ..GossipParams::default()
        }
    }
}

/// Engine tunables. All durations are in milliseconds.
#[derive(Debug, Clone)]
pub struct GossipParams {
    pub shred_version: u16,
    /// Peers per push bucket
    pub push_active_set_size: usize,
    /// Peers a single value is pushed to
    pub push_fanout: usize,
    /// Accepted wallclock skew of pushed values
    pub push_msg_timeout: u64,
    /// Maximum age of an accepted prune message
    pub prune_msg_timeout: u64,
    /// Fraction of `min(our stake, origin stake)` kept as ingress
    pub prune_stake_threshold: f64,
    pub min_num_ingress_nodes: usize,
    pub received_cache_capacity: usize,
    /// Accepted wallclock skew of a pull request's caller
    pub pull_request_timeout: u64,
    /// Peers must have refreshed their contact info this recently
    pub pull_active_window: u64,
    /// Values returned for a single pull request
    pub pull_response_limit: usize,
    /// Retention of purged and failed-insert hashes
    pub purged_retention: u64,
    /// Unstaked origins are purged after this long unrefreshed
    pub crds_timeout: u64,
    /// Staked origins are purged after this long unrefreshed
    pub staked_crds_timeout: u64,
    pub rotate_interval: u64,
    pub ping_cache_ttl: u64,
    pub ping_rate_limit_delay: u64,
    pub ping_cache_capacity: usize,
    /// Kinds pushed even to peers that pruned their origin
    pub always_relay: HashSet<CrdsKind>,
    /// Kinds only propagated from staked origins
    pub stake_gated: HashSet<CrdsKind>,
}

impl Default for GossipParams {
    fn default() -> Self {
        Self {
            shred_version: 0,
            push_active_set_size: 12,
            push_fanout: 9,
            push_msg_timeout: 30_000,
            prune_msg_timeout: 500,
            prune_stake_threshold: 0.15,
            min_num_ingress_nodes: 2,
            received_cache_capacity: 2 * 4096,
            pull_request_timeout: 15_000,
            pull_active_window: 60_000,
            pull_response_limit: 100,
            purged_retention: 30_000,
            crds_timeout: 15_000,
            staked_crds_timeout: 48 * 3600 * 1000,
            rotate_interval: 7_500,
            ping_cache_ttl: DEFAULT_PING_CACHE_TTL,
            ping_rate_limit_delay: DEFAULT_PING_RATE_LIMIT_DELAY,
            ping_cache_capacity: DEFAULT_PING_CACHE_CAPACITY,
            always_relay: HashSet::from([CrdsKind::NodeInstance]),
            stake_gated: HashSet::from([
                CrdsKind::Vote,
                CrdsKind::EpochSlots,
                CrdsKind::AccountsHashes,
                CrdsKind::SnapshotHashes,
            ]),
        }
    }
}
