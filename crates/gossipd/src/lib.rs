//! gossipd - CRDS anti-entropy gossip daemon
//!
//! This daemon provides:
//! - A last-writer-wins replicated table of signed values
//! - Push dissemination over a stake-weighted active set with prunes
//! - Bloom-filter pull repair
//! - Ping/pong liveness checks before serving peers
//! - Contact-info persistence across restarts

pub mod config;
pub mod crds;
pub mod crds_shards;
pub mod engine;
pub mod ping_pong;
pub mod pull;
pub mod push;
pub mod push_active_set;
pub mod received_cache;
pub mod scheduler;
pub mod server;
pub mod stakes;
pub mod storage;

pub use config::{Config, GossipParams};
pub use crds::Crds;
pub use engine::GossipEngine;
pub use server::Server;
pub use stakes::StakeTable;
pub use storage::Storage;
