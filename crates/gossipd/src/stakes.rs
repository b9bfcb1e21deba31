//! Stake lookups
//!
//! Loaded from a JSON object mapping hex pubkeys to stake, e.g.
//! `{ "a1b2...": 1000 }`. Unknown keys have zero stake.

use crds_gossip_core::Pubkey;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StakeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid pubkey in stake table: {0}")]
    InvalidPubkey(#[from] crds_gossip_core::Error),
}

#[derive(Clone, Debug, Default)]
pub struct StakeTable {
    stakes: HashMap<Pubkey, u64>,
}

impl StakeTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StakeError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, StakeError> {
        let raw: HashMap<String, u64> = serde_json::from_str(json)?;
        let stakes = raw
            .into_iter()
            .map(|(key, stake)| Ok((key.parse::<Pubkey>()?, stake)))
            .collect::<Result<_, StakeError>>()?;
        Ok(Self { stakes })
    }

    pub fn stake_of(&self, pubkey: &Pubkey) -> u64 {
        self.stakes.get(pubkey).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.stakes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stakes.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.stakes.values().fold(0u64, |sum, stake| sum.saturating_add(*stake))
    }
}

impl FromIterator<(Pubkey, u64)> for StakeTable {
    fn from_iter<I: IntoIterator<Item = (Pubkey, u64)>>(iter: I) -> Self {
        Self {
            stakes: iter.into_iter().collect(),
        }
    }
}
