//! Persistent storage using sled

use crds_gossip_core::crypto::KeyPair;
use crds_gossip_core::{CrdsValue, Pubkey};
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

const IDENTITY_KEY: &str = "identity_seed";

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),
    #[error("Corrupt identity seed ({0} bytes)")]
    CorruptIdentity(usize),
}

/// A signed contact info and when it was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredContactInfo {
    value: CrdsValue,
    saved_at: u64,
}

/// Storage backend for gossipd
pub struct Storage {
    db: Db,
    /// Contact info tree: pubkey -> StoredContactInfo
    contact_infos: sled::Tree,
    /// Metadata tree: key -> value
    metadata: sled::Tree,
}

impl Storage {
    /// Open storage at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let contact_infos = db.open_tree("contact_infos")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            contact_infos,
            metadata,
        })
    }

    /// Node identity, generated and saved on first use.
    pub fn load_or_create_identity(&self) -> Result<KeyPair, StorageError> {
        if let Some(bytes) = self.metadata.get(IDENTITY_KEY)? {
            let seed: [u8; 32] = bytes
                .as_ref()
                .try_into()
                .map_err(|_| StorageError::CorruptIdentity(bytes.len()))?;
            return Ok(KeyPair::from_seed(&seed));
        }
        let keypair = KeyPair::generate();
        self.metadata.insert(IDENTITY_KEY, keypair.seed().to_vec())?;
        self.metadata.flush()?;
        info!("Generated new identity {}", keypair.pubkey());
        Ok(keypair)
    }

    /// Replace the stored contact infos with `values`.
    pub fn put_contact_infos(&self, values: &[CrdsValue], now: u64) -> Result<usize, StorageError> {
        self.contact_infos.clear()?;
        let mut batch = sled::Batch::default();
        for value in values {
            let record = StoredContactInfo {
                value: value.clone(),
                saved_at: now,
            };
            batch.insert(value.pubkey().0.to_vec(), postcard::to_allocvec(&record)?);
        }
        self.contact_infos.apply_batch(batch)?;
        debug!("Saved {} contact infos", values.len());
        Ok(values.len())
    }

    /// Contact infos saved within `max_age` of `now`.
    ///
    /// Undecodable records are skipped.
    pub fn load_contact_infos(&self, max_age: u64, now: u64) -> Result<Vec<CrdsValue>, StorageError> {
        let mut values = Vec::new();
        for result in self.contact_infos.iter() {
            let (_, bytes) = result?;
            let record: StoredContactInfo = match postcard::from_bytes(&bytes) {
                Ok(record) => record,
                Err(e) => {
                    debug!("Skipping stored contact info: {}", e);
                    continue;
                }
            };
            if now.saturating_sub(record.saved_at) <= max_age {
                values.push(record.value);
            }
        }
        Ok(values)
    }

    pub fn has_contact_info(&self, pubkey: &Pubkey) -> Result<bool, StorageError> {
        Ok(self.contact_infos.contains_key(pubkey.0)?)
    }

    /// Count stored contact infos
    pub fn contact_info_count(&self) -> usize {
        self.contact_infos.len()
    }

    /// Flush all pending writes
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}
