//! Hash derivations and signatures for CRDS gossip
//!
//! Content hashes use BLAKE3 with domain separation prefixes. Signatures
//! are ed25519 over the wire encoding of the signed fields.

use crate::error::{Error, Result};
use crate::types::*;
use crate::wire;
use blake3::Hasher;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

// =============================================================================
// DOMAIN SEPARATION PREFIXES
// =============================================================================

/// Domain prefix for CRDS value content hashes
pub const DOMAIN_CRDS_VALUE: &[u8] = b"crds-value";
/// Domain prefix for pong hashes of ping tokens
pub const DOMAIN_PING_PONG: &[u8] = b"ping-pong";
/// Domain prefix for prune data signatures
pub const DOMAIN_PRUNE_DATA: &[u8] = b"prune-data";

// =============================================================================
// KEYPAIR
// =============================================================================

/// Ed25519 keypair for signing and identity
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create from seed bytes (persisted identities, deterministic tests)
    pub fn from_seed(seed: &Bytes32) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    pub fn seed(&self) -> Bytes32 {
        self.signing_key.to_bytes()
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }
}

/// Verify `signature` by `pubkey` over `message`.
pub fn verify(pubkey: &Pubkey, message: &[u8], signature: &Signature) -> Result<()> {
    let verifying_key =
        VerifyingKey::from_bytes(&pubkey.0).map_err(|e| Error::InvalidPublicKey(e.to_string()))?;
    let signature = ed25519_dalek::Signature::from_bytes(&signature.0);
    verifying_key
        .verify(message, &signature)
        .map_err(|_| Error::InvalidSignature)
}

// =============================================================================
// CRDS VALUES
// =============================================================================

/// Content hash of a signed value.
///
/// `hash = BLAKE3("crds-value" || signature || wire(data))`
pub fn crds_value_hash(signature: &Signature, data: &CrdsData) -> Result<Hash> {
    let data_bytes = wire::serialize(data)?;

    let mut hasher = Hasher::new();
    hasher.update(DOMAIN_CRDS_VALUE);
    hasher.update(&signature.0);
    hasher.update(&data_bytes);

    Ok(Hash(*hasher.finalize().as_bytes()))
}

impl CrdsValue {
    /// Sign `data` with `keypair`. The keypair should be the data's origin;
    /// values signed by anyone else fail [`CrdsValue::verify`].
    pub fn new_signed(data: CrdsData, keypair: &KeyPair) -> Result<Self> {
        let signature = keypair.sign(&wire::serialize(&data)?);
        Self::new_unchecked(signature, data)
    }

    /// Build from parts without checking the signature.
    pub fn new_unchecked(signature: Signature, data: CrdsData) -> Result<Self> {
        let hash = crds_value_hash(&signature, &data)?;
        Ok(Self {
            signature,
            data,
            hash,
        })
    }

    /// Verify the signature against the data's origin.
    pub fn verify(&self) -> Result<()> {
        let message = wire::serialize(&self.data)?;
        verify(&self.data.pubkey(), &message, &self.signature)
    }
}

// =============================================================================
// PING / PONG
// =============================================================================

/// Hash a pong must carry to answer a ping with `token`.
///
/// `hash = BLAKE3("ping-pong" || token)`
pub fn pong_hash(token: &Bytes32) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(DOMAIN_PING_PONG);
    hasher.update(token);
    Hash(*hasher.finalize().as_bytes())
}

/// Bytes covered by a prune data signature.
///
/// `sign_bytes = "prune-data" || wire(pubkey, prunes, destination, wallclock)`
pub fn prune_sign_bytes(
    pubkey: &Pubkey,
    prunes: &[Pubkey],
    destination: &Pubkey,
    wallclock: u64,
) -> Result<Vec<u8>> {
    let fields = wire::serialize(&(pubkey, prunes, destination, wallclock))?;

    let mut bytes = Vec::with_capacity(DOMAIN_PRUNE_DATA.len() + fields.len());
    bytes.extend_from_slice(DOMAIN_PRUNE_DATA);
    bytes.extend_from_slice(&fields);

    Ok(bytes)
}
