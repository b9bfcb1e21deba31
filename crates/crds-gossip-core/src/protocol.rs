//! Gossip wire messages
//!
//! The [`Protocol`] envelope is what travels in each datagram. Receivers
//! run [`Sanitize`] first (cheap, no crypto) and then
//! [`Protocol::verify`] before anything reaches the table.

use crate::bloom::CrdsFilter;
use crate::crypto::{self, KeyPair};
use crate::error::{Error, Result, Sanitize, SanitizeError};
use crate::types::*;
use crate::wire::{self, PACKET_DATA_SIZE};
use serde::{Deserialize, Serialize};

/// Bytes taken by the `Protocol` discriminant, the sender pubkey and the
/// vector length prefix of push / pull-response messages.
pub const PUSH_MESSAGE_OVERHEAD: usize = 4 + 32 + 8;

/// Payload budget for the values of one push or pull-response message.
pub const MAX_VALUES_PAYLOAD_SIZE: usize = PACKET_DATA_SIZE - PUSH_MESSAGE_OVERHEAD;

/// Upper bound on origins named by a single prune message.
pub const MAX_PRUNE_DATA_NODES: usize = 32;

/// Liveness challenge carrying a random token.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ping {
    pub from: Pubkey,
    pub token: Bytes32,
    /// Signature over `token`
    pub signature: Signature,
}

impl Ping {
    pub fn new(token: Bytes32, keypair: &KeyPair) -> Self {
        Self {
            from: keypair.pubkey(),
            token,
            signature: keypair.sign(&token),
        }
    }

    pub fn new_rand<R: rand::Rng>(rng: &mut R, keypair: &KeyPair) -> Self {
        Self::new(rng.gen(), keypair)
    }

    pub fn verify(&self) -> Result<()> {
        crypto::verify(&self.from, &self.token, &self.signature)
    }
}

/// Answer to a [`Ping`], carrying the hash of its token.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pong {
    pub from: Pubkey,
    pub hash: Hash,
    /// Signature over `hash`
    pub signature: Signature,
}

impl Pong {
    pub fn new(ping: &Ping, keypair: &KeyPair) -> Self {
        let hash = crypto::pong_hash(&ping.token);
        Self {
            from: keypair.pubkey(),
            hash,
            signature: keypair.sign(&hash.0),
        }
    }

    pub fn verify(&self) -> Result<()> {
        crypto::verify(&self.from, &self.hash.0, &self.signature)
    }
}

/// Request from `pubkey` that `destination` stop relaying the named origins to it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PruneData {
    pub pubkey: Pubkey,
    pub prunes: Vec<Pubkey>,
    pub signature: Signature,
    pub destination: Pubkey,
    pub wallclock: u64,
}

impl PruneData {
    pub fn new_signed(
        keypair: &KeyPair,
        prunes: Vec<Pubkey>,
        destination: Pubkey,
        wallclock: u64,
    ) -> Result<Self> {
        let pubkey = keypair.pubkey();
        let signature =
            keypair.sign(&crypto::prune_sign_bytes(&pubkey, &prunes, &destination, wallclock)?);
        Ok(Self {
            pubkey,
            prunes,
            signature,
            destination,
            wallclock,
        })
    }

    pub fn verify(&self) -> Result<()> {
        let message = crypto::prune_sign_bytes(
            &self.pubkey,
            &self.prunes,
            &self.destination,
            self.wallclock,
        )?;
        crypto::verify(&self.pubkey, &message, &self.signature)
    }
}

impl Sanitize for PruneData {
    fn sanitize(&self) -> std::result::Result<(), SanitizeError> {
        if self.wallclock >= MAX_WALLCLOCK {
            return Err(SanitizeError::ValueOutOfBounds);
        }
        if self.prunes.len() > MAX_PRUNE_DATA_NODES {
            return Err(SanitizeError::ValueOutOfBounds);
        }
        Ok(())
    }
}

/// Gossip message envelope.
///
/// Variant order is the wire discriminant and must not change.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Protocol {
    PullRequest(CrdsFilter, CrdsValue),
    PullResponse(Pubkey, Vec<CrdsValue>),
    PushMessage(Pubkey, Vec<CrdsValue>),
    PruneMessage(Pubkey, PruneData),
    PingMessage(Ping),
    PongMessage(Pong),
}

impl Protocol {
    /// Decode a datagram, then sanitize it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let protocol: Protocol = wire::deserialize(bytes)?;
        protocol.sanitize()?;
        Ok(protocol)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = wire::serialize(self)?;
        if bytes.len() > PACKET_DATA_SIZE {
            return Err(Error::PacketTooLarge(bytes.len()));
        }
        Ok(bytes)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Protocol::PullRequest(..) => "pull_request",
            Protocol::PullResponse(..) => "pull_response",
            Protocol::PushMessage(..) => "push",
            Protocol::PruneMessage(..) => "prune",
            Protocol::PingMessage(_) => "ping",
            Protocol::PongMessage(_) => "pong",
        }
    }

    /// Verify signatures.
    ///
    /// Push and pull-response messages keep only the values that verify and
    /// are discarded when none do. Every other message is all-or-nothing;
    /// a prune message must also be sent by the node that signed it.
    pub fn verify(self) -> Result<Self> {
        match self {
            Protocol::PullRequest(filter, caller) => {
                caller.verify()?;
                Ok(Protocol::PullRequest(filter, caller))
            }
            Protocol::PullResponse(from, values) => {
                let values = retain_verified(values)?;
                Ok(Protocol::PullResponse(from, values))
            }
            Protocol::PushMessage(from, values) => {
                let values = retain_verified(values)?;
                Ok(Protocol::PushMessage(from, values))
            }
            Protocol::PruneMessage(from, data) => {
                if from != data.pubkey {
                    return Err(Error::InvalidSignature);
                }
                data.verify()?;
                Ok(Protocol::PruneMessage(from, data))
            }
            Protocol::PingMessage(ping) => {
                ping.verify()?;
                Ok(Protocol::PingMessage(ping))
            }
            Protocol::PongMessage(pong) => {
                pong.verify()?;
                Ok(Protocol::PongMessage(pong))
            }
        }
    }
}

fn retain_verified(mut values: Vec<CrdsValue>) -> Result<Vec<CrdsValue>> {
    values.retain(|value| value.verify().is_ok());
    if values.is_empty() {
        Err(Error::InvalidSignature)
    } else {
        Ok(values)
    }
}

impl Sanitize for Protocol {
    fn sanitize(&self) -> std::result::Result<(), SanitizeError> {
        match self {
            Protocol::PullRequest(filter, caller) => {
                filter.sanitize()?;
                if caller.contact_info().is_none() {
                    return Err(SanitizeError::InvalidValue);
                }
                caller.sanitize()
            }
            Protocol::PullResponse(_, values) | Protocol::PushMessage(_, values) => {
                values.iter().try_for_each(Sanitize::sanitize)
            }
            Protocol::PruneMessage(from, data) => {
                if *from != data.pubkey {
                    return Err(SanitizeError::InvalidValue);
                }
                data.sanitize()
            }
            Protocol::PingMessage(_) | Protocol::PongMessage(_) => Ok(()),
        }
    }
}

/// Split `values` into chunks whose encoded size fits `max_chunk_size`.
///
/// A value that alone exceeds the budget is dropped.
pub fn split_gossip_messages(
    max_chunk_size: usize,
    values: impl IntoIterator<Item = CrdsValue>,
) -> Vec<Vec<CrdsValue>> {
    let mut chunks = Vec::new();
    let mut chunk = Vec::new();
    let mut chunk_size = 0usize;
    for value in values {
        let size = match wire::serialized_size(&value) {
            Ok(size) => size as usize,
            Err(_) => continue,
        };
        if size > max_chunk_size {
            continue;
        }
        if chunk_size + size > max_chunk_size {
            chunks.push(std::mem::take(&mut chunk));
            chunk_size = 0;
        }
        chunk_size += size;
        chunk.push(value);
    }
    if !chunk.is_empty() {
        chunks.push(chunk);
    }
    chunks
}
