//! Core data model for CRDS gossip
//!
//! All types here travel on the wire. Field order matters for encoding:
//! see [`crate::wire`] for the exact rules.

use crate::error::{Sanitize, SanitizeError};
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// 32-byte fixed-size array used for hashes and identifiers.
pub type Bytes32 = [u8; 32];

/// Number of bytes in an ed25519 signature.
pub const SIGNATURE_BYTES: usize = 64;

/// Wallclocks at or above this are implausible and rejected on the wire.
pub const MAX_WALLCLOCK: u64 = 1_000_000_000_000_000;

/// Concurrent vote values per origin.
pub const MAX_VOTES: u8 = 32;

/// Concurrent epoch-slots values per origin; every `u8` index is in range.
pub const MAX_EPOCH_SLOTS: u16 = 256;

/// Concurrent duplicate-shred chunks per origin.
pub const MAX_DUPLICATE_SHREDS: u16 = 512;

/// Milliseconds since the unix epoch.
pub fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// =============================================================================
// IDENTITY TYPES
// =============================================================================

/// Ed25519 public key of a node.
#[derive(Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pubkey(pub Bytes32);

impl Pubkey {
    /// Random key, only meaningful as an identifier (tests, tooling).
    pub fn new_unique() -> Self {
        Self(rand::random())
    }

    pub fn as_bytes(&self) -> &Bytes32 {
        &self.0
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pubkey({self})")
    }
}

impl FromStr for Pubkey {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| crate::Error::InvalidPublicKey(e.to_string()))?;
        let bytes: Bytes32 = bytes
            .try_into()
            .map_err(|_| crate::Error::InvalidPublicKey(format!("expected 32 bytes: {s}")))?;
        Ok(Self(bytes))
    }
}

/// BLAKE3 digest.
#[derive(Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub Bytes32);

impl Hash {
    /// Leading 8 bytes as a big-endian integer; its top bits select
    /// shards and filter partitions.
    pub fn as_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(bytes)
    }

    pub fn new_unique() -> Self {
        Self(rand::random())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(&self.0[..8]))
    }
}

/// Ed25519 signature, encoded inline as 64 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; SIGNATURE_BYTES]);

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; SIGNATURE_BYTES])
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0[..8]))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(SIGNATURE_BYTES)?;
        for byte in &self.0 {
            tuple.serialize_element(byte)?;
        }
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SignatureVisitor;

        impl<'de> Visitor<'de> for SignatureVisitor {
            type Value = Signature;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{SIGNATURE_BYTES} signature bytes")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Signature, A::Error> {
                let mut bytes = [0u8; SIGNATURE_BYTES];
                for (i, byte) in bytes.iter_mut().enumerate() {
                    *byte = seq
                        .next_element()?
                        .ok_or_else(|| de::Error::invalid_length(i, &self))?;
                }
                Ok(Signature(bytes))
            }
        }

        deserializer.deserialize_tuple(SIGNATURE_BYTES, SignatureVisitor)
    }
}

fn sanitize_wallclock(wallclock: u64) -> Result<(), SanitizeError> {
    if wallclock >= MAX_WALLCLOCK {
        Err(SanitizeError::ValueOutOfBounds)
    } else {
        Ok(())
    }
}

// =============================================================================
// CRDS PAYLOADS
// =============================================================================

/// Unspecified socket, used where a node does not serve a port.
pub const UNSPECIFIED_SOCKET: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);

/// Network identity of a node.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactInfo {
    pub pubkey: Pubkey,
    pub wallclock: u64,
    /// Boot timestamp; a restarted node advertises a larger outset
    pub outset: u64,
    pub shred_version: u16,
    pub gossip: SocketAddr,
    pub tvu: SocketAddr,
    pub tpu: SocketAddr,
    pub rpc: SocketAddr,
}

impl ContactInfo {
    pub fn new(pubkey: Pubkey, wallclock: u64, gossip: SocketAddr) -> Self {
        Self {
            pubkey,
            wallclock,
            outset: wallclock,
            shred_version: 0,
            gossip,
            tvu: UNSPECIFIED_SOCKET,
            tpu: UNSPECIFIED_SOCKET,
            rpc: UNSPECIFIED_SOCKET,
        }
    }

    /// Whether the address can be used to reach a peer.
    pub fn is_valid_address(addr: &SocketAddr) -> bool {
        addr.port() != 0 && !addr.ip().is_unspecified() && !addr.ip().is_multicast()
    }
}

/// Opaque vote transaction.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Vote {
    pub from: Pubkey,
    pub transaction: Vec<u8>,
    pub wallclock: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LowestSlot {
    pub from: Pubkey,
    pub lowest: u64,
    pub wallclock: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountsHashes {
    pub from: Pubkey,
    pub hashes: Vec<(u64, Hash)>,
    pub wallclock: u64,
}

/// Compressed set of slots a node has completed, starting at `first_slot`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EpochSlots {
    pub from: Pubkey,
    pub first_slot: u64,
    pub compressed: Vec<u8>,
    pub wallclock: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LegacyVersion {
    pub from: Pubkey,
    pub wallclock: u64,
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub commit: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Version {
    pub from: Pubkey,
    pub wallclock: u64,
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub commit: u32,
    pub feature_set: u32,
}

/// Identifies one running process of a node.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInstance {
    pub from: Pubkey,
    pub wallclock: u64,
    /// Process start time
    pub timestamp: u64,
    /// Random per-process token
    pub token: u64,
}

impl NodeInstance {
    pub fn new(from: Pubkey, now: u64) -> Self {
        Self {
            from,
            wallclock: now,
            timestamp: now,
            token: rand::random(),
        }
    }

    /// Same value with a refreshed wallclock.
    pub fn with_wallclock(&self, wallclock: u64) -> Self {
        Self {
            wallclock,
            ..self.clone()
        }
    }

    /// True if `other` is another process running under the same identity
    /// which started no earlier than this one.
    pub fn check_duplicate(&self, other: &NodeInstance) -> bool {
        self.token != other.token && self.from == other.from && self.timestamp <= other.timestamp
    }
}

/// One chunk of a duplicate-shred proof.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DuplicateShred {
    pub from: Pubkey,
    pub wallclock: u64,
    pub slot: u64,
    pub num_chunks: u8,
    pub chunk_index: u8,
    pub chunk: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotHashes {
    pub from: Pubkey,
    pub full: (u64, Hash),
    pub incremental: Vec<(u64, Hash)>,
    pub wallclock: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestartLastVotedForkSlots {
    pub from: Pubkey,
    pub wallclock: u64,
    pub last_voted_slot: u64,
    pub last_voted_hash: Hash,
    pub shred_version: u16,
    pub offsets: Vec<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestartHeaviestFork {
    pub from: Pubkey,
    pub wallclock: u64,
    pub last_slot: u64,
    pub last_slot_hash: Hash,
    pub observed_stake: u64,
    pub shred_version: u16,
}

// =============================================================================
// CRDS DATA
// =============================================================================

/// Every kind of value carried in the replicated table.
///
/// Variant order is the wire discriminant and must not change.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum CrdsData {
    ContactInfo(ContactInfo),
    Vote(u8, Vote),
    LowestSlot(u8, LowestSlot),
    AccountsHashes(AccountsHashes),
    EpochSlots(u8, EpochSlots),
    LegacyVersion(LegacyVersion),
    Version(Version),
    NodeInstance(NodeInstance),
    DuplicateShred(u16, DuplicateShred),
    SnapshotHashes(SnapshotHashes),
    RestartLastVotedForkSlots(RestartLastVotedForkSlots),
    RestartHeaviestFork(RestartHeaviestFork),
}

/// Field-less mirror of [`CrdsData`] variants.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CrdsKind {
    ContactInfo,
    Vote,
    LowestSlot,
    AccountsHashes,
    EpochSlots,
    LegacyVersion,
    Version,
    NodeInstance,
    DuplicateShred,
    SnapshotHashes,
    RestartLastVotedForkSlots,
    RestartHeaviestFork,
}

impl CrdsKind {
    pub const ALL: [CrdsKind; 12] = [
        CrdsKind::ContactInfo,
        CrdsKind::Vote,
        CrdsKind::LowestSlot,
        CrdsKind::AccountsHashes,
        CrdsKind::EpochSlots,
        CrdsKind::LegacyVersion,
        CrdsKind::Version,
        CrdsKind::NodeInstance,
        CrdsKind::DuplicateShred,
        CrdsKind::SnapshotHashes,
        CrdsKind::RestartLastVotedForkSlots,
        CrdsKind::RestartHeaviestFork,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CrdsKind::ContactInfo => "contact-info",
            CrdsKind::Vote => "vote",
            CrdsKind::LowestSlot => "lowest-slot",
            CrdsKind::AccountsHashes => "accounts-hashes",
            CrdsKind::EpochSlots => "epoch-slots",
            CrdsKind::LegacyVersion => "legacy-version",
            CrdsKind::Version => "version",
            CrdsKind::NodeInstance => "node-instance",
            CrdsKind::DuplicateShred => "duplicate-shred",
            CrdsKind::SnapshotHashes => "snapshot-hashes",
            CrdsKind::RestartLastVotedForkSlots => "restart-last-voted-fork-slots",
            CrdsKind::RestartHeaviestFork => "restart-heaviest-fork",
        }
    }
}

impl fmt::Display for CrdsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrdsKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CrdsKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown crds kind: {s}"))
    }
}

/// Dedup key of the table: at most one live value per label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CrdsValueLabel {
    pub kind: CrdsKind,
    pub origin: Pubkey,
    /// Sub-index for kinds with several concurrent values per origin
    pub index: u16,
}

impl CrdsValueLabel {
    pub fn new(kind: CrdsKind, origin: Pubkey) -> Self {
        Self {
            kind,
            origin,
            index: 0,
        }
    }

    pub fn contact_info(origin: Pubkey) -> Self {
        Self::new(CrdsKind::ContactInfo, origin)
    }
}

impl fmt::Display for CrdsValueLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}, {})", self.kind, self.origin, self.index)
    }
}

impl CrdsData {
    pub fn kind(&self) -> CrdsKind {
        match self {
            CrdsData::ContactInfo(_) => CrdsKind::ContactInfo,
            CrdsData::Vote(..) => CrdsKind::Vote,
            CrdsData::LowestSlot(..) => CrdsKind::LowestSlot,
            CrdsData::AccountsHashes(_) => CrdsKind::AccountsHashes,
            CrdsData::EpochSlots(..) => CrdsKind::EpochSlots,
            CrdsData::LegacyVersion(_) => CrdsKind::LegacyVersion,
            CrdsData::Version(_) => CrdsKind::Version,
            CrdsData::NodeInstance(_) => CrdsKind::NodeInstance,
            CrdsData::DuplicateShred(..) => CrdsKind::DuplicateShred,
            CrdsData::SnapshotHashes(_) => CrdsKind::SnapshotHashes,
            CrdsData::RestartLastVotedForkSlots(_) => CrdsKind::RestartLastVotedForkSlots,
            CrdsData::RestartHeaviestFork(_) => CrdsKind::RestartHeaviestFork,
        }
    }

    /// Origin that authored (and must have signed) the value.
    pub fn pubkey(&self) -> Pubkey {
        match self {
            CrdsData::ContactInfo(v) => v.pubkey,
            CrdsData::Vote(_, v) => v.from,
            CrdsData::LowestSlot(_, v) => v.from,
            CrdsData::AccountsHashes(v) => v.from,
            CrdsData::EpochSlots(_, v) => v.from,
            CrdsData::LegacyVersion(v) => v.from,
            CrdsData::Version(v) => v.from,
            CrdsData::NodeInstance(v) => v.from,
            CrdsData::DuplicateShred(_, v) => v.from,
            CrdsData::SnapshotHashes(v) => v.from,
            CrdsData::RestartLastVotedForkSlots(v) => v.from,
            CrdsData::RestartHeaviestFork(v) => v.from,
        }
    }

    pub fn wallclock(&self) -> u64 {
        match self {
            CrdsData::ContactInfo(v) => v.wallclock,
            CrdsData::Vote(_, v) => v.wallclock,
            CrdsData::LowestSlot(_, v) => v.wallclock,
            CrdsData::AccountsHashes(v) => v.wallclock,
            CrdsData::EpochSlots(_, v) => v.wallclock,
            CrdsData::LegacyVersion(v) => v.wallclock,
            CrdsData::Version(v) => v.wallclock,
            CrdsData::NodeInstance(v) => v.wallclock,
            CrdsData::DuplicateShred(_, v) => v.wallclock,
            CrdsData::SnapshotHashes(v) => v.wallclock,
            CrdsData::RestartLastVotedForkSlots(v) => v.wallclock,
            CrdsData::RestartHeaviestFork(v) => v.wallclock,
        }
    }

    pub fn index(&self) -> u16 {
        match self {
            CrdsData::Vote(ix, _) | CrdsData::LowestSlot(ix, _) | CrdsData::EpochSlots(ix, _) => {
                u16::from(*ix)
            }
            CrdsData::DuplicateShred(ix, _) => *ix,
            _ => 0,
        }
    }

    pub fn label(&self) -> CrdsValueLabel {
        CrdsValueLabel {
            kind: self.kind(),
            origin: self.pubkey(),
            index: self.index(),
        }
    }
}

impl Sanitize for CrdsData {
    fn sanitize(&self) -> Result<(), SanitizeError> {
        sanitize_wallclock(self.wallclock())?;
        match self {
            CrdsData::Vote(ix, _) if *ix >= MAX_VOTES => Err(SanitizeError::IndexOutOfBounds),
            CrdsData::LowestSlot(ix, _) if *ix != 0 => Err(SanitizeError::IndexOutOfBounds),
            CrdsData::EpochSlots(ix, _) if u16::from(*ix) >= MAX_EPOCH_SLOTS => {
                Err(SanitizeError::IndexOutOfBounds)
            }
            CrdsData::DuplicateShred(ix, shred) => {
                if *ix >= MAX_DUPLICATE_SHREDS {
                    Err(SanitizeError::IndexOutOfBounds)
                } else if shred.chunk_index >= shred.num_chunks {
                    Err(SanitizeError::IndexOutOfBounds)
                } else {
                    Ok(())
                }
            }
            CrdsData::SnapshotHashes(hashes) => {
                let (full_slot, _) = hashes.full;
                if hashes.incremental.iter().any(|(slot, _)| *slot <= full_slot) {
                    Err(SanitizeError::InvalidValue)
                } else {
                    Ok(())
                }
            }
            CrdsData::NodeInstance(instance) => sanitize_wallclock(instance.timestamp),
            _ => Ok(()),
        }
    }
}

// =============================================================================
// SIGNED VALUE
// =============================================================================

/// A signed table value.
///
/// The content hash is computed once when the value is built or decoded
/// and never travels on the wire.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CrdsValue {
    pub(crate) signature: Signature,
    pub(crate) data: CrdsData,
    #[serde(skip_serializing)]
    pub(crate) hash: Hash,
}

impl<'de> Deserialize<'de> for CrdsValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Unhashed {
            signature: Signature,
            data: CrdsData,
        }

        let Unhashed { signature, data } = Unhashed::deserialize(deserializer)?;
        let hash =
            crate::crypto::crds_value_hash(&signature, &data).map_err(de::Error::custom)?;
        Ok(Self {
            signature,
            data,
            hash,
        })
    }
}

impl CrdsValue {
    pub fn data(&self) -> &CrdsData {
        &self.data
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Content hash over signature and data.
    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn pubkey(&self) -> Pubkey {
        self.data.pubkey()
    }

    pub fn wallclock(&self) -> u64 {
        self.data.wallclock()
    }

    pub fn label(&self) -> CrdsValueLabel {
        self.data.label()
    }

    pub fn kind(&self) -> CrdsKind {
        self.data.kind()
    }

    pub fn contact_info(&self) -> Option<&ContactInfo> {
        match &self.data {
            CrdsData::ContactInfo(node) => Some(node),
            _ => None,
        }
    }
}

impl Sanitize for CrdsValue {
    fn sanitize(&self) -> Result<(), SanitizeError> {
        self.data.sanitize()
    }
}
