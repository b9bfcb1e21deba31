//! Wire encoding for CRDS gossip
//!
//! Every message and every signed payload uses the same fixed layout:
//! - fixed-width integers, little-endian
//! - fixed arrays inline, no length prefix
//! - dynamic sequences prefixed by a u64 length
//! - enums prefixed by a u32 discriminant, then the variant's fields
//! - nested structs flattened field by field, no padding
//!
//! This is bincode's fixed-int configuration. Decoding is bounded by the
//! packet size and rejects trailing bytes.

use crate::error::{Error, Result};
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Maximum payload of a single gossip datagram.
pub const PACKET_DATA_SIZE: usize = 1232;

fn options() -> impl Options {
    bincode::options()
        .with_fixint_encoding()
        .with_little_endian()
}

/// Encode a value.
pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    options().serialize(value).map_err(Error::from)
}

/// Encoded size of a value in bytes.
pub fn serialized_size<T: Serialize + ?Sized>(value: &T) -> Result<u64> {
    options().serialized_size(value).map_err(Error::from)
}

/// Decode a value that must fit in a single packet.
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    if bytes.len() > PACKET_DATA_SIZE {
        return Err(Error::PacketTooLarge(bytes.len()));
    }
    options()
        .with_limit(PACKET_DATA_SIZE as u64)
        .reject_trailing_bytes()
        .deserialize(bytes)
        .map_err(Error::from)
}
