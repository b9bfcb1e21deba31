//! Datagram framing for gossip packets
//!
//! Every gossip message is exactly one UDP datagram of at most
//! [`PACKET_DATA_SIZE`] bytes; there is no length prefix or padding.

use bytes::{BufMut, Bytes, BytesMut};
use crds_gossip_core::protocol::Protocol;
use crds_gossip_core::wire::PACKET_DATA_SIZE;
use std::net::SocketAddr;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Packet too large: {0} bytes (max {PACKET_DATA_SIZE})")]
    TooLarge(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Encode error: {0}")]
    Encode(#[from] crds_gossip_core::Error),
}

/// One datagram with its peer address (source on receive, destination on send).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub addr: SocketAddr,
    pub data: Bytes,
}

impl Packet {
    /// Encode `message` for `addr`.
    pub fn from_protocol(addr: SocketAddr, message: &Protocol) -> Result<Self, FrameError> {
        let data = message.to_bytes()?;
        Ok(Self {
            addr,
            data: Bytes::from(data),
        })
    }

    /// Decode and sanitize the payload.
    pub fn decode(&self) -> Result<Protocol, crds_gossip_core::Error> {
        Protocol::from_bytes(&self.data)
    }
}

/// Outbound packets produced by one engine step.
#[derive(Debug, Default)]
pub struct PacketBatch {
    packets: Vec<Packet>,
    dropped: usize,
}

impl PacketBatch {
    /// Encode every message; messages that fail to encode are counted and dropped.
    pub fn from_messages(messages: impl IntoIterator<Item = (SocketAddr, Protocol)>) -> Self {
        let mut batch = Self::default();
        for (addr, message) in messages {
            batch.push(addr, &message);
        }
        batch
    }

    pub fn push(&mut self, addr: SocketAddr, message: &Protocol) {
        match Packet::from_protocol(addr, message) {
            Ok(packet) => self.packets.push(packet),
            Err(e) => {
                debug!("Dropping {} to {}: {}", message.name(), addr, e);
                self.dropped += 1;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Messages that could not be encoded.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn into_packets(self) -> Vec<Packet> {
        self.packets
    }
}

/// Codec passing whole datagrams through, bounded by the packet size.
///
/// Meant for `UdpFramed`, which hands the decoder one datagram at a time.
#[derive(Clone, Copy, Debug, Default)]
pub struct PacketCodec;

impl PacketCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for PacketCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let datagram = src.split();
        if datagram.len() > PACKET_DATA_SIZE {
            return Err(FrameError::TooLarge(datagram.len()));
        }
        Ok(Some(datagram.freeze()))
    }
}

impl Encoder<Bytes> for PacketCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > PACKET_DATA_SIZE {
            return Err(FrameError::TooLarge(item.len()));
        }
        dst.reserve(item.len());
        dst.put_slice(&item);
        Ok(())
    }
}
