//! Networking primitives for CRDS gossip
//!
//! This crate provides:
//! - Datagram codec bounded by the gossip packet size
//! - Outbound packet batching
//! - UDP transport split into receive and send halves

pub mod framing;
pub mod transport;

pub use framing::{FrameError, Packet, PacketBatch, PacketCodec};
pub use transport::{PacketSink, PacketStream, TransportError, UdpTransport};
