//! UDP transport layer
//!
//! A single socket framed with [`PacketCodec`], split into a receive stream
//! and a send sink so that the receive and send stages can run as separate
//! tasks.

use crate::framing::{FrameError, Packet, PacketBatch, PacketCodec};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio_util::udp::UdpFramed;
use tracing::{debug, info};

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Socket closed")]
    Closed,
}

type Framed = UdpFramed<PacketCodec>;

/// Bound gossip socket.
pub struct UdpTransport {
    framed: Framed,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind to `listen_addr`.
    pub async fn bind(listen_addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(listen_addr).await?;
        let local_addr = socket.local_addr()?;
        info!("Gossip socket bound on {}", local_addr);
        Ok(Self {
            framed: UdpFramed::new(socket, PacketCodec::new()),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Split into independent receive and send halves.
    pub fn split(self) -> (PacketStream, PacketSink) {
        let (sink, stream) = self.framed.split();
        (PacketStream { inner: stream }, PacketSink { inner: sink })
    }
}

/// Receive half: yields one [`Packet`] per datagram.
pub struct PacketStream {
    inner: SplitStream<Framed>,
}

impl PacketStream {
    /// Next datagram, or `None` once the socket is closed.
    ///
    /// Oversized or unreadable datagrams are returned as errors; the stream
    /// stays usable afterwards.
    pub async fn recv(&mut self) -> Option<Result<Packet, TransportError>> {
        let next = self.inner.next().await?;
        Some(
            next.map(|(data, addr)| Packet { addr, data })
                .map_err(TransportError::from),
        )
    }
}

/// Send half.
pub struct PacketSink {
    inner: SplitSink<Framed, (Bytes, SocketAddr)>,
}

impl PacketSink {
    pub async fn send(&mut self, packet: Packet) -> Result<(), TransportError> {
        self.inner
            .send((packet.data, packet.addr))
            .await
            .map_err(TransportError::from)
    }

    /// Send every packet of `batch`, returning how many were written.
    ///
    /// Send failures are logged and skipped; delivery is best effort.
    pub async fn send_batch(&mut self, batch: PacketBatch) -> usize {
        let mut sent = 0;
        for packet in batch.into_packets() {
            let addr = packet.addr;
            match self.send(packet).await {
                Ok(()) => sent += 1,
                Err(e) => debug!("Failed to send to {}: {}", addr, e),
            }
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds_gossip_core::crypto::KeyPair;
    use crds_gossip_core::protocol::{Ping, Protocol};
    use std::time::Duration;

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_send_and_receive_packet() {
        let a = UdpTransport::bind(localhost()).await.unwrap();
        let b = UdpTransport::bind(localhost()).await.unwrap();
        let a_addr = a.local_addr();
        let b_addr = b.local_addr();
        let (_a_stream, mut a_sink) = a.split();
        let (mut b_stream, _b_sink) = b.split();

        let kp = KeyPair::generate();
        let ping = Protocol::PingMessage(Ping::new([9u8; 32], &kp));
        let batch = PacketBatch::from_messages(vec![(b_addr, ping.clone())]);
        assert_eq!(a_sink.send_batch(batch).await, 1);

        let packet = tokio::time::timeout(Duration::from_secs(5), b_stream.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(packet.addr, a_addr);
        assert_eq!(packet.decode().unwrap(), ping);
    }
}
