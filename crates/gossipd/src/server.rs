//! gossipd server - packet pipeline and cycle loop
//!
//! receive -> verify workers -> processing (engine + cycle ticks) -> send.
//! Stages are tokio tasks joined by bounded channels; a full channel drops
//! the packet instead of waiting.

use crate::config::Config;
use crate::engine::{EngineStats, GossipEngine, GossipError};
use crate::stakes::{StakeError, StakeTable};
use crate::storage::{Storage, StorageError};
use crds_gossip_core::protocol::Protocol;
use crds_gossip_core::timestamp;
use crds_gossip_net::{Packet, PacketBatch, PacketSink, PacketStream, TransportError, UdpTransport};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

const PACKET_CHANNEL_CAPACITY: usize = 4096;
const SEND_CHANNEL_CAPACITY: usize = 1024;
const PERSIST_INTERVAL: Duration = Duration::from_secs(60);

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Stake table error: {0}")]
    Stakes(#[from] StakeError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Gossip error: {0}")]
    Gossip(#[from] GossipError),
    #[error("Another instance with our identity is running")]
    Superseded,
}

/// Server state
pub struct Server {
    config: Config,
    storage: Arc<Storage>,
    engine: Arc<Mutex<GossipEngine>>,
    /// Shutdown signal
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let storage = Arc::new(Storage::open(&config.data_dir)?);
        let keypair = storage.load_or_create_identity()?;

        let stakes = match &config.stakes {
            Some(path) => StakeTable::load(path)?,
            None => StakeTable::default(),
        };
        info!("Loaded stakes for {} nodes (total {})", stakes.len(), stakes.total());

        let now = timestamp();
        let mut engine = GossipEngine::new(
            keypair,
            config.gossip_addr(),
            config.entrypoints.clone(),
            stakes,
            config.gossip_params(),
            now,
        )?;
        let saved = storage.load_contact_infos(config.restore_max_age_secs.saturating_mul(1000), now)?;
        let restored = engine.restore_contact_infos(saved, now);
        if restored > 0 {
            info!("Restored {} contact infos", restored);
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            storage,
            engine: Arc::new(Mutex::new(engine)),
            shutdown_tx,
        })
    }

    pub fn pubkey(&self) -> crds_gossip_core::Pubkey {
        self.engine.lock().pubkey()
    }

    /// Run until shutdown or until another instance supersedes us
    pub async fn run(&self) -> Result<(), ServerError> {
        let transport = UdpTransport::bind(self.config.listen).await?;
        info!(
            "Starting gossipd {} on {} (advertising {})",
            self.pubkey(),
            transport.local_addr(),
            self.config.gossip_addr()
        );
        for entrypoint in &self.config.entrypoints {
            info!("Entrypoint: {}", entrypoint);
        }
        let (stream, sink) = transport.split();

        let (verified_tx, verified_rx) = mpsc::channel(PACKET_CHANNEL_CAPACITY);
        let (send_tx, send_rx) = mpsc::channel(SEND_CHANNEL_CAPACITY);

        let num_workers = self.config.verify_workers.max(1);
        let mut worker_txs = Vec::with_capacity(num_workers);
        let mut handles = Vec::new();
        for id in 0..num_workers {
            let (tx, rx) = mpsc::channel(PACKET_CHANNEL_CAPACITY);
            worker_txs.push(tx);
            handles.push(self.spawn_verify_worker(id, rx, verified_tx.clone()));
        }
        drop(verified_tx);
        handles.push(self.spawn_receive_task(stream, worker_txs));
        handles.push(self.spawn_send_task(sink, send_rx));

        let result = self.process(verified_rx, send_tx).await;

        let _ = self.shutdown_tx.send(());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Pipeline task failed: {}", e);
            }
        }
        self.persist();
        self.storage.flush()?;
        info!("gossipd stopped");
        result
    }

    /// Processing stage: the only place the engine is driven.
    async fn process(
        &self,
        mut verified_rx: mpsc::Receiver<(SocketAddr, Protocol)>,
        send_tx: mpsc::Sender<PacketBatch>,
    ) -> Result<(), ServerError> {
        let mut cycle = interval(Duration::from_millis(self.config.cycle_interval_ms));
        cycle.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut persist = interval(PERSIST_INTERVAL);
        persist.tick().await;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                received = verified_rx.recv() => {
                    let Some((from, message)) = received else {
                        break;
                    };
                    let replies = self.engine.lock().handle_packet(from, message, timestamp());
                    forward(&send_tx, replies);
                }
                _ = cycle.tick() => {
                    let output = self.engine.lock().run_cycle(timestamp());
                    trace!("Cycle {:?} produced {} messages", output.phases, output.messages.len());
                    forward(&send_tx, output.messages);
                }
                _ = persist.tick() => {
                    self.persist();
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutting down...");
                    break;
                }
            }
            if self.engine.lock().is_superseded() {
                error!("Shutting down: superseded by a newer instance of {}", self.pubkey());
                return Err(ServerError::Superseded);
            }
        }
        Ok(())
    }

    /// Receive stage: spread datagrams over the verify workers.
    fn spawn_receive_task(
        &self,
        mut stream: PacketStream,
        workers: Vec<mpsc::Sender<Packet>>,
    ) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut next = 0usize;
            loop {
                tokio::select! {
                    received = stream.recv() => {
                        match received {
                            Some(Ok(packet)) => {
                                let worker = &workers[next % workers.len()];
                                next = next.wrapping_add(1);
                                if worker.try_send(packet).is_err() {
                                    debug!("Verify queue full, dropping packet");
                                }
                            }
                            Some(Err(e)) => debug!("Receive error: {}", e),
                            None => break,
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        })
    }

    /// Verify stage: decode, sanitize and check signatures.
    fn spawn_verify_worker(
        &self,
        id: usize,
        mut rx: mpsc::Receiver<Packet>,
        verified_tx: mpsc::Sender<(SocketAddr, Protocol)>,
    ) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = rx.recv() => {
                        let Some(packet) = received else {
                            break;
                        };
                        match packet.decode().and_then(Protocol::verify) {
                            Ok(message) => {
                                if verified_tx.try_send((packet.addr, message)).is_err() {
                                    debug!("Processing queue full, dropping packet");
                                }
                            }
                            Err(e) => trace!("Worker {}: rejected packet from {}: {}", id, packet.addr, e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        })
    }

    /// Send stage: fire and forget.
    fn spawn_send_task(
        &self,
        mut sink: PacketSink,
        mut send_rx: mpsc::Receiver<PacketBatch>,
    ) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    batch = send_rx.recv() => {
                        let Some(batch) = batch else {
                            break;
                        };
                        let dropped = batch.dropped();
                        let sent = sink.send_batch(batch).await;
                        trace!("Sent {} packets ({} oversized dropped)", sent, dropped);
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        })
    }

    /// Snapshot known contact infos to storage.
    fn persist(&self) {
        let values = self.engine.lock().contact_info_snapshot();
        match self.storage.put_contact_infos(&values, timestamp()) {
            Ok(count) => debug!("Persisted {} contact infos", count),
            Err(e) => warn!("Failed to persist contact infos: {}", e),
        }
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get engine statistics
    pub fn stats(&self) -> EngineStats {
        self.engine.lock().stats()
    }
}

fn forward(send_tx: &mpsc::Sender<PacketBatch>, messages: Vec<(SocketAddr, Protocol)>) {
    if messages.is_empty() {
        return;
    }
    if send_tx.try_send(PacketBatch::from_messages(messages)).is_err() {
        debug!("Send queue full, dropping batch");
    }
}
