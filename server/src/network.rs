//! Relay network layer: UDP socket handling and packet forwarding

use crate::peer_manager::PeerManager;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Packet, MAX_DATAGRAM_SIZE, PEER_TIMEOUT_SECS, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Messages sent from network tasks to the main relay loop
#[derive(Debug)]
pub enum RelayMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    PeerTimeout { peer_id: i64 },
    Shutdown,
}

/// Messages sent from the relay loop to the sender task
#[derive(Debug)]
pub enum OutboundMessage {
    SendPacket {
        packet: Packet,
        addr: SocketAddr,
    },
    BroadcastPacket {
        packet: Packet,
        exclude: Option<i64>,
    },
}

/// Session relay forwarding participant broadcasts to every other participant
pub struct Server {
    socket: Arc<UdpSocket>,
    peers: Arc<RwLock<PeerManager>>,
    peer_timeout: Duration,

    // Communication channels
    relay_tx: mpsc::UnboundedSender<RelayMessage>,
    relay_rx: mpsc::UnboundedReceiver<RelayMessage>,
    out_tx: mpsc::UnboundedSender<OutboundMessage>,
    out_rx: mpsc::UnboundedReceiver<OutboundMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        max_peers: usize,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Relay listening on {}", socket.local_addr()?);

        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            peers: Arc::new(RwLock::new(PeerManager::new(max_peers))),
            peer_timeout: Duration::from_secs(PEER_TIMEOUT_SECS),
            relay_tx,
            relay_rx,
            out_tx,
            out_rx,
        })
    }

    /// Overrides how long a silent peer is kept before it is dropped.
    pub fn with_peer_timeout(mut self, timeout: Duration) -> Self {
        self.peer_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle for stopping a running relay from another task.
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<RelayMessage> {
        self.relay_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let relay_tx = self.relay_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                relay_tx.send(RelayMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to relay loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing packet queue
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let peers = Arc::clone(&self.peers);
        let mut out_rx = std::mem::replace(&mut self.out_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                match message {
                    OutboundMessage::SendPacket { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    OutboundMessage::BroadcastPacket { packet, exclude } => {
                        let peer_addrs = {
                            let peers_guard = peers.read().await;
                            peers_guard.peer_addrs()
                        };

                        for (peer_id, addr) in peer_addrs {
                            if Some(peer_id) == exclude {
                                continue;
                            }

                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to peer {}: {}", peer_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that drops peers which stopped sending heartbeats
    async fn spawn_timeout_checker(&self) {
        let peers = Arc::clone(&self.peers);
        let relay_tx = self.relay_tx.clone();
        let timeout = self.peer_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut peers_guard = peers.write().await;
                    peers_guard.check_timeouts(timeout)
                };

                for peer_id in timed_out {
                    if let Err(e) = relay_tx.send(RelayMessage::PeerTimeout { peer_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.out_tx.send(OutboundMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<i64>) {
        if let Err(e) = self
            .out_tx
            .send(OutboundMessage::BroadcastPacket { packet, exclude })
        {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    fn announce_departure(&self, peer_id: i64) {
        self.broadcast_packet(Packet::PeerLeft { peer_id }, Some(peer_id));
    }

    async fn peer_for(&self, addr: SocketAddr) -> Option<i64> {
        let peers = self.peers.read().await;
        peers.find_peer_by_addr(addr)
    }

    /// Processes one packet from a peer
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!("Peer connecting from {} (version: {})", addr, client_version);

                if client_version != PROTOCOL_VERSION {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                // A reconnect from the same address replaces the old peer
                if let Some(existing_id) = self.peer_for(addr).await {
                    info!("Replacing existing peer {} from {}", existing_id, addr);
                    let mut peers = self.peers.write().await;
                    peers.remove_peer(&existing_id);
                    drop(peers);
                    self.announce_departure(existing_id);
                }

                let joined = {
                    let mut peers = self.peers.write().await;
                    peers
                        .add_peer(addr)
                        .map(|peer_id| (peer_id, peers.peer_ids_except(peer_id)))
                };

                match joined {
                    Some((peer_id, others)) => {
                        self.send_packet(
                            Packet::Connected {
                                peer_id,
                                peers: others,
                            },
                            addr,
                        );
                        self.broadcast_packet(Packet::PeerJoined { peer_id }, Some(peer_id));
                    }
                    None => {
                        self.send_packet(
                            Packet::Disconnected {
                                reason: "Session full".to_string(),
                            },
                            addr,
                        );
                    }
                }
            }

            Packet::Broadcast { sequence, payload } => {
                let Some(sender) = self.peer_for(addr).await else {
                    debug!("Dropping broadcast from unknown address {}", addr);
                    return;
                };

                {
                    let mut peers = self.peers.write().await;
                    peers.record_broadcast(sender);
                }

                self.broadcast_packet(
                    Packet::Forward {
                        sender,
                        sequence,
                        payload,
                    },
                    Some(sender),
                );
            }

            Packet::Heartbeat => {
                if let Some(peer_id) = self.peer_for(addr).await {
                    let mut peers = self.peers.write().await;
                    peers.touch(peer_id);
                }
            }

            Packet::Disconnect => {
                if let Some(peer_id) = self.peer_for(addr).await {
                    let mut peers = self.peers.write().await;
                    peers.remove_peer(&peer_id);
                    drop(peers);
                    self.announce_departure(peer_id);
                }
            }

            _ => {
                warn!("Unexpected packet type from peer at {}", addr);
            }
        }
    }

    /// Main relay loop
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        let mut stats_interval = interval(Duration::from_secs(30));

        info!("Relay started successfully");

        loop {
            tokio::select! {
                message = self.relay_rx.recv() => {
                    match message {
                        Some(RelayMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(RelayMessage::PeerTimeout { peer_id }) => {
                            info!("Peer {} timed out", peer_id);
                            self.announce_departure(peer_id);
                        },
                        Some(RelayMessage::Shutdown) | None => {
                            info!("Relay shutting down");
                            break;
                        }
                    }
                },

                _ = stats_interval.tick() => {
                    let peers = self.peers.read().await;
                    if !peers.is_empty() {
                        debug!("{} peers attached, {} broadcasts relayed",
                               peers.len(), peers.total_broadcasts());
                    }
                },
            }
        }

        Ok(())
    }
}
