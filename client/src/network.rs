//! Transport abstraction and its UDP implementation
//!
//! The session core only needs two capabilities from the network: broadcast
//! a payload to every other participant, and be told when peers come and go
//! or a payload arrives. [`Transport`] captures exactly that. [`UdpTransport`]
//! implements it against the relay, with the socket owned by a separate
//! [`UdpLink`] task so that sending never blocks the game loop.

use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{
    sequence_newer, Packet, HEARTBEAT_INTERVAL_MS, MAX_DATAGRAM_SIZE, NO_PEER, PROTOCOL_VERSION,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Immediate,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    Unreliable,
    /// Stale or duplicate packets are dropped; order per sender is preserved.
    UnreliableSequenced,
    Reliable,
    ReliableOrdered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Avatar,
    Global,
}

/// Priority, reliability tier and channel attached to an outgoing payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub priority: Priority,
    pub reliability: Reliability,
    pub channel: Channel,
}

impl Delivery {
    /// Tag used for all session traffic.
    pub const AVATAR: Delivery = Delivery {
        priority: Priority::Immediate,
        reliability: Reliability::UnreliableSequenced,
        channel: Channel::Avatar,
    };
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected { local_peer_id: i64 },
    PeerJoined { peer_id: i64 },
    PeerLeft { peer_id: i64 },
    Received { payload: Vec<u8> },
    Disconnected { reason: String },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("transport link has shut down")]
    LinkClosed,
}

/// Scoped subscription to transport events. Dropping it unsubscribes.
#[derive(Debug)]
pub struct TransportSubscription {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportSubscription {
    pub fn new(rx: mpsc::UnboundedReceiver<TransportEvent>) -> Self {
        Self { rx }
    }

    /// Next queued event, without waiting.
    pub fn try_next(&mut self) -> Option<TransportEvent> {
        self.rx.try_recv().ok()
    }

    /// Waits for the next event. `None` once the transport is gone.
    pub async fn next(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// Fan-out list of subscribers, shared by transport implementations.
///
/// Events published before anyone has ever subscribed are kept and handed
/// to the first subscriber, so a session created after the connection came
/// up still sees it.
#[derive(Debug, Default)]
pub struct Subscribers {
    inner: Mutex<SubscriberList>,
}

#[derive(Debug, Default)]
struct SubscriberList {
    senders: Vec<mpsc::UnboundedSender<TransportEvent>>,
    backlog: Vec<TransportEvent>,
    ever_subscribed: bool,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> TransportSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut list = self.lock();

        if !list.ever_subscribed {
            list.ever_subscribed = true;
            for event in list.backlog.drain(..) {
                let _ = tx.send(event);
            }
        }

        list.senders.push(tx);
        TransportSubscription::new(rx)
    }

    /// Delivers `event` to every live subscriber and prunes dropped ones.
    pub fn publish(&self, event: TransportEvent) {
        let mut list = self.lock();

        if !list.ever_subscribed {
            list.backlog.push(event);
            return;
        }

        list.senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn len(&self) -> usize {
        let mut list = self.lock();
        list.senders.retain(|tx| !tx.is_closed());
        list.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SubscriberList> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Capabilities the session needs from the network.
pub trait Transport {
    /// Id the relay assigned to this process, or [`NO_PEER`] before connecting.
    fn local_peer_id(&self) -> i64;

    fn is_connected(&self) -> bool;

    /// Queues `payload` for every other participant. Never blocks.
    fn broadcast(&self, payload: Vec<u8>, delivery: Delivery) -> Result<(), TransportError>;

    fn subscribe(&self) -> TransportSubscription;
}

#[derive(Debug, Default)]
struct LinkState {
    connected: AtomicBool,
    local_peer_id: AtomicI64,
    next_sequence: AtomicU32,
    subscribers: Subscribers,
}

/// Handle to a relay connection, owned by the session.
///
/// The relay only offers one tier: every payload is delivered
/// unreliable-sequenced, so `Delivery` tags are accepted but not
/// differentiated here.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    state: Arc<LinkState>,
    outbound: mpsc::UnboundedSender<Packet>,
}

impl Transport for UdpTransport {
    fn local_peer_id(&self) -> i64 {
        self.state.local_peer_id.load(Ordering::Acquire)
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::Acquire)
    }

    fn broadcast(&self, payload: Vec<u8>, _delivery: Delivery) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let sequence = self.state.next_sequence.fetch_add(1, Ordering::Relaxed);
        self.outbound
            .send(Packet::Broadcast { sequence, payload })
            .map_err(|_| TransportError::LinkClosed)
    }

    fn subscribe(&self) -> TransportSubscription {
        self.state.subscribers.subscribe()
    }
}

/// Async driver that owns the socket. Runs until every [`UdpTransport`]
/// handle is dropped or the relay disconnects us.
pub struct UdpLink {
    socket: UdpSocket,
    server_addr: SocketAddr,
    state: Arc<LinkState>,
    outbound_rx: mpsc::UnboundedReceiver<Packet>,
    last_sequence: HashMap<i64, u32>,
}

/// Binds a local socket and prepares a connection to the relay at
/// `server_addr`. Nothing is sent until [`UdpLink::run`] is polled.
pub async fn connect(
    server_addr: &str,
) -> Result<(UdpTransport, UdpLink), Box<dyn std::error::Error>> {
    let server_addr: SocketAddr = server_addr.parse()?;
    let bind_addr = if server_addr.is_ipv4() {
        "0.0.0.0:0"
    } else {
        "[::]:0"
    };
    let socket = UdpSocket::bind(bind_addr).await?;

    let state = Arc::new(LinkState::default());
    let (outbound, outbound_rx) = mpsc::unbounded_channel();

    let transport = UdpTransport {
        state: Arc::clone(&state),
        outbound,
    };
    let link = UdpLink {
        socket,
        server_addr,
        state,
        outbound_rx,
        last_sequence: HashMap::new(),
    };

    Ok((transport, link))
}

impl UdpLink {
    async fn send_packet(
        &self,
        packet: &Packet,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Returns false once the relay has ended the session.
    fn handle_packet(&mut self, packet: Packet) -> bool {
        let subscribers = &self.state.subscribers;

        match packet {
            Packet::Connected { peer_id, peers } => {
                info!("Connected! Peer ID: {} ({} others present)", peer_id, peers.len());
                self.state.local_peer_id.store(peer_id, Ordering::Release);
                self.state.connected.store(true, Ordering::Release);

                subscribers.publish(TransportEvent::Connected {
                    local_peer_id: peer_id,
                });
                for peer_id in peers {
                    subscribers.publish(TransportEvent::PeerJoined { peer_id });
                }
            }

            Packet::Forward {
                sender,
                sequence,
                payload,
            } => {
                let accept = match self.last_sequence.get(&sender) {
                    Some(&last) => sequence_newer(sequence, last),
                    None => true,
                };

                if accept {
                    self.last_sequence.insert(sender, sequence);
                    subscribers.publish(TransportEvent::Received { payload });
                } else {
                    debug!("Dropping stale payload {} from peer {}", sequence, sender);
                }
            }

            Packet::PeerJoined { peer_id } => {
                subscribers.publish(TransportEvent::PeerJoined { peer_id });
            }

            Packet::PeerLeft { peer_id } => {
                self.last_sequence.remove(&peer_id);
                subscribers.publish(TransportEvent::PeerLeft { peer_id });
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.state.connected.store(false, Ordering::Release);
                self.state.local_peer_id.store(NO_PEER, Ordering::Release);
                subscribers.publish(TransportEvent::Disconnected { reason });
                return false;
            }

            _ => {
                warn!("Unexpected packet type");
            }
        }

        true
    }

    pub async fn run(mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Connecting to relay at {}...", self.server_addr);
        self.send_packet(&Packet::Connect {
            client_version: PROTOCOL_VERSION,
        })
        .await?;

        let mut heartbeat_interval = interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            match deserialize::<Packet>(&buffer[0..len]) {
                                Ok(packet) => {
                                    if !self.handle_packet(packet) {
                                        break;
                                    }
                                }
                                Err(e) => warn!("Failed to deserialize packet: {}", e),
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                outbound = self.outbound_rx.recv() => {
                    match outbound {
                        Some(packet) => {
                            if let Err(e) = self.send_packet(&packet).await {
                                error!("Error sending packet: {}", e);
                            }
                        }
                        None => {
                            info!("Transport dropped, leaving session");
                            if self.state.connected.load(Ordering::Acquire) {
                                self.send_packet(&Packet::Disconnect).await?;
                            }
                            break;
                        }
                    }
                },

                _ = heartbeat_interval.tick() => {
                    if self.state.connected.load(Ordering::Acquire) {
                        if let Err(e) = self.send_packet(&Packet::Heartbeat).await {
                            error!("Error sending heartbeat: {}", e);
                        }
                    }
                },
            }
        }

        self.state.connected.store(false, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avatar_delivery_tag() {
        assert_eq!(Delivery::AVATAR.priority, Priority::Immediate);
        assert_eq!(Delivery::AVATAR.reliability, Reliability::UnreliableSequenced);
        assert_eq!(Delivery::AVATAR.channel, Channel::Avatar);
    }

    #[test]
    fn test_events_before_first_subscribe_are_kept() {
        let subscribers = Subscribers::new();
        subscribers.publish(TransportEvent::Connected { local_peer_id: 4 });

        let mut first = subscribers.subscribe();
        let mut second = subscribers.subscribe();
        assert_eq!(
            first.try_next(),
            Some(TransportEvent::Connected { local_peer_id: 4 })
        );
        assert_eq!(second.try_next(), None);
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let subscribers = Subscribers::new();
        let mut kept = subscribers.subscribe();
        let dropped = subscribers.subscribe();
        assert_eq!(subscribers.len(), 2);

        drop(dropped);
        subscribers.publish(TransportEvent::PeerJoined { peer_id: 2 });

        assert_eq!(subscribers.len(), 1);
        assert_eq!(
            kept.try_next(),
            Some(TransportEvent::PeerJoined { peer_id: 2 })
        );
        assert_eq!(kept.try_next(), None);
    }

    #[tokio::test]
    async fn test_broadcast_requires_connection() {
        let (transport, _link) = connect("127.0.0.1:9").await.unwrap();

        assert!(!transport.is_connected());
        assert_eq!(transport.local_peer_id(), NO_PEER);
        assert!(matches!(
            transport.broadcast(vec![1, 2, 3], Delivery::AVATAR),
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_link_filters_stale_sequences() {
        let (transport, mut link) = connect("127.0.0.1:9").await.unwrap();
        let mut events = transport.subscribe();

        assert!(link.handle_packet(Packet::Connected {
            peer_id: 3,
            peers: vec![1],
        }));
        assert!(transport.is_connected());
        assert_eq!(transport.local_peer_id(), 3);

        for sequence in [5, 5, 4, 6] {
            link.handle_packet(Packet::Forward {
                sender: 1,
                sequence,
                payload: vec![sequence as u8],
            });
        }

        assert_eq!(
            events.try_next(),
            Some(TransportEvent::Connected { local_peer_id: 3 })
        );
        assert_eq!(events.try_next(), Some(TransportEvent::PeerJoined { peer_id: 1 }));
        assert_eq!(
            events.try_next(),
            Some(TransportEvent::Received { payload: vec![5] })
        );
        assert_eq!(
            events.try_next(),
            Some(TransportEvent::Received { payload: vec![6] })
        );
        assert_eq!(events.try_next(), None);
    }

    #[test]
    fn test_subscription_waits_for_events() {
        let subscribers = Subscribers::new();
        let mut events = subscribers.subscribe();
        subscribers.publish(TransportEvent::PeerJoined { peer_id: 9 });

        assert_eq!(
            tokio_test::block_on(events.next()),
            Some(TransportEvent::PeerJoined { peer_id: 9 })
        );

        drop(subscribers);
        assert_eq!(tokio_test::block_on(events.next()), None);
    }

    #[tokio::test]
    async fn test_peer_left_resets_sequence_tracking() {
        let (transport, mut link) = connect("127.0.0.1:9").await.unwrap();
        let mut events = transport.subscribe();

        link.handle_packet(Packet::Forward {
            sender: 2,
            sequence: 10,
            payload: vec![1],
        });
        link.handle_packet(Packet::PeerLeft { peer_id: 2 });
        link.handle_packet(Packet::Forward {
            sender: 2,
            sequence: 0,
            payload: vec![2],
        });

        assert!(matches!(events.try_next(), Some(TransportEvent::Received { .. })));
        assert_eq!(events.try_next(), Some(TransportEvent::PeerLeft { peer_id: 2 }));
        assert_eq!(
            events.try_next(),
            Some(TransportEvent::Received { payload: vec![2] })
        );
    }

    #[tokio::test]
    async fn test_relay_disconnect_ends_link() {
        let (transport, mut link) = connect("127.0.0.1:9").await.unwrap();
        link.handle_packet(Packet::Connected {
            peer_id: 1,
            peers: vec![],
        });

        assert!(!link.handle_packet(Packet::Disconnected {
            reason: "Session full".to_string(),
        }));
        assert!(!transport.is_connected());
    }
}
