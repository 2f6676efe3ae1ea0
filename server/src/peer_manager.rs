//! Peer bookkeeping for the relay
//!
//! This module tracks every participant attached to the relay:
//! - Peer id assignment (sequential, never reusing 0 which means "nobody")
//! - Address lookup for routing incoming datagrams
//! - Liveness tracking and timeout detection
//! - Capacity enforcement
//!
//! The relay never interprets message payloads; it only needs to know who is
//! present and where to forward to.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A participant attached to the relay
#[derive(Debug)]
pub struct Peer {
    /// Stable peer identifier handed out by the relay
    pub id: i64,
    /// Network address for forwarding
    pub addr: SocketAddr,
    /// Last time we received any packet from this peer
    pub last_seen: Instant,
    /// Number of payloads this peer has broadcast through the relay
    pub broadcasts: u64,
}

impl Peer {
    pub fn new(id: i64, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            broadcasts: 0,
        }
    }

    /// Returns true if nothing was heard from this peer within `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Tracks all attached peers.
///
/// Peer ids increase monotonically for the lifetime of the relay, so a peer
/// that reconnects is seen by everyone else as a new participant.
pub struct PeerManager {
    peers: HashMap<i64, Peer>,
    next_peer_id: i64,
    max_peers: usize,
}

impl PeerManager {
    pub fn new(max_peers: usize) -> Self {
        Self {
            peers: HashMap::new(),
            next_peer_id: 1,
            max_peers,
        }
    }

    /// Attaches a new peer.
    ///
    /// Returns `None` when the session is full.
    pub fn add_peer(&mut self, addr: SocketAddr) -> Option<i64> {
        if self.peers.len() >= self.max_peers {
            return None;
        }

        let peer_id = self.next_peer_id;
        self.next_peer_id += 1;

        info!("Peer {} joined from {}", peer_id, addr);
        self.peers.insert(peer_id, Peer::new(peer_id, addr));

        Some(peer_id)
    }

    /// Detaches a peer. Returns false if it was already gone.
    pub fn remove_peer(&mut self, peer_id: &i64) -> bool {
        if let Some(peer) = self.peers.remove(peer_id) {
            info!("Peer {} left ({} broadcasts relayed)", peer.id, peer.broadcasts);
            true
        } else {
            false
        }
    }

    pub fn find_peer_by_addr(&self, addr: SocketAddr) -> Option<i64> {
        self.peers
            .iter()
            .find(|(_, peer)| peer.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Marks a peer as alive. Returns false for an unknown peer.
    pub fn touch(&mut self, peer_id: i64) -> bool {
        if let Some(peer) = self.peers.get_mut(&peer_id) {
            peer.last_seen = Instant::now();
            true
        } else {
            false
        }
    }

    /// Marks a peer as alive and counts one relayed broadcast.
    pub fn record_broadcast(&mut self, peer_id: i64) -> bool {
        if let Some(peer) = self.peers.get_mut(&peer_id) {
            peer.last_seen = Instant::now();
            peer.broadcasts += 1;
            true
        } else {
            false
        }
    }

    /// Removes and returns the peers that have been silent for `timeout`.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<i64> {
        let timed_out: Vec<i64> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for peer_id in &timed_out {
            self.remove_peer(peer_id);
        }

        timed_out
    }

    /// Ids and addresses of every attached peer, for forwarding.
    pub fn peer_addrs(&self) -> Vec<(i64, SocketAddr)> {
        self.peers
            .iter()
            .map(|(id, peer)| (*id, peer.addr))
            .collect()
    }

    /// Ids of every attached peer except `exclude`, in ascending order.
    pub fn peer_ids_except(&self, exclude: i64) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .peers
            .keys()
            .copied()
            .filter(|id| *id != exclude)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn total_broadcasts(&self) -> u64 {
        self.peers.values().map(|peer| peer.broadcasts).sum()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    #[test]
    fn test_peer_creation() {
        let peer = Peer::new(1, test_addr());

        assert_eq!(peer.id, 1);
        assert_eq!(peer.addr, test_addr());
        assert_eq!(peer.broadcasts, 0);
    }

    #[test]
    fn test_peer_timeout() {
        let mut peer = Peer::new(1, test_addr());
        assert!(!peer.is_timed_out(Duration::from_secs(1)));

        peer.last_seen = Instant::now() - Duration::from_secs(2);
        assert!(peer.is_timed_out(Duration::from_secs(1)));
    }

    #[test]
    fn test_peer_ids_start_at_one() {
        let mut manager = PeerManager::new(4);
        assert!(manager.is_empty());

        assert_eq!(manager.add_peer(test_addr()), Some(1));
        assert_eq!(manager.add_peer(test_addr2()), Some(2));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_add_peer_max_capacity() {
        let mut manager = PeerManager::new(1);

        assert!(manager.add_peer(test_addr()).is_some());
        assert!(manager.add_peer(test_addr2()).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut manager = PeerManager::new(2);
        let first = manager.add_peer(test_addr()).unwrap();
        assert!(manager.remove_peer(&first));

        let second = manager.add_peer(test_addr()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_remove_nonexistent_peer() {
        let mut manager = PeerManager::new(2);
        assert!(!manager.remove_peer(&999));
    }

    #[test]
    fn test_find_peer_by_addr() {
        let mut manager = PeerManager::new(2);
        let id1 = manager.add_peer(test_addr()).unwrap();
        manager.add_peer(test_addr2()).unwrap();

        assert_eq!(manager.find_peer_by_addr(test_addr()), Some(id1));

        let unknown: SocketAddr = "192.168.1.1:9999".parse().unwrap();
        assert_eq!(manager.find_peer_by_addr(unknown), None);
    }

    #[test]
    fn test_record_broadcast_counts() {
        let mut manager = PeerManager::new(2);
        let id = manager.add_peer(test_addr()).unwrap();

        assert!(manager.record_broadcast(id));
        assert!(manager.record_broadcast(id));
        assert!(!manager.record_broadcast(42));
        assert_eq!(manager.total_broadcasts(), 2);
    }

    #[test]
    fn test_check_timeouts_removes_silent_peers() {
        let mut manager = PeerManager::new(3);
        let quiet = manager.add_peer(test_addr()).unwrap();
        let chatty = manager.add_peer(test_addr2()).unwrap();

        manager.peers.get_mut(&quiet).unwrap().last_seen =
            Instant::now() - Duration::from_secs(10);
        assert!(manager.touch(chatty));

        let removed = manager.check_timeouts(Duration::from_secs(5));
        assert_eq!(removed, vec![quiet]);
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.find_peer_by_addr(test_addr2()), Some(chatty));
    }

    #[test]
    fn test_peer_ids_except() {
        let mut manager = PeerManager::new(4);
        let a = manager.add_peer(test_addr()).unwrap();
        let b = manager.add_peer(test_addr2()).unwrap();
        let c = manager
            .add_peer("127.0.0.1:8082".parse().unwrap())
            .unwrap();

        assert_eq!(manager.peer_ids_except(b), vec![a, c]);
        assert_eq!(manager.peer_addrs().len(), 3);
    }
}
