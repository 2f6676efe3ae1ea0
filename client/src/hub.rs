//! In-process transport: several sessions sharing one process
//!
//! [`LocalHub`] plays the part of the relay for sessions living in the same
//! process. Used for local simulations and throughout the tests. Every
//! broadcast is kept in a history so that a payload can be delivered again,
//! which is how duplicate delivery is exercised.

use crate::network::{
    Delivery, Subscribers, Transport, TransportError, TransportEvent, TransportSubscription,
};
use log::debug;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct LocalLink {
    connected: AtomicBool,
    subscribers: Subscribers,
}

#[derive(Debug)]
struct HubState {
    next_peer_id: i64,
    peers: BTreeMap<i64, Arc<LocalLink>>,
    history: Vec<(i64, Vec<u8>)>,
}

impl Default for HubState {
    fn default() -> Self {
        Self {
            next_peer_id: 1,
            peers: BTreeMap::new(),
            history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attaches a new participant. Peer ids start at 1.
    ///
    /// The returned transport is already connected; its first subscriber
    /// sees `Connected` followed by one `PeerJoined` per peer already present.
    pub fn join(&self) -> LocalTransport {
        let mut state = self.lock();
        let peer_id = state.next_peer_id;
        state.next_peer_id += 1;

        let link = Arc::new(LocalLink::default());
        link.connected.store(true, Ordering::Release);
        link.subscribers.publish(TransportEvent::Connected {
            local_peer_id: peer_id,
        });

        for (other_id, other) in &state.peers {
            link.subscribers.publish(TransportEvent::PeerJoined { peer_id: *other_id });
            other.subscribers.publish(TransportEvent::PeerJoined { peer_id });
        }

        state.peers.insert(peer_id, Arc::clone(&link));
        debug!("Peer {} joined the local hub", peer_id);

        LocalTransport {
            hub: self.clone(),
            peer_id,
            link,
        }
    }

    /// Detaches `peer_id` and tells everyone else it left.
    pub fn disconnect(&self, peer_id: i64) -> bool {
        let mut state = self.lock();
        let Some(link) = state.peers.remove(&peer_id) else {
            return false;
        };

        link.connected.store(false, Ordering::Release);
        link.subscribers.publish(TransportEvent::Disconnected {
            reason: "Disconnected by hub".to_string(),
        });
        for other in state.peers.values() {
            other.subscribers.publish(TransportEvent::PeerLeft { peer_id });
        }
        true
    }

    /// Every payload broadcast so far, with its sender.
    pub fn history(&self) -> Vec<(i64, Vec<u8>)> {
        self.lock().history.clone()
    }

    /// Delivers `payload` to `peer_id` only, as if it had been received again.
    pub fn deliver(&self, peer_id: i64, payload: Vec<u8>) -> bool {
        let state = self.lock();
        match state.peers.get(&peer_id) {
            Some(link) => {
                link.subscribers.publish(TransportEvent::Received { payload });
                true
            }
            None => false,
        }
    }

    pub fn peer_ids(&self) -> Vec<i64> {
        self.lock().peers.keys().copied().collect()
    }

    fn route(&self, sender: i64, payload: Vec<u8>) {
        let mut state = self.lock();
        for (peer_id, link) in &state.peers {
            if *peer_id != sender {
                link.subscribers.publish(TransportEvent::Received {
                    payload: payload.clone(),
                });
            }
        }
        state.history.push((sender, payload));
    }
}

/// One participant's handle on a [`LocalHub`].
#[derive(Debug, Clone)]
pub struct LocalTransport {
    hub: LocalHub,
    peer_id: i64,
    link: Arc<LocalLink>,
}

impl Transport for LocalTransport {
    fn local_peer_id(&self) -> i64 {
        self.peer_id
    }

    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::Acquire)
    }

    fn broadcast(&self, payload: Vec<u8>, _delivery: Delivery) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.hub.route(self.peer_id, payload);
        Ok(())
    }

    fn subscribe(&self) -> TransportSubscription {
        self.link.subscribers.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_announces_existing_peers() {
        let hub = LocalHub::new();
        let first = hub.join();
        let mut first_events = first.subscribe();
        let second = hub.join();
        let mut second_events = second.subscribe();

        assert_eq!(first.local_peer_id(), 1);
        assert_eq!(second.local_peer_id(), 2);

        assert_eq!(
            first_events.try_next(),
            Some(TransportEvent::Connected { local_peer_id: 1 })
        );
        assert_eq!(
            first_events.try_next(),
            Some(TransportEvent::PeerJoined { peer_id: 2 })
        );
        assert_eq!(
            second_events.try_next(),
            Some(TransportEvent::Connected { local_peer_id: 2 })
        );
        assert_eq!(
            second_events.try_next(),
            Some(TransportEvent::PeerJoined { peer_id: 1 })
        );
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let hub = LocalHub::new();
        let a = hub.join();
        let b = hub.join();
        let mut a_events = a.subscribe();
        let mut b_events = b.subscribe();
        while a_events.try_next().is_some() {}
        while b_events.try_next().is_some() {}

        a.broadcast(vec![1, 2], Delivery::AVATAR).unwrap();

        assert_eq!(a_events.try_next(), None);
        assert_eq!(
            b_events.try_next(),
            Some(TransportEvent::Received { payload: vec![1, 2] })
        );
        assert_eq!(hub.history(), vec![(1, vec![1, 2])]);
    }

    #[test]
    fn test_disconnect() {
        let hub = LocalHub::new();
        let a = hub.join();
        let b = hub.join();
        let mut b_events = b.subscribe();
        while b_events.try_next().is_some() {}

        assert!(hub.disconnect(1));
        assert!(!hub.disconnect(1));
        assert!(!a.is_connected());
        assert!(a.broadcast(vec![0], Delivery::AVATAR).is_err());
        assert_eq!(
            b_events.try_next(),
            Some(TransportEvent::PeerLeft { peer_id: 1 })
        );
        assert_eq!(hub.peer_ids(), vec![2]);
    }
}
