//! Participant directory: peer ids present in the session and their avatars

use crate::dispatcher::NoBroadcast;
use crate::registry::{Registry, RegistryError};
use log::{debug, info};
use shared::{ObjectKind, Vec3, NO_PEER};
use std::collections::{BTreeMap, BTreeSet};

/// Uniform scale applied to every avatar.
pub const AVATAR_SCALE: f32 = 0.2;

/// Object id of the avatar representing `peer_id`.
pub fn avatar_id(peer_id: i64) -> String {
    format!("player{}", peer_id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub peer_id: i64,
    pub avatar_id: String,
}

/// Every participant, the local one included, keyed by peer id.
///
/// Avatars are created locally on every peer when a participant is first
/// seen; they are never broadcast, since each peer observes the same joins.
/// Peer ids are never reused, so a removed id stays departed for good.
#[derive(Debug, Default)]
pub struct Directory {
    local_peer_id: i64,
    participants: BTreeMap<i64, Participant>,
    departed: BTreeSet<i64>,
}

impl Directory {
    pub fn new() -> Self {
        Self {
            local_peer_id: NO_PEER,
            participants: BTreeMap::new(),
            departed: BTreeSet::new(),
        }
    }

    pub fn local_peer_id(&self) -> i64 {
        self.local_peer_id
    }

    /// Registers the local participant. Called once the transport knows our id.
    pub fn set_local(&mut self, peer_id: i64, registry: &mut Registry) -> String {
        if self.local_peer_id != NO_PEER && self.local_peer_id != peer_id {
            // Reconnected under a new id; the old local entry is stale
            let previous = self.local_peer_id;
            self.local_peer_id = NO_PEER;
            self.remove(previous, registry);
        }

        self.local_peer_id = peer_id;
        info!("Local participant is peer {}", peer_id);
        self.resolve(peer_id, registry)
    }

    /// Returns the avatar of `peer_id`, creating participant and avatar on
    /// first sight.
    pub fn resolve(&mut self, peer_id: i64, registry: &mut Registry) -> String {
        if let Some(participant) = self.participants.get(&peer_id) {
            return participant.avatar_id.clone();
        }

        let avatar = avatar_id(peer_id);
        match registry.spawn(&avatar, ObjectKind::Player, &mut NoBroadcast) {
            Ok(()) => {
                registry.set_scale(&avatar, Vec3::splat(AVATAR_SCALE), &mut NoBroadcast);
            }
            Err(RegistryError::DuplicateId(_)) => {
                debug!("Adopting existing avatar {}", avatar);
            }
        }

        debug!("Participant {} resolved to {}", peer_id, avatar);
        self.participants.insert(
            peer_id,
            Participant {
                peer_id,
                avatar_id: avatar.clone(),
            },
        );
        avatar
    }

    /// Drops a departed participant and its avatar. The local participant is
    /// never removed this way.
    pub fn remove(&mut self, peer_id: i64, registry: &mut Registry) -> bool {
        if peer_id == self.local_peer_id {
            return false;
        }
        if peer_id != NO_PEER {
            self.departed.insert(peer_id);
        }

        match self.participants.remove(&peer_id) {
            Some(participant) => {
                registry.destroy(&participant.avatar_id, &mut NoBroadcast);
                debug!("Participant {} removed", peer_id);
                true
            }
            None => false,
        }
    }

    /// True for peers that left the session. Late payloads from them must
    /// not bring them back.
    pub fn has_departed(&self, peer_id: i64) -> bool {
        self.departed.contains(&peer_id)
    }

    pub fn avatar_of(&self, peer_id: i64) -> Option<&str> {
        self.participants
            .get(&peer_id)
            .map(|participant| participant.avatar_id.as_str())
    }

    pub fn contains(&self, peer_id: i64) -> bool {
        self.participants.contains_key(&peer_id)
    }

    /// Present peer ids, ascending.
    pub fn peer_ids(&self) -> Vec<i64> {
        self.participants.keys().copied().collect()
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_resolve_creates_avatar_once() {
        let mut registry = Registry::new();
        let mut directory = Directory::new();

        assert_eq!(directory.resolve(4, &mut registry), "player4");
        assert_eq!(directory.resolve(4, &mut registry), "player4");

        assert_eq!(directory.len(), 1);
        assert_eq!(registry.len(), 1);

        let avatar = registry.get("player4").unwrap();
        assert_eq!(avatar.kind, ObjectKind::Player);
        assert_approx_eq!(avatar.scale.x, AVATAR_SCALE);
        assert_approx_eq!(avatar.scale.z, AVATAR_SCALE);
    }

    #[test]
    fn test_resolve_adopts_existing_object() {
        let mut registry = Registry::new();
        registry
            .spawn("player9", ObjectKind::Player, &mut NoBroadcast)
            .unwrap();

        let mut directory = Directory::new();
        assert_eq!(directory.resolve(9, &mut registry), "player9");
        assert!(directory.contains(9));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_destroys_avatar() {
        let mut registry = Registry::new();
        let mut directory = Directory::new();
        directory.resolve(2, &mut registry);

        assert!(directory.remove(2, &mut registry));
        assert!(!directory.remove(2, &mut registry));
        assert!(registry.get("player2").is_none());
        assert_eq!(directory.avatar_of(2), None);
        assert!(directory.has_departed(2));
        assert!(!directory.has_departed(3));
    }

    #[test]
    fn test_local_participant_is_not_removed() {
        let mut registry = Registry::new();
        let mut directory = Directory::new();

        assert_eq!(directory.set_local(1, &mut registry), "player1");
        assert_eq!(directory.local_peer_id(), 1);

        assert!(!directory.remove(1, &mut registry));
        assert!(directory.contains(1));
    }

    #[test]
    fn test_new_local_id_replaces_stale_entry() {
        let mut registry = Registry::new();
        let mut directory = Directory::new();

        directory.set_local(1, &mut registry);
        directory.set_local(5, &mut registry);

        assert_eq!(directory.peer_ids(), vec![5]);
        assert!(registry.get("player1").is_none());
        assert!(registry.get("player5").is_some());
    }

    #[test]
    fn test_peer_ids_sorted() {
        let mut registry = Registry::new();
        let mut directory = Directory::new();
        for peer in [3, 1, 2] {
            directory.resolve(peer, &mut registry);
        }

        assert_eq!(directory.peer_ids(), vec![1, 2, 3]);
        assert_eq!(directory.participants().count(), 3);
    }
}
