//! One participant's view of the shared session
//!
//! [`Session`] is the explicit context that owns the registry, directory,
//! coordinator and dispatcher of a participant, plus the sender through
//! which local changes reach the other peers. The host drives it with two
//! calls per frame: [`Session::poll`] to apply whatever the transport
//! delivered, and [`Session::tick`] to let the master advance the game.

use crate::config::GameConfig;
use crate::coordinator::{Coordinator, GameEvent};
use crate::directory::Directory;
use crate::dispatcher::{Dispatcher, MessageSender};
use crate::network::{Transport, TransportEvent, TransportSubscription};
use crate::registry::{Headless, Registry, RegistryError, SceneHooks};
use log::{debug, info, warn};
use shared::{
    AudioClip, Material, MeshKind, Message, MessageType, ObjectKind, Quat, Vec3, NO_PEER,
};
use std::time::Instant;

pub struct Session<T: Transport> {
    sender: MessageSender<T>,
    registry: Registry,
    directory: Directory,
    coordinator: Coordinator,
    dispatcher: Dispatcher<Session<T>>,
    subscription: TransportSubscription,
    clock: Instant,
    dropped_payloads: u64,
}

fn handle_object<T: Transport>(session: &mut Session<T>, _sender: i64, message: Message) {
    session.registry.apply(message);
}

fn handle_scene<T: Transport>(session: &mut Session<T>, _sender: i64, message: Message) {
    let event = match message {
        Message::ShowGallery => GameEvent::ShowGallery,
        _ => GameEvent::ShowLobby,
    };
    session.registry.apply(message);
    session.coordinator.push_event(event);
}

fn handle_reach<T: Transport>(session: &mut Session<T>, sender: i64, message: Message) {
    let Message::TargetReached { participant_id } = message else {
        return;
    };
    let Session {
        sender: outbound,
        registry,
        coordinator,
        ..
    } = session;
    coordinator.receive_reach(sender, participant_id, registry, outbound);
}

fn handle_coordination<T: Transport>(session: &mut Session<T>, sender: i64, message: Message) {
    let Session {
        registry,
        directory,
        coordinator,
        clock,
        ..
    } = session;
    coordinator.apply(sender, message, registry, directory, *clock);
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: GameConfig) -> Self {
        Self::with_hooks(transport, config, Box::new(Headless))
    }

    pub fn with_hooks(transport: T, config: GameConfig, hooks: Box<dyn SceneHooks>) -> Self {
        Self::from_parts(transport, Registry::with_hooks(hooks), Coordinator::new(config))
    }

    /// Session whose target placement follows a fixed seed.
    pub fn with_seed(transport: T, config: GameConfig, seed: u64) -> Self {
        Self::from_parts(transport, Registry::new(), Coordinator::with_seed(config, seed))
    }

    fn from_parts(transport: T, registry: Registry, coordinator: Coordinator) -> Self {
        let subscription = transport.subscribe();

        Self {
            sender: MessageSender::new(transport),
            registry,
            directory: Directory::new(),
            coordinator,
            dispatcher: Self::build_dispatcher(),
            subscription,
            clock: Instant::now(),
            dropped_payloads: 0,
        }
    }

    fn build_dispatcher() -> Dispatcher<Self> {
        let mut dispatcher = Dispatcher::new();

        for ty in MessageType::ALL {
            match ty {
                MessageType::ShowGallery | MessageType::ShowLobby => {
                    dispatcher.register(ty, handle_scene::<T>);
                }
                MessageType::TargetReached => {
                    dispatcher.register(ty, handle_reach::<T>);
                }
                MessageType::ClaimMaster => {
                    dispatcher.register(ty, handle_coordination::<T>);
                }
                ty if ty.is_game_flow() => {
                    dispatcher.register(ty, handle_coordination::<T>);
                }
                _ => {
                    dispatcher.register(ty, handle_object::<T>);
                }
            }
        }

        dispatcher
    }

    pub fn transport(&self) -> &T {
        self.sender.transport()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn local_peer_id(&self) -> i64 {
        self.directory.local_peer_id()
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    pub fn is_master(&self) -> bool {
        self.coordinator.is_master()
    }

    /// Payloads dropped because they could not be decoded.
    pub fn dropped_payloads(&self) -> u64 {
        self.dropped_payloads
    }

    pub fn drain_events(&mut self) -> Vec<GameEvent> {
        self.coordinator.drain_events()
    }

    /// Applies every transport event queued so far. Returns how many there were.
    pub fn poll(&mut self, now: Instant) -> usize {
        self.clock = now;

        let mut handled = 0;
        while let Some(event) = self.subscription.try_next() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { local_peer_id } => {
                self.directory.set_local(local_peer_id, &mut self.registry);
                self.coordinator.set_local_peer(local_peer_id);
            }
            TransportEvent::PeerJoined { peer_id } => {
                info!("Peer {} joined", peer_id);
                self.directory.resolve(peer_id, &mut self.registry);
            }
            TransportEvent::PeerLeft { peer_id } => {
                info!("Peer {} left", peer_id);
                self.coordinator.peer_left(peer_id);
                self.directory.remove(peer_id, &mut self.registry);
            }
            TransportEvent::Received { payload } => {
                self.handle_payload(&payload);
            }
            TransportEvent::Disconnected { reason } => {
                warn!("Session disconnected: {}", reason);
            }
        }
    }

    fn handle_payload(&mut self, payload: &[u8]) {
        let routed = match self.dispatcher.route(payload) {
            Ok(Some(routed)) => routed,
            Ok(None) => return,
            Err(e) => {
                self.dropped_payloads += 1;
                warn!("Dropping malformed payload: {}", e);
                return;
            }
        };

        if self.directory.has_departed(routed.sender) {
            debug!("Dropping late payload from departed peer {}", routed.sender);
            return;
        }

        // A payload can beat the join notification of its sender
        if routed.sender != NO_PEER && !self.directory.contains(routed.sender) {
            self.directory.resolve(routed.sender, &mut self.registry);
        }

        debug!(
            "Applying {:?} from peer {}",
            routed.message.message_type(),
            routed.sender
        );
        (routed.handler)(self, routed.sender, routed.message);
    }

    /// Lets the master evaluate phase exit conditions.
    pub fn tick(&mut self, now: Instant) {
        self.clock = now;
        self.coordinator
            .tick(&mut self.registry, &mut self.sender, now);
    }

    /// Broadcasts the local avatar's transform. Call once per frame.
    pub fn update_local_pose(&mut self, position: Vec3, rotation: Quat) {
        let local = self.directory.local_peer_id();
        let Some(avatar) = self.directory.avatar_of(local) else {
            return;
        };
        self.registry.set_position(avatar, position, &mut self.sender);
        self.registry.set_rotation(avatar, rotation, &mut self.sender);
    }

    /// Claims the master role for this participant.
    pub fn claim_master(&mut self) -> bool {
        let local = self.directory.local_peer_id();
        if local == NO_PEER {
            warn!("Cannot claim master before connecting");
            return false;
        }
        self.coordinator
            .claim_master(local, &mut self.registry, &mut self.sender)
    }

    /// Starts a game with everyone present. Master only.
    pub fn play_game(&mut self, now: Instant) -> bool {
        if !self.coordinator.is_master() {
            warn!("Only the game master can start a game");
            return false;
        }
        self.clock = now;
        let participants = self.directory.peer_ids();
        self.coordinator
            .initialize(&participants, &mut self.sender, now)
    }

    /// Reports that `participant` reached the target.
    ///
    /// The master decides on the spot and broadcasts accepted reaches. Any
    /// other peer only forwards the report; its safe set changes once the
    /// master's decision arrives.
    pub fn target_reached(&mut self, participant: i64) -> bool {
        if self.coordinator.is_master() {
            self.coordinator
                .target_reached(participant, &mut self.registry, &mut self.sender)
        } else {
            self.coordinator.report_reach(participant, &mut self.sender)
        }
    }

    /// Reports that the local participant reached the target.
    pub fn reach_target(&mut self) -> bool {
        let local = self.directory.local_peer_id();
        self.target_reached(local)
    }

    /// Ends the running game for everyone. Master only.
    pub fn terminate_game(&mut self) -> bool {
        if !self.coordinator.is_master() {
            return false;
        }
        self.coordinator
            .terminate(&mut self.registry, &mut self.sender)
    }

    pub fn spawn(&mut self, id: &str, kind: ObjectKind) -> Result<(), RegistryError> {
        self.registry.spawn(id, kind, &mut self.sender)
    }

    pub fn destroy(&mut self, id: &str) -> bool {
        self.registry.destroy(id, &mut self.sender)
    }

    pub fn set_position(&mut self, id: &str, position: Vec3) {
        self.registry.set_position(id, position, &mut self.sender);
    }

    pub fn set_rotation(&mut self, id: &str, rotation: Quat) {
        self.registry.set_rotation(id, rotation, &mut self.sender);
    }

    pub fn set_scale(&mut self, id: &str, scale: Vec3) {
        self.registry.set_scale(id, scale, &mut self.sender);
    }

    pub fn apply_velocity(&mut self, id: &str, velocity: Vec3) {
        self.registry.apply_velocity(id, velocity, &mut self.sender);
    }

    pub fn apply_angular_velocity(&mut self, id: &str, angular_velocity: Vec3) {
        self.registry
            .apply_angular_velocity(id, angular_velocity, &mut self.sender);
    }

    pub fn change_visual(&mut self, id: &str, material: Material) {
        self.registry.change_visual(id, material, &mut self.sender);
    }

    pub fn load_visual(&mut self, id: &str, resource: &str) {
        self.registry.load_visual(id, resource, &mut self.sender);
    }

    pub fn change_mesh(&mut self, id: &str, mesh: MeshKind) {
        self.registry.change_mesh(id, mesh, &mut self.sender);
    }

    pub fn set_active(&mut self, id: &str, active: bool) {
        self.registry.set_active(id, active, &mut self.sender);
    }

    pub fn play_clip(&mut self, source_id: &str, clip: AudioClip) {
        self.registry.play_clip(source_id, clip, &mut self.sender);
    }

    pub fn stop_clip(&mut self, source_id: &str) {
        self.registry.stop_clip(source_id, &mut self.sender);
    }

    pub fn show_gallery(&mut self) {
        self.registry.show_gallery(&mut self.sender);
        self.coordinator.push_event(GameEvent::ShowGallery);
    }

    pub fn show_lobby(&mut self) {
        self.registry.show_lobby(&mut self.sender);
        self.coordinator.push_event(GameEvent::ShowLobby);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::Phase;
    use crate::hub::{LocalHub, LocalTransport};
    use crate::registry::Visual;

    fn pair() -> (LocalHub, Session<LocalTransport>, Session<LocalTransport>) {
        let hub = LocalHub::new();
        let a = Session::with_seed(hub.join(), GameConfig::default(), 1);
        let b = Session::with_seed(hub.join(), GameConfig::default(), 2);
        (hub, a, b)
    }

    fn poll_all(sessions: &mut [&mut Session<LocalTransport>]) {
        let now = Instant::now();
        for session in sessions.iter_mut() {
            session.poll(now);
        }
    }

    #[test]
    fn test_connect_resolves_local_and_remote_avatars() {
        let (_hub, mut a, mut b) = pair();
        poll_all(&mut [&mut a, &mut b]);

        assert_eq!(a.local_peer_id(), 1);
        assert_eq!(b.local_peer_id(), 2);
        assert_eq!(a.directory().peer_ids(), vec![1, 2]);
        assert_eq!(b.directory().peer_ids(), vec![1, 2]);
        assert!(a.registry().contains("player2"));
        assert!(b.registry().contains("player1"));
    }

    #[test]
    fn test_local_changes_replicate() {
        let (_hub, mut a, mut b) = pair();
        poll_all(&mut [&mut a, &mut b]);

        a.spawn("wardrobe", ObjectKind::Wardrobe).unwrap();
        a.set_position("wardrobe", Vec3::new(1.0, 0.0, 1.0));
        a.load_visual("wardrobe", "Materials/Oak");
        poll_all(&mut [&mut a, &mut b]);

        let record = b.registry().get("wardrobe").unwrap();
        assert_eq!(record.kind, ObjectKind::Wardrobe);
        assert_eq!(record.position, Vec3::new(1.0, 0.0, 1.0));
        assert_eq!(record.visual, Visual::Resource("Materials/Oak".to_string()));
    }

    #[test]
    fn test_local_pose_moves_avatar_everywhere() {
        let (_hub, mut a, mut b) = pair();
        poll_all(&mut [&mut a, &mut b]);

        a.update_local_pose(Vec3::new(0.0, 1.7, 0.0), Quat::from_yaw_degrees(45.0));
        poll_all(&mut [&mut a, &mut b]);

        assert_eq!(
            a.registry().get("player1").unwrap().position,
            Vec3::new(0.0, 1.7, 0.0)
        );
        assert_eq!(
            b.registry().get("player1").unwrap().position,
            Vec3::new(0.0, 1.7, 0.0)
        );
    }

    #[test]
    fn test_malformed_payload_is_dropped() {
        let (hub, mut a, mut b) = pair();
        poll_all(&mut [&mut a, &mut b]);

        let mut payload = Message::Spawn {
            object_id: "x".to_string(),
            kind: ObjectKind::Bullet,
        }
        .encode(1)
        .unwrap();
        payload.truncate(payload.len() - 1);
        hub.deliver(2, payload);
        hub.deliver(2, vec![240, 0, 0]);

        poll_all(&mut [&mut a, &mut b]);
        assert_eq!(b.dropped_payloads(), 1);
        assert!(!b.registry().contains("x"));
    }

    #[test]
    fn test_claim_and_start_game() {
        let (_hub, mut a, mut b) = pair();
        poll_all(&mut [&mut a, &mut b]);

        assert!(a.claim_master());
        poll_all(&mut [&mut a, &mut b]);
        assert!(!b.claim_master());
        assert_eq!(b.coordinator().master_id(), 1);

        assert!(!b.play_game(Instant::now()));
        assert!(a.play_game(Instant::now()));
        poll_all(&mut [&mut a, &mut b]);

        assert_eq!(a.coordinator().phase(), Phase::Countdown);
        assert_eq!(b.coordinator().phase(), Phase::Countdown);
        assert_eq!(b.coordinator().rounds_total(), 1);
    }

    #[test]
    fn test_scene_switch_events() {
        let (_hub, mut a, mut b) = pair();
        poll_all(&mut [&mut a, &mut b]);
        a.drain_events();
        b.drain_events();

        a.show_gallery();
        poll_all(&mut [&mut a, &mut b]);

        assert_eq!(a.drain_events(), vec![GameEvent::ShowGallery]);
        assert_eq!(b.drain_events(), vec![GameEvent::ShowGallery]);
    }

    #[test]
    fn test_peer_leaving_removes_avatar() {
        let (hub, mut a, mut b) = pair();
        poll_all(&mut [&mut a, &mut b]);

        hub.disconnect(2);
        poll_all(&mut [&mut a, &mut b]);

        assert_eq!(a.directory().peer_ids(), vec![1]);
        assert!(!a.registry().contains("player2"));
        assert!(!b.is_connected());
    }

    #[test]
    fn test_departed_peer_stays_gone() {
        let (hub, mut a, mut b) = pair();
        poll_all(&mut [&mut a, &mut b]);

        hub.disconnect(2);
        poll_all(&mut [&mut a, &mut b]);

        let late = Message::SetRotation {
            object_id: "player2".to_string(),
            rotation: Quat::IDENTITY,
        }
        .encode(2)
        .unwrap();
        hub.deliver(1, late);
        poll_all(&mut [&mut a, &mut b]);

        assert_eq!(a.directory().peer_ids(), vec![1]);
        assert!(!a.registry().contains("player2"));
        assert_eq!(a.dropped_payloads(), 0);
    }

    #[test]
    fn test_sends_skipped_when_disconnected() {
        let (hub, mut a, mut b) = pair();
        poll_all(&mut [&mut a, &mut b]);
        hub.disconnect(1);

        a.spawn("late", ObjectKind::Bullet).unwrap();
        poll_all(&mut [&mut a, &mut b]);

        assert!(a.registry().contains("late"));
        assert!(!b.registry().contains("late"));
    }
}
