//! Session coordinator: master election and the round phase machine
//!
//! ```text
//! Idle -> Countdown -> Prelude -> Interlude -> Postlude -+-> RoundInterval -> Prelude
//!                                                        +-> Idle (game over)
//! ```
//!
//! Only the master evaluates exit conditions, in [`Coordinator::tick`]. Every
//! peer, the master included, applies a transition through the same method;
//! the master calls it with the session sender so the transition is
//! broadcast, everyone else calls it with [`NoBroadcast`] when the event
//! arrives. That keeps phases aligned without a shared clock.

use crate::config::{ClaimPolicy, GameConfig};
use crate::directory::{avatar_id, Directory};
use crate::dispatcher::{NoBroadcast, Outbound};
use crate::registry::Registry;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{Material, Message, ObjectKind, Quat, Vec3, NO_PEER};
use std::collections::BTreeSet;
use std::time::Instant;

/// Object id of the round target.
pub const TARGET_ID: &str = "target";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Countdown,
    Prelude,
    Interlude,
    Postlude,
    RoundInterval,
}

/// Game-level notifications for the host (HUD, audio cues, logs).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    MasterAssigned { peer_id: i64 },
    GameInitialized { participants: Vec<i64>, rounds_total: u32 },
    RoundStarted { round: u32, max_safe: usize },
    PlayerSafe { peer_id: i64 },
    PlayerSurvived { peer_id: i64 },
    PlayerEliminated { peer_id: i64 },
    RoundEnded { round: u32 },
    GameOver { survivors: Vec<i64> },
    ShowGallery,
    ShowLobby,
}

pub struct Coordinator {
    config: GameConfig,
    local_peer_id: i64,
    master_id: i64,
    phase: Phase,
    phase_deadline: Option<Instant>,
    rounds_completed: u32,
    rounds_total: u32,
    max_safe: usize,
    all_participants: BTreeSet<i64>,
    alive: BTreeSet<i64>,
    safe_this_round: BTreeSet<i64>,
    events: Vec<GameEvent>,
    rng: StdRng,
}

impl Coordinator {
    pub fn new(config: GameConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Coordinator with a fixed seed for target placement.
    pub fn with_seed(config: GameConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: GameConfig, rng: StdRng) -> Self {
        Self {
            config,
            local_peer_id: NO_PEER,
            master_id: NO_PEER,
            phase: Phase::Idle,
            phase_deadline: None,
            rounds_completed: 0,
            rounds_total: 0,
            max_safe: 0,
            all_participants: BTreeSet::new(),
            alive: BTreeSet::new(),
            safe_this_round: BTreeSet::new(),
            events: Vec::new(),
            rng,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn set_local_peer(&mut self, peer_id: i64) {
        self.local_peer_id = peer_id;
    }

    pub fn local_peer_id(&self) -> i64 {
        self.local_peer_id
    }

    pub fn master_id(&self) -> i64 {
        self.master_id
    }

    pub fn is_master(&self) -> bool {
        self.master_id != NO_PEER && self.master_id == self.local_peer_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn phase_deadline(&self) -> Option<Instant> {
        self.phase_deadline
    }

    pub fn in_game(&self) -> bool {
        self.phase != Phase::Idle
    }

    pub fn rounds_completed(&self) -> u32 {
        self.rounds_completed
    }

    pub fn rounds_total(&self) -> u32 {
        self.rounds_total
    }

    pub fn max_safe(&self) -> usize {
        self.max_safe
    }

    pub fn all_participants(&self) -> &BTreeSet<i64> {
        &self.all_participants
    }

    pub fn alive(&self) -> &BTreeSet<i64> {
        &self.alive
    }

    pub fn safe_this_round(&self) -> &BTreeSet<i64> {
        &self.safe_this_round
    }

    pub fn push_event(&mut self, event: GameEvent) {
        self.events.push(event);
    }

    pub fn drain_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.events)
    }

    fn claim_accepted(&self, claimant: i64) -> bool {
        if claimant == NO_PEER || claimant == self.master_id {
            return false;
        }
        if self.master_id == NO_PEER {
            return true;
        }
        match self.config.claim_policy {
            ClaimPolicy::FirstClaim => false,
            ClaimPolicy::LowestPeerId => !self.in_game() && claimant < self.master_id,
        }
    }

    /// Applies a master claim by `claimant`. Returns whether it was accepted.
    ///
    /// The claim is only broadcast when accepted locally.
    pub fn claim_master(
        &mut self,
        claimant: i64,
        registry: &mut Registry,
        out: &mut dyn Outbound,
    ) -> bool {
        if !self.claim_accepted(claimant) {
            debug!(
                "Discarding master claim from {} (master is {})",
                claimant, self.master_id
            );
            return false;
        }

        out.send(Message::ClaimMaster);

        let previous = std::mem::replace(&mut self.master_id, claimant);
        if previous != NO_PEER {
            registry.change_visual(&avatar_id(previous), Material::Normal, &mut NoBroadcast);
        }
        registry.change_visual(&avatar_id(claimant), Material::GameMaster, &mut NoBroadcast);

        info!("Peer {} is the game master", claimant);
        self.events.push(GameEvent::MasterAssigned { peer_id: claimant });
        true
    }

    /// Snapshots the participants and enters the countdown.
    ///
    /// Needs at least two participants and no game in progress; otherwise
    /// nothing is sent.
    pub fn initialize(
        &mut self,
        participants: &[i64],
        out: &mut dyn Outbound,
        now: Instant,
    ) -> bool {
        if self.in_game() {
            debug!("Game already running, ignoring initialize");
            return false;
        }

        let roster: BTreeSet<i64> = participants.iter().copied().collect();
        if roster.len() < 2 {
            warn!("Need at least 2 participants to start, have {}", roster.len());
            return false;
        }

        out.send(Message::InitializeGame);

        self.all_participants = roster;
        self.alive = self.all_participants.clone();
        self.safe_this_round.clear();
        self.rounds_completed = 0;
        self.rounds_total = (self.all_participants.len() - 1) as u32;
        self.max_safe = 0;

        self.enter(Phase::Countdown, Some(now + self.config.countdown));

        info!(
            "Game initialized with {} participants, {} rounds",
            self.all_participants.len(),
            self.rounds_total
        );
        self.events.push(GameEvent::GameInitialized {
            participants: self.all_participants.iter().copied().collect(),
            rounds_total: self.rounds_total,
        });
        true
    }

    /// Random target placement for the next round.
    pub fn pick_target(&mut self) -> (Vec3, Quat) {
        let radius = self.config.target_spawn_radius;
        let (x, z) = if radius > 0.0 {
            (self.rng.gen_range(0.0..radius), self.rng.gen_range(0.0..radius))
        } else {
            (0.0, 0.0)
        };
        let yaw = self.rng.gen_range(0.0..360.0);

        (Vec3::new(x, 0.0, z), Quat::from_yaw_degrees(yaw))
    }

    /// Starts a round: places the target and resets this round's safe set.
    pub fn start_round(
        &mut self,
        target_position: Vec3,
        target_rotation: Quat,
        registry: &mut Registry,
        out: &mut dyn Outbound,
        now: Instant,
    ) -> bool {
        if !self.in_game() {
            debug!("No game running, ignoring round start");
            return false;
        }

        out.send(Message::StartRound {
            target_position,
            target_rotation,
        });

        self.safe_this_round.clear();
        self.max_safe = self.rounds_total.saturating_sub(self.rounds_completed) as usize;

        let silent: &mut dyn Outbound = &mut NoBroadcast;
        if registry.spawn(TARGET_ID, ObjectKind::Target, silent).is_err() {
            debug!("Reusing existing target");
        }
        registry.set_position(TARGET_ID, target_position, silent);
        registry.set_rotation(TARGET_ID, target_rotation, silent);
        registry.change_visual(TARGET_ID, Material::Normal, silent);

        self.enter(Phase::Prelude, Some(now + self.config.prelude));

        let round = self.rounds_completed + 1;
        info!("Round {} started, {} seats", round, self.max_safe);
        self.events.push(GameEvent::RoundStarted {
            round,
            max_safe: self.max_safe,
        });
        true
    }

    pub fn end_prelude(&mut self, out: &mut dyn Outbound) -> bool {
        if !self.in_game() {
            return false;
        }

        out.send(Message::EndPrelude);
        self.enter(Phase::Interlude, None);
        true
    }

    fn can_be_safe(&self, participant: i64) -> bool {
        self.phase == Phase::Interlude
            && self.alive.contains(&participant)
            && !self.safe_this_round.contains(&participant)
            && self.safe_this_round.len() < self.max_safe
    }

    /// Marks `participant` safe if seats remain. Only valid in the interlude.
    ///
    /// This is the decision itself: the master calls it with the session
    /// sender, every other peer applies the master's broadcast through
    /// [`Coordinator::receive_reach`]. Nothing is sent unless the
    /// participant became safe with this call.
    pub fn target_reached(
        &mut self,
        participant: i64,
        registry: &mut Registry,
        out: &mut dyn Outbound,
    ) -> bool {
        if !self.can_be_safe(participant) {
            debug!("Reach by {} not accepted", participant);
            return false;
        }

        out.send(Message::TargetReached {
            participant_id: participant,
        });
        registry.change_visual(TARGET_ID, Material::Collided, &mut NoBroadcast);

        self.safe_this_round.insert(participant);
        info!("Participant {} is safe", participant);
        self.events.push(GameEvent::PlayerSafe {
            peer_id: participant,
        });
        true
    }

    /// Asks the master to mark `participant` safe. Nothing changes locally;
    /// the master's answer arrives as its own `TargetReached` broadcast.
    ///
    /// Returns false when, as far as this peer knows, the reach cannot be
    /// accepted anyway.
    pub fn report_reach(&mut self, participant: i64, out: &mut dyn Outbound) -> bool {
        if !self.can_be_safe(participant) {
            return false;
        }

        out.send(Message::TargetReached {
            participant_id: participant,
        });
        debug!("Reported reach by {} to master {}", participant, self.master_id);
        true
    }

    /// Handles a received `TargetReached`.
    ///
    /// On the master it is a request: accepted reaches are applied and
    /// broadcast through `out`. Elsewhere only the master's broadcast counts.
    pub fn receive_reach(
        &mut self,
        sender: i64,
        participant: i64,
        registry: &mut Registry,
        out: &mut dyn Outbound,
    ) -> bool {
        if self.is_master() {
            self.target_reached(participant, registry, out)
        } else if sender == self.master_id {
            self.target_reached(participant, registry, &mut NoBroadcast)
        } else {
            debug!("Ignoring reach by {} reported by non-master {}", participant, sender);
            false
        }
    }

    /// Eliminates every alive participant that is not safe.
    pub fn end_interlude(
        &mut self,
        registry: &mut Registry,
        out: &mut dyn Outbound,
        now: Instant,
    ) -> bool {
        if !self.in_game() {
            return false;
        }

        out.send(Message::EndInterlude);

        let silent: &mut dyn Outbound = &mut NoBroadcast;
        let (survivors, eliminated): (Vec<i64>, Vec<i64>) = self
            .alive
            .iter()
            .copied()
            .partition(|peer| self.safe_this_round.contains(peer));

        for peer_id in eliminated {
            self.alive.remove(&peer_id);
            registry.change_visual(&avatar_id(peer_id), Material::Dead, silent);
            info!("Participant {} eliminated", peer_id);
            self.events.push(GameEvent::PlayerEliminated { peer_id });
        }
        for peer_id in survivors {
            registry.change_visual(&avatar_id(peer_id), Material::Survived, silent);
            self.events.push(GameEvent::PlayerSurvived { peer_id });
        }

        self.enter(Phase::Postlude, Some(now + self.config.postlude));
        true
    }

    /// Closes the round. After the last round the game terminates.
    pub fn end_round(
        &mut self,
        registry: &mut Registry,
        out: &mut dyn Outbound,
        now: Instant,
    ) -> bool {
        if !self.in_game() {
            return false;
        }

        out.send(Message::EndRound);

        let silent: &mut dyn Outbound = &mut NoBroadcast;
        registry.destroy(TARGET_ID, silent);
        for peer_id in &self.alive {
            registry.change_visual(&avatar_id(*peer_id), Material::Normal, silent);
        }

        self.rounds_completed += 1;
        self.events.push(GameEvent::RoundEnded {
            round: self.rounds_completed,
        });

        if self.rounds_completed < self.rounds_total {
            self.enter(Phase::RoundInterval, Some(now + self.config.round_interval));
        } else {
            self.terminate(registry, out);
        }
        true
    }

    /// Marker between rounds; the master starts the next round right after.
    pub fn round_interval(&mut self, out: &mut dyn Outbound) -> bool {
        if !self.in_game() {
            return false;
        }

        out.send(Message::RoundInterval);
        debug!("Round interval over");
        true
    }

    /// Ends the game and returns to idle with no master.
    pub fn terminate(&mut self, registry: &mut Registry, out: &mut dyn Outbound) -> bool {
        if !self.in_game() && self.master_id == NO_PEER {
            return false;
        }

        out.send(Message::TerminateGame);

        let silent: &mut dyn Outbound = &mut NoBroadcast;
        registry.destroy(TARGET_ID, silent);
        let mut avatars: BTreeSet<i64> = self.all_participants.clone();
        if self.master_id != NO_PEER {
            avatars.insert(self.master_id);
        }
        for peer_id in avatars {
            registry.change_visual(&avatar_id(peer_id), Material::Normal, silent);
        }

        if self.in_game() {
            let survivors: Vec<i64> = self.alive.iter().copied().collect();
            info!("Game over, survivors: {:?}", survivors);
            self.events.push(GameEvent::GameOver { survivors });
        }

        self.master_id = NO_PEER;
        self.rounds_completed = 0;
        self.rounds_total = 0;
        self.max_safe = 0;
        self.all_participants.clear();
        self.alive.clear();
        self.safe_this_round.clear();
        self.enter(Phase::Idle, None);
        true
    }

    /// A departed peer can no longer be safe or alive. A departed master
    /// frees the role.
    pub fn peer_left(&mut self, peer_id: i64) {
        self.safe_this_round.remove(&peer_id);
        self.alive.remove(&peer_id);

        if peer_id == self.master_id {
            warn!("Game master {} left the session", peer_id);
            self.master_id = NO_PEER;
        }
    }

    fn deadline_passed(&self, now: Instant) -> bool {
        self.phase_deadline.is_some_and(|deadline| now > deadline)
    }

    /// Evaluates exit conditions. Does nothing unless this peer is master.
    pub fn tick(&mut self, registry: &mut Registry, out: &mut dyn Outbound, now: Instant) {
        if !self.is_master() {
            return;
        }

        match self.phase {
            Phase::Idle => {}
            Phase::Countdown => {
                if self.deadline_passed(now) {
                    let (position, rotation) = self.pick_target();
                    self.start_round(position, rotation, registry, out, now);
                }
            }
            Phase::Prelude => {
                if self.deadline_passed(now) {
                    self.end_prelude(out);
                }
            }
            Phase::Interlude => {
                let seats = self.max_safe.min(self.alive.len());
                if self.safe_this_round.len() >= seats {
                    self.end_interlude(registry, out, now);
                }
            }
            Phase::Postlude => {
                if self.deadline_passed(now) {
                    self.end_round(registry, out, now);
                }
            }
            Phase::RoundInterval => {
                if self.deadline_passed(now) {
                    self.round_interval(out);
                    let (position, rotation) = self.pick_target();
                    self.start_round(position, rotation, registry, out, now);
                }
            }
        }
    }

    /// Applies a received coordination message without re-broadcasting it.
    ///
    /// Returns false for messages the coordinator does not handle here,
    /// including `TargetReached`, which may need an answer from the master
    /// and goes through [`Coordinator::receive_reach`].
    pub fn apply(
        &mut self,
        sender: i64,
        message: Message,
        registry: &mut Registry,
        directory: &Directory,
        now: Instant,
    ) -> bool {
        let silent: &mut dyn Outbound = &mut NoBroadcast;

        match message {
            Message::ClaimMaster => {
                self.claim_master(sender, registry, silent);
            }
            Message::InitializeGame => {
                self.initialize(&directory.peer_ids(), silent, now);
            }
            Message::TerminateGame => {
                self.terminate(registry, silent);
            }
            Message::StartRound {
                target_position,
                target_rotation,
            } => {
                self.start_round(target_position, target_rotation, registry, silent, now);
            }
            Message::EndPrelude => {
                self.end_prelude(silent);
            }
            Message::EndInterlude => {
                self.end_interlude(registry, silent, now);
            }
            Message::EndRound => {
                self.end_round(registry, silent, now);
            }
            Message::RoundInterval => {
                self.round_interval(silent);
            }
            _ => return false,
        }
        true
    }

    fn enter(&mut self, phase: Phase, deadline: Option<Instant>) {
        debug!("Phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        self.phase_deadline = deadline;
    }
}
