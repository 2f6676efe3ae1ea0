//! Game timing and election settings

use std::time::Duration;

/// How concurrent master claims are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClaimPolicy {
    /// The first claim each peer observes wins; later claims are discarded.
    /// Two peers claiming at the same moment can end up with different
    /// masters on different observers.
    #[default]
    FirstClaim,
    /// While no game is running, a claim from a lower peer id replaces the
    /// current master. Every peer converges on the lowest claimant once all
    /// claims have arrived.
    LowestPeerId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    pub countdown: Duration,
    pub prelude: Duration,
    pub postlude: Duration,
    pub round_interval: Duration,
    /// Side length of the square the master places the target in.
    pub target_spawn_radius: f32,
    pub claim_policy: ClaimPolicy,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            countdown: Duration::from_secs(3),
            prelude: Duration::from_secs(5),
            postlude: Duration::from_secs(5),
            round_interval: Duration::from_secs(3),
            target_spawn_radius: 2.0,
            claim_policy: ClaimPolicy::FirstClaim,
        }
    }
}

impl GameConfig {
    /// Config with every phase shortened to `phase`, handy for simulations.
    pub fn with_uniform_phases(phase: Duration) -> Self {
        Self {
            countdown: phase,
            prelude: phase,
            postlude: phase,
            round_interval: phase,
            ..Self::default()
        }
    }
}
