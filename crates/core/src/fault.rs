//! Injectable channel fault models.
//!
//! The protocol engine never rolls dice itself. Whether the medium is busy,
//! whether a collision happens and whether a payload bit gets flipped are all
//! questions put to a [`FaultModel`]:
//!
//! - [`RandomFaults`]: Bernoulli draws from a seeded ChaCha8 RNG, so a run is
//!   reproducible from its seed
//! - [`NoFaults`]: an ideal channel
//! - [`ScriptedFaults`]: answers popped from per-question scripts, for tests
//!   that must walk an exact path through a state machine

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;

use crate::crc::BitPosition;

/// Source of channel conditions for the MAC strategies.
pub trait FaultModel: Send {
    /// Carrier sense: is another sender on the medium right now?
    fn is_channel_busy(&mut self) -> bool;

    /// Did our transmission collide with another one?
    fn is_collision(&mut self) -> bool;

    /// Possibly flip one bit of `data`; returns the (maybe) damaged copy.
    fn corrupt(&mut self, data: &[u8]) -> Vec<u8>;
}

/// Probabilities for the random fault model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultConfig {
    /// Probability that carrier sense reports a busy medium [0.0, 1.0]
    pub busy_probability: f64,

    /// Probability that an idle-medium transmission collides [0.0, 1.0]
    pub collision_probability: f64,

    /// Probability that a block gets a single bit flipped [0.0, 1.0]
    pub corruption_probability: f64,

    /// Random seed for determinism
    pub seed: u64,
}

impl FaultConfig {
    /// Ideal channel.
    pub fn perfect(seed: u64) -> Self {
        Self {
            busy_probability: 0.0,
            collision_probability: 0.0,
            corruption_probability: 0.0,
            seed,
        }
    }

    /// The busy/collision rates used by the contention lab.
    pub fn contended(seed: u64) -> Self {
        Self {
            busy_probability: 0.5,
            collision_probability: 0.6,
            corruption_probability: 0.0,
            seed,
        }
    }
}

/// Seeded pseudo-random fault model.
pub struct RandomFaults {
    config: FaultConfig,
    rng: ChaCha8Rng,
}

impl RandomFaults {
    pub fn new(config: FaultConfig) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
        }
    }

    pub fn config(&self) -> &FaultConfig {
        &self.config
    }

    fn roll(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.rng.gen::<f64>() < probability
    }
}

impl FaultModel for RandomFaults {
    fn is_channel_busy(&mut self) -> bool {
        self.roll(self.config.busy_probability)
    }

    fn is_collision(&mut self) -> bool {
        self.roll(self.config.collision_probability)
    }

    fn corrupt(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        if out.is_empty() || !self.roll(self.config.corruption_probability) {
            return out;
        }
        let byte = self.rng.gen_range(0..out.len());
        let bit = self.rng.gen_range(0..8u8);
        out[byte] ^= 1 << bit;
        out
    }
}

/// Ideal channel: never busy, never collides, never corrupts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaults;

impl FaultModel for NoFaults {
    fn is_channel_busy(&mut self) -> bool {
        false
    }

    fn is_collision(&mut self) -> bool {
        false
    }

    fn corrupt(&mut self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }
}

/// Deterministic fault model driven by scripts.
///
/// Each question pops the next scripted answer; an exhausted script falls
/// back to the configured default (idle, no collision, no corruption unless
/// changed with the `*_always` builders).
#[derive(Debug, Clone, Default)]
pub struct ScriptedFaults {
    busy: VecDeque<bool>,
    collisions: VecDeque<bool>,
    flips: VecDeque<Option<BitPosition>>,
    busy_default: bool,
    collision_default: bool,
}

impl ScriptedFaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Carrier-sense answers, in order.
    pub fn busy(mut self, script: impl IntoIterator<Item = bool>) -> Self {
        self.busy.extend(script);
        self
    }

    /// Collision answers, in order.
    pub fn collisions(mut self, script: impl IntoIterator<Item = bool>) -> Self {
        self.collisions.extend(script);
        self
    }

    /// Every collision query answers `true` once the script runs out.
    pub fn collide_always(mut self) -> Self {
        self.collision_default = true;
        self
    }

    /// Every carrier-sense query answers `true` once the script runs out.
    pub fn busy_always(mut self) -> Self {
        self.busy_default = true;
        self
    }

    /// Bit flips applied to successive `corrupt` calls (`None` leaves the block intact).
    pub fn flips(mut self, script: impl IntoIterator<Item = Option<BitPosition>>) -> Self {
        self.flips.extend(script);
        self
    }
}

impl FaultModel for ScriptedFaults {
    fn is_channel_busy(&mut self) -> bool {
        self.busy.pop_front().unwrap_or(self.busy_default)
    }

    fn is_collision(&mut self) -> bool {
        self.collisions.pop_front().unwrap_or(self.collision_default)
    }

    fn corrupt(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        if let Some(Some(pos)) = self.flips.pop_front() {
            if let Some(byte) = out.get_mut(pos.byte) {
                *byte ^= 1 << (pos.bit % 8);
            }
        }
        out
    }
}
