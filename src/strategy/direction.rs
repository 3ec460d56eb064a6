//! Direction policy for the auto-trade session.
//!
//! Alternating mode flips on every placed trade. Randomized ("AI") mode
//! repeats the previous direction with probability [`REPEAT_PROBABILITY`]
//! and flips otherwise. The generator is injected so sequences are
//! reproducible from a seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::Direction;

/// Chance that randomized mode repeats the previous direction.
pub const REPEAT_PROBABILITY: f64 = 0.42;

/// Pick the next randomized direction from a uniform draw in `[0, 1)`.
pub fn randomized_next(previous: Direction, roll: f64) -> Direction {
    if roll < REPEAT_PROBABILITY {
        previous
    } else {
        previous.opposite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionMode {
    Alternating,
    Randomized,
}

/// Stateful direction generator owned by one session.
#[derive(Debug)]
pub struct DirectionPolicy {
    /// Alternating: the direction of the next trade. Randomized: the last draw.
    current: Direction,
    /// Present only in randomized mode.
    rng: Option<StdRng>,
}

impl DirectionPolicy {
    pub fn alternating() -> Self {
        Self {
            current: Direction::Buy,
            rng: None,
        }
    }

    pub fn randomized(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            current: Direction::Buy,
            rng: Some(rng),
        }
    }

    pub fn mode(&self) -> DirectionMode {
        match self.rng {
            Some(_) => DirectionMode::Randomized,
            None => DirectionMode::Alternating,
        }
    }

    /// Direction for the upcoming trade.
    ///
    /// Randomized mode draws on every call. Alternating mode only reports the
    /// pending direction; call [`DirectionPolicy::confirm_placed`] once the
    /// trade went through to flip it.
    pub fn next(&mut self) -> Direction {
        if let Some(rng) = self.rng.as_mut() {
            let roll: f64 = rng.gen();
            self.current = randomized_next(self.current, roll);
        }
        self.current
    }

    /// Note that a trade in `placed` was accepted by the broker.
    pub fn confirm_placed(&mut self, placed: Direction) {
        if self.rng.is_none() {
            self.current = placed.opposite();
        }
    }

    /// Direction the alternating policy will use next (for status lines).
    pub fn peek(&self) -> Direction {
        self.current
    }
}
