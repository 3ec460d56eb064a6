//! Retry delays for long-running tasks.
//!
//! The session loop and the queue consumer wait a growing delay after each
//! consecutive failure: 2 s, 4 s, 8 s ... up to 30 s, with ±10 % jitter so
//! repeated faults do not line up. A clean iteration starts the sequence over.

use rand::Rng;
use std::time::Duration;

/// First delay after a failure.
pub const BASE_DELAY: Duration = Duration::from_secs(2);
/// Upper bound on any delay, jitter included.
pub const MAX_DELAY: Duration = Duration::from_secs(30);
/// Jitter as a fraction of the delay.
pub const JITTER: f64 = 0.1;

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
    cap: Duration,
    jitter: f64,
    failures: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(BASE_DELAY, MAX_DELAY, JITTER)
    }
}

impl ExponentialBackoff {
    pub fn new(base: Duration, cap: Duration, jitter: f64) -> Self {
        Self {
            base,
            cap,
            jitter: jitter.clamp(0.0, 1.0),
            failures: 0,
        }
    }

    /// Delay before the next retry; counts one more failure.
    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.nominal(self.failures);
        self.failures = self.failures.saturating_add(1);

        if self.jitter == 0.0 {
            return nominal;
        }
        let spread = nominal.as_secs_f64() * self.jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        let secs = (nominal.as_secs_f64() + offset).clamp(0.0, self.cap.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    /// Un-jittered delay after `failures` earlier failures.
    fn nominal(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
