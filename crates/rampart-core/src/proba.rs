//! Probabilistic coin flip with a shared generator.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// A locked uniform-draw helper.
///
/// `true_on_proba(p)` returns `true` with probability `p`. The generator is
/// shared behind a mutex so one instance can serve concurrent callers.
pub struct Proba {
    rng: Mutex<SmallRng>,
}

impl Proba {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(SmallRng::from_os_rng()),
        }
    }

    /// Draws a uniform number in `[0, 1)` and compares it against `proba`.
    pub fn true_on_proba(&self, proba: f64) -> bool {
        self.rng.lock().unwrap().random::<f64>() < proba
    }
}

impl Default for Proba {
    fn default() -> Self {
        Self::new()
    }
}
