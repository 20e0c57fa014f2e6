//! In-process token bucket used while the remote store is unreachable.

use std::sync::Mutex;
use std::time::Instant;

struct BucketState {
    tokens: f64,
    last: Instant,
}

/// A standard in-process token bucket: capacity `burst`, continuous refill
/// at `rate` tokens per second, starts full.
///
/// Internally synchronized; safe to share across workers.
pub struct LocalLimiter {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl LocalLimiter {
    pub fn new(rate: u32, burst: u32) -> Self {
        Self {
            rate: f64::from(rate),
            burst: f64::from(burst),
            state: Mutex::new(BucketState {
                tokens: f64::from(burst),
                last: Instant::now(),
            }),
        }
    }

    /// Shorthand for `allow_n(Instant::now(), 1)`.
    pub fn allow(&self) -> bool {
        self.allow_n(Instant::now(), 1)
    }

    /// Reports whether `n` tokens may be consumed at instant `now`.
    pub fn allow_n(&self, now: Instant, n: u32) -> bool {
        let mut state = self.state.lock().unwrap();
        if now > state.last {
            let elapsed = now.duration_since(state.last).as_secs_f64();
            state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
            state.last = now;
        }

        let requested = f64::from(n);
        if state.tokens >= requested {
            state.tokens -= requested;
            true
        } else {
            false
        }
    }
}
