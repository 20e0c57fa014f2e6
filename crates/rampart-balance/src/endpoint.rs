//! Per-backend connection state.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

pub(crate) const INIT_SUCCESS: u64 = 1000;
const THROTTLE_SUCCESS: u64 = INIT_SUCCESS / 2;
/// Sorted behind every real load value when a load computes to zero.
const PENALTY: i64 = i32::MAX as i64;

/// A ready backend connection and the statistics the picker keeps about it.
///
/// The selection path mutates these fields through atomics only, so request
/// completions never contend on the picker lock.
pub struct Endpoint<C> {
    addr: String,
    conn: C,
    /// EWMA request latency in nanoseconds; 0 means no observation yet.
    pub(crate) lag: AtomicU64,
    /// Requests currently in flight on this connection.
    pub(crate) inflight: AtomicI64,
    /// EWMA health score in `[0, 1000]`.
    pub(crate) success: AtomicU64,
    /// Requests picked since the last stats dump.
    pub(crate) requests: AtomicI64,
    /// Completion time of the last request, on the picker clock.
    pub(crate) last: AtomicI64,
    /// Last time this endpoint won a selection, on the picker clock.
    pub(crate) pick: AtomicI64,
}

impl<C> Endpoint<C> {
    pub(crate) fn new(conn: C, addr: String) -> Self {
        Self {
            addr,
            conn,
            lag: AtomicU64::new(0),
            inflight: AtomicI64::new(0),
            success: AtomicU64::new(INIT_SUCCESS),
            requests: AtomicI64::new(0),
            last: AtomicI64::new(0),
            pick: AtomicI64::new(0),
        }
    }

    /// The backend address this connection points at.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub(crate) fn conn(&self) -> &C {
        &self.conn
    }

    /// An endpoint is healthy while its EWMA health score stays above half
    /// of the initial score.
    pub fn healthy(&self) -> bool {
        self.success.load(Ordering::Relaxed) > THROTTLE_SUCCESS
    }

    /// Estimated queueing load: `⌊√(lag + 1)⌋ · (inflight + 1)`.
    ///
    /// The plus-ones keep fresh endpoints off zero; a zero load (possible
    /// when `inflight` dips negative mid-race) maps to a penalty that sorts
    /// behind every real value.
    pub fn load(&self) -> i64 {
        let lag = ((self.lag.load(Ordering::Relaxed) + 1) as f64).sqrt() as i64;
        let load = lag * (self.inflight.load(Ordering::Relaxed) + 1);
        if load == 0 {
            PENALTY
        } else {
            load
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_endpoint_is_healthy() {
        let endpoint = Endpoint::new((), "10.0.0.1:9000".to_string());
        assert!(endpoint.healthy());
        assert_eq!(endpoint.success.load(Ordering::Relaxed), INIT_SUCCESS);
    }

    #[test]
    fn health_threshold_is_strict() {
        let endpoint = Endpoint::new((), "10.0.0.1:9000".to_string());
        endpoint.success.store(500, Ordering::Relaxed);
        assert!(!endpoint.healthy());
        endpoint.success.store(501, Ordering::Relaxed);
        assert!(endpoint.healthy());
    }

    #[test]
    fn load_scales_with_inflight() {
        let a = Endpoint::new((), "a:9000".to_string());
        let b = Endpoint::new((), "b:9000".to_string());
        a.lag.store(1_000_000, Ordering::Relaxed);
        b.lag.store(1_000_000, Ordering::Relaxed);
        b.inflight.store(10, Ordering::Relaxed);

        assert!(a.load() < b.load());
    }

    #[test]
    fn zero_load_maps_to_penalty() {
        let endpoint = Endpoint::new((), "a:9000".to_string());
        endpoint.inflight.store(-1, Ordering::Relaxed);
        assert_eq!(endpoint.load(), i64::from(i32::MAX));
    }
}
