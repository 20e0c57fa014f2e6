//! Resilience and load-distribution core for RPC services.
//!
//! `rampart` bundles the traffic-protection patterns that sit between an RPC
//! client and its backends. Each pattern is available as an individual crate
//! and as a feature of this meta-crate:
//!
//! - **[`breaker`]**: adaptive client-side circuit breaker. Sheds load
//!   probabilistically from a rolling window of outcomes instead of
//!   flipping an open/closed switch, and probes recovery once per second.
//! - **[`limit`]**: distributed token-bucket rate limiter backed by an
//!   atomic Redis script, with an in-process rescue bucket that keeps
//!   answering while the store is down.
//! - **[`balance`]**: power-of-two-choices load balancer scoring backends
//!   by EWMA latency × in-flight work, with health filtering and a
//!   starvation guard.
//!
//! A request typically traverses them in that order: the breaker decides
//! whether to admit, the limiter may gate admitted traffic, the balancer
//! picks the concrete connection, and the completion feeds latency and
//! health signals back into the breaker and balancer windows.
//!
//! The shared primitives (the time-bucketed [`RollingWindow`], the event
//! system) live in `rampart-core` and are re-exported here.
//!
//! # Feature flags
//!
//! - `breaker`, `limit`, `balance` (all on by default): the pattern crates.
//! - `metrics`: counters via the `metrics` crate in the patterns that
//!   expose them.

pub use rampart_core::{
    Bucket, EventListener, EventListeners, FnListener, ResilienceEvent, RollingWindow,
};

#[cfg(feature = "balance")]
pub use rampart_balance as balance;
#[cfg(feature = "breaker")]
pub use rampart_breaker as breaker;
#[cfg(feature = "limit")]
pub use rampart_limit as limit;
