//! Distributed token-bucket rate limiting with an in-process fallback.
//!
//! A [`TokenLimiter`] enforces `rate` tokens per second with bursts of at
//! most `burst`, shared across every process that points at the same store
//! key. Admission runs as an atomic script on the store, so concurrent
//! callers in different processes cannot over-consume.
//!
//! When the store misbehaves the limiter degrades instead of failing:
//!
//! - a store-side refusal (nil reply) and a timed-out call both answer
//!   `false`;
//! - any other store error flips the limiter into rescue mode, where a
//!   [`LocalLimiter`] of the same rate and burst answers in-process while a
//!   background monitor pings the store every 100 ms and hands traffic back
//!   on the first successful ping.
//!
//! ```rust,no_run
//! use rampart_limit::TokenLimiter;
//!
//! # async fn example() -> redis::RedisResult<()> {
//! let client = redis::Client::open("redis://127.0.0.1/")?;
//! let limiter = TokenLimiter::new(100, 20, client, "checkout-api");
//!
//! if limiter.allow().await {
//!     // handle the request
//! } else {
//!     // shed it
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//! - `metrics`: decision and rescue-mode counters via the `metrics` crate

mod limiter;
mod local;

pub use limiter::TokenLimiter;
pub use local::LocalLimiter;
