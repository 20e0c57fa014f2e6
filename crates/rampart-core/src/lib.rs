//! Shared infrastructure for the rampart resilience crates.
//!
//! This crate carries the pieces the pattern crates have in common:
//!
//! - [`window`]: a time-bucketed rolling window for statistical
//!   observations over a sliding time range.
//! - [`events`]: a listener-based event system used by the patterns for
//!   observability.
//! - [`proba`]: a locked uniform-draw helper for probabilistic decisions.
//!
//! Application code usually depends on the pattern crates directly and only
//! sees these types through their re-exports.

pub mod events;
pub mod proba;
pub mod window;

pub use events::{BoxedEventListener, EventListener, EventListeners, FnListener, ResilienceEvent};
pub use proba::Proba;
pub use window::{Bucket, RollingWindow};
