//! Power-of-two-choices load balancing with EWMA scoring.
//!
//! The picker selects among a snapshot of ready backend connections by
//! sampling two at random and taking the one with the lower estimated load,
//! `⌊√(lag + 1)⌋ · (inflight + 1)`, where `lag` is an exponentially weighted
//! moving average of request latency. Endpoint health is tracked the same
//! way: completions feed a score in `[0, 1000]`, and sampling prefers pairs
//! that are still above half of the initial score. A starvation guard
//! force-picks any endpoint that has not won a selection for over a second,
//! so statistics never go permanently stale.
//!
//! The picker itself is immutable. The surrounding connection-management
//! framework rebuilds it through a [`P2cBuilder`] whenever the ready set
//! changes, and invokes each pick's [`Completion`] exactly once with the
//! request outcome.
//!
//! ```rust
//! use rampart_balance::P2cPicker;
//!
//! let picker: P2cPicker<u32, std::io::Error> = P2cPicker::build(
//!     vec![
//!         (1, "10.0.0.1:9000".to_string()),
//!         (2, "10.0.0.2:9000".to_string()),
//!     ],
//!     // caller-side cancellations are not the backend's fault
//!     |err: &std::io::Error| err.kind() == std::io::ErrorKind::Interrupted,
//! );
//!
//! let pick = picker.pick().unwrap();
//! // send the request over `pick.conn` ...
//! pick.completion.complete(None);
//! ```

mod endpoint;
mod error;
mod picker;

pub use endpoint::Endpoint;
pub use error::PickError;
pub use picker::{Completion, P2cBuilder, P2cPicker, Pick};
