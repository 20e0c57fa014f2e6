use rampart_core::ResilienceEvent;
use std::time::Instant;

/// Events emitted by an [`AdaptiveBreaker`](crate::AdaptiveBreaker).
#[derive(Debug, Clone)]
pub enum BreakerEvent {
    /// A request was admitted.
    Admitted {
        pattern_name: String,
        timestamp: Instant,
    },
    /// A request was shed before reaching the protected dependency.
    Dropped {
        pattern_name: String,
        timestamp: Instant,
    },
    /// An admitted request completed acceptably.
    SuccessRecorded {
        pattern_name: String,
        timestamp: Instant,
    },
    /// An admitted request completed unacceptably.
    FailureRecorded {
        pattern_name: String,
        timestamp: Instant,
    },
}

impl ResilienceEvent for BreakerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BreakerEvent::Admitted { .. } => "admitted",
            BreakerEvent::Dropped { .. } => "dropped",
            BreakerEvent::SuccessRecorded { .. } => "success_recorded",
            BreakerEvent::FailureRecorded { .. } => "failure_recorded",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            BreakerEvent::Admitted { timestamp, .. }
            | BreakerEvent::Dropped { timestamp, .. }
            | BreakerEvent::SuccessRecorded { timestamp, .. }
            | BreakerEvent::FailureRecorded { timestamp, .. } => *timestamp,
        }
    }

    fn pattern_name(&self) -> &str {
        match self {
            BreakerEvent::Admitted { pattern_name, .. }
            | BreakerEvent::Dropped { pattern_name, .. }
            | BreakerEvent::SuccessRecorded { pattern_name, .. }
            | BreakerEvent::FailureRecorded { pattern_name, .. } => pattern_name,
        }
    }
}
