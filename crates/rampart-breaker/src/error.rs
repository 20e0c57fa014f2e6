use thiserror::Error;

/// Sentinel returned when the breaker refuses admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("service unavailable, request dropped by the breaker")]
pub struct ServiceUnavailable;

/// Errors returned by the [`BreakerService`](crate::BreakerService) and the
/// wrapped-call helpers on [`AdaptiveBreaker`](crate::AdaptiveBreaker).
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Admission was refused; the inner service was never called.
    #[error("service unavailable, request dropped by the breaker")]
    ServiceUnavailable,

    /// An error returned by the inner service.
    #[error("inner service error: {0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Returns true if the request was shed before reaching the service.
    pub fn is_dropped(&self) -> bool {
        matches!(self, BreakerError::ServiceUnavailable)
    }

    /// Returns the inner error if present.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<ServiceUnavailable> for BreakerError<E> {
    fn from(_: ServiceUnavailable) -> Self {
        BreakerError::ServiceUnavailable
    }
}
