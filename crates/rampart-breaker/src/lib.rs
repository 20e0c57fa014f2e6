//! Adaptive circuit breaker for Tower services.
//!
//! Unlike threshold breakers with explicit open/closed states, this breaker
//! sheds load *probabilistically*: it tracks successes, failures and drops in
//! a rolling window and computes a drop probability from the recent accept
//! ratio (the client-side throttling scheme from the Google SRE handbook,
//! with streak-aware sensitivity). Under healthy traffic nothing is shed;
//! as a dependency degrades the drop probability climbs smoothly, and a
//! once-per-second forced probe senses recovery.
//!
//! ## Wrapping a service
//!
//! ```rust
//! use rampart_breaker::BreakerLayer;
//! use tower::{service_fn, Layer, Service, ServiceExt};
//!
//! # async fn example() {
//! let layer = BreakerLayer::<std::io::Error>::builder()
//!     .name("user-store")
//!     .k(1.5)
//!     .acceptable(|err| err.kind() == std::io::ErrorKind::Interrupted)
//!     .build();
//!
//! let mut service = layer.layer(service_fn(|req: String| async move {
//!     Ok::<_, std::io::Error>(req)
//! }));
//!
//! let response = service
//!     .ready()
//!     .await
//!     .unwrap()
//!     .call("hello".to_string())
//!     .await;
//! # }
//! ```
//!
//! ## Using the breaker directly
//!
//! The promise API suits callers that manage their own request lifecycle:
//!
//! ```rust
//! use rampart_breaker::AdaptiveBreaker;
//!
//! let breaker = AdaptiveBreaker::new("payments");
//! match breaker.allow() {
//!     Ok(promise) => {
//!         // run the request, then settle the promise
//!         promise.accept();
//!     }
//!     Err(_) => {
//!         // shed; serve a degraded answer
//!     }
//! }
//! ```
//!
//! ## Error handling
//!
//! ```rust
//! use rampart_breaker::{BreakerError, BreakerLayer};
//! use tower::{service_fn, Layer, Service};
//!
//! # async fn example() {
//! let layer = BreakerLayer::<std::io::Error>::builder().build();
//! let mut service = layer.layer(service_fn(|req: String| async move {
//!     Ok::<_, std::io::Error>(req)
//! }));
//!
//! match service.call("request".to_string()).await {
//!     Ok(response) => println!("ok: {response}"),
//!     Err(BreakerError::ServiceUnavailable) => eprintln!("shed"),
//!     Err(BreakerError::Inner(e)) => eprintln!("service error: {e}"),
//! }
//! # }
//! ```
//!
//! ## Feature flags
//! - `metrics`: admission/outcome counters via the `metrics` crate

use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

pub use breaker::{AdaptiveBreaker, AdaptiveBreakerBuilder, Promise};
pub use config::{BreakerConfig, BreakerConfigBuilder};
pub use error::{BreakerError, ServiceUnavailable};
pub use events::BreakerEvent;
pub use layer::BreakerLayer;

mod breaker;
mod config;
mod error;
mod events;
mod layer;

pub(crate) type SharedAcceptable<Err> = Arc<dyn Fn(&Err) -> bool + Send + Sync>;

/// A Tower [`Service`] guarded by an [`AdaptiveBreaker`].
///
/// Admission runs before every call; refusals are accounted as drops and
/// surface [`BreakerError::ServiceUnavailable`] without touching the inner
/// service. Outcomes of admitted calls are classified through the configured
/// acceptability rule; a panicking or cancelled call is recorded as failure.
pub struct BreakerService<S, Err> {
    inner: S,
    breaker: Arc<AdaptiveBreaker>,
    acceptable: SharedAcceptable<Err>,
}

impl<S, Err> BreakerService<S, Err> {
    pub(crate) fn new(
        inner: S,
        breaker: Arc<AdaptiveBreaker>,
        acceptable: SharedAcceptable<Err>,
    ) -> Self {
        Self {
            inner,
            breaker,
            acceptable,
        }
    }

    /// The breaker guarding this service.
    pub fn breaker(&self) -> &AdaptiveBreaker {
        &self.breaker
    }
}

impl<S, Err> Clone for BreakerService<S, Err>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            breaker: Arc::clone(&self.breaker),
            acceptable: Arc::clone(&self.acceptable),
        }
    }
}

impl<S, Req, Err> Service<Req> for BreakerService<S, Err>
where
    S: Service<Req, Error = Err> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    Req: Send + 'static,
    Err: Send + 'static,
{
    type Response = S::Response;
    type Error = BreakerError<Err>;
    type Future = BoxFuture<'static, Result<S::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(BreakerError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let breaker = Arc::clone(&self.breaker);
        let acceptable = Arc::clone(&self.acceptable);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            breaker
                .call_with_acceptable(move || inner.call(req), move |err| (acceptable)(err))
                .await
        })
    }
}
