use crate::breaker::AdaptiveBreaker;
use crate::config::{BreakerConfig, BreakerConfigBuilder};
use crate::BreakerService;
use std::sync::Arc;
use tower::Layer;

/// A Tower [`Layer`] that wraps services with an adaptive breaker.
///
/// Every call to [`Layer::layer`] creates a fresh breaker: one breaker per
/// protected dependency. Clones of the resulting service share that breaker.
pub struct BreakerLayer<Err> {
    config: Arc<BreakerConfig<Err>>,
}

impl<Err> BreakerLayer<Err> {
    pub(crate) fn new(config: BreakerConfig<Err>) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Creates a new builder for configuring a breaker layer.
    pub fn builder() -> BreakerConfigBuilder<Err> {
        BreakerConfigBuilder::new()
    }
}

impl<Err> Clone for BreakerLayer<Err> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, Err> Layer<S> for BreakerLayer<Err> {
    type Service = BreakerService<S, Err>;

    fn layer(&self, inner: S) -> Self::Service {
        let config = &self.config;
        let breaker = AdaptiveBreaker::builder()
            .name(config.name.clone())
            .k(config.k)
            .window(config.window)
            .buckets(config.buckets)
            .listeners(config.event_listeners.clone())
            .build();

        BreakerService::new(inner, Arc::new(breaker), Arc::clone(&config.acceptable))
    }
}
