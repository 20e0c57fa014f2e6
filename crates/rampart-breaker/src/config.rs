use crate::events::BreakerEvent;
use crate::layer::BreakerLayer;
use crate::SharedAcceptable;
use rampart_core::{EventListeners, FnListener};
use std::sync::Arc;
use std::time::Duration;

/// Configuration shared by every service a [`BreakerLayer`] wraps.
///
/// Each wrapped service still gets its own breaker instance; the
/// configuration only fixes the settings and listeners.
pub struct BreakerConfig<Err> {
    pub(crate) name: String,
    pub(crate) k: f64,
    pub(crate) window: Duration,
    pub(crate) buckets: usize,
    pub(crate) acceptable: SharedAcceptable<Err>,
    pub(crate) event_listeners: EventListeners<BreakerEvent>,
}

impl<Err> BreakerConfig<Err> {
    /// Creates a new configuration builder.
    pub fn builder() -> BreakerConfigBuilder<Err> {
        BreakerConfigBuilder::new()
    }
}

/// Builder for configuring and constructing a [`BreakerLayer`].
pub struct BreakerConfigBuilder<Err> {
    name: String,
    k: f64,
    window: Duration,
    buckets: usize,
    acceptable: SharedAcceptable<Err>,
    event_listeners: EventListeners<BreakerEvent>,
}

impl<Err> BreakerConfigBuilder<Err> {
    /// Creates a builder with default values.
    pub fn new() -> Self {
        Self {
            name: String::from("<unnamed>"),
            k: 1.5,
            window: Duration::from_secs(10),
            buckets: 40,
            acceptable: Arc::new(|_| false),
            event_listeners: EventListeners::new(),
        }
    }

    /// Gives the breaker a human-readable name for observability.
    ///
    /// Default: `<unnamed>`
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the sensitivity constant; lower values shed sooner.
    ///
    /// Default: 1.5, must be at least 1.1.
    pub fn k(mut self, k: f64) -> Self {
        self.k = k;
        self
    }

    /// Sets the total observation window.
    ///
    /// Default: 10 seconds
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Sets the number of buckets the window is divided into.
    ///
    /// Default: 40
    pub fn buckets(mut self, buckets: usize) -> Self {
        self.buckets = buckets;
        self
    }

    /// Sets the acceptability rule: errors for which `f` returns true are
    /// recorded as successes (they are not the dependency's fault, e.g.
    /// caller-side cancellations).
    ///
    /// Default: every error counts as a failure.
    pub fn acceptable<F>(mut self, f: F) -> Self
    where
        F: Fn(&Err) -> bool + Send + Sync + 'static,
    {
        self.acceptable = Arc::new(f);
        self
    }

    /// Registers a callback for admitted requests.
    pub fn on_admitted<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &BreakerEvent| {
                if matches!(event, BreakerEvent::Admitted { .. }) {
                    f();
                }
            }));
        self
    }

    /// Registers a callback for shed requests.
    pub fn on_dropped<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &BreakerEvent| {
                if matches!(event, BreakerEvent::Dropped { .. }) {
                    f();
                }
            }));
        self
    }

    /// Registers a callback for recorded successes.
    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &BreakerEvent| {
                if matches!(event, BreakerEvent::SuccessRecorded { .. }) {
                    f();
                }
            }));
        self
    }

    /// Registers a callback for recorded failures.
    pub fn on_failure<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.event_listeners
            .add(FnListener::new(move |event: &BreakerEvent| {
                if matches!(event, BreakerEvent::FailureRecorded { .. }) {
                    f();
                }
            }));
        self
    }

    /// Builds the configuration and returns a [`BreakerLayer`].
    pub fn build(self) -> BreakerLayer<Err> {
        BreakerLayer::new(BreakerConfig {
            name: self.name,
            k: self.k,
            window: self.window,
            buckets: self.buckets,
            acceptable: self.acceptable,
            event_listeners: self.event_listeners,
        })
    }
}

impl<Err> Default for BreakerConfigBuilder<Err> {
    fn default() -> Self {
        Self::new()
    }
}
