//! Adaptive client-side throttling.
//!
//! The breaker keeps a rolling window of request outcomes and sheds load
//! probabilistically when the recent accept ratio degrades, following the
//! client-side throttling scheme from the Google SRE handbook. There is no
//! explicit open/closed state machine; the drop probability is recomputed
//! from the window on every admission decision.

use crate::error::{BreakerError, ServiceUnavailable};
use crate::events::BreakerEvent;
#[cfg(feature = "metrics")]
use metrics::counter;
use rampart_core::{EventListeners, Proba, RollingWindow};
use std::future::Future;
use std::ops::AddAssign;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(10);
const DEFAULT_BUCKETS: usize = 40;
const DEFAULT_K: f64 = 1.5;
const MIN_K: f64 = 1.1;
const PROTECTION: i64 = 5;
const FORCE_PASS_INTERVAL: Duration = Duration::from_secs(1);

/// Per-bucket outcome counters.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Tally {
    pub(crate) success: i64,
    pub(crate) failure: i64,
    pub(crate) dropped: i64,
}

impl Tally {
    fn total(&self) -> i64 {
        self.success + self.failure + self.dropped
    }
}

impl AddAssign for Tally {
    fn add_assign(&mut self, rhs: Self) {
        self.success += rhs.success;
        self.failure += rhs.failure;
        self.dropped += rhs.dropped;
    }
}

/// Window statistics gathered by one oldest-first scan.
///
/// The streak counters track the run of consecutive failing/working buckets
/// at the head of the window, not totals; a bucket with both outcomes breaks
/// both streaks.
#[derive(Debug, Default, PartialEq, Eq)]
struct History {
    accepts: i64,
    total: i64,
    failing_buckets: i64,
    working_buckets: i64,
}

/// An adaptive circuit breaker, one instance per protected dependency.
///
/// All methods take `&self`; the breaker is safe to share behind an `Arc`
/// across request workers.
pub struct AdaptiveBreaker {
    name: String,
    k: f64,
    buckets: usize,
    stat: RollingWindow<Tally>,
    proba: Proba,
    started: Instant,
    /// Nanoseconds since `started` of the last admission, 0 when none yet.
    last_pass_nanos: AtomicU64,
    listeners: EventListeners<BreakerEvent>,
}

impl AdaptiveBreaker {
    /// Creates a breaker with default settings (10 s window, 40 buckets,
    /// `k = 1.5`).
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder().name(name).build()
    }

    /// Returns a builder for customizing the breaker.
    pub fn builder() -> AdaptiveBreakerBuilder {
        AdaptiveBreakerBuilder::new()
    }

    /// The name this breaker reports in events and metrics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asks for admission.
    ///
    /// On admission the returned [`Promise`] must be settled with
    /// [`Promise::accept`] or [`Promise::reject`] once the guarded request
    /// finishes. A refusal is accounted as a drop and surfaces the
    /// [`ServiceUnavailable`] sentinel.
    pub fn allow(&self) -> Result<Promise<'_>, ServiceUnavailable> {
        self.accept()?;
        Ok(Promise { breaker: self })
    }

    /// Wraps `req`, treating every error as a failure.
    pub async fn call<F, Fut, T, E>(&self, req: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.do_call(req, None::<fn() -> Result<T, E>>, |_: &E| false)
            .await
    }

    /// Wraps `req` with a custom acceptability rule: errors for which
    /// `acceptable` returns true still count as successes (they are not the
    /// dependency's fault).
    pub async fn call_with_acceptable<F, Fut, T, E, A>(
        &self,
        req: F,
        acceptable: A,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        A: Fn(&E) -> bool,
    {
        self.do_call(req, None::<fn() -> Result<T, E>>, acceptable)
            .await
    }

    /// Wraps `req`; when admission is refused the drop is recorded and
    /// `fallback` answers instead of the sentinel.
    pub async fn call_with_fallback<F, Fut, T, E, FB>(
        &self,
        req: F,
        fallback: FB,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> Result<T, E>,
    {
        self.do_call(req, Some(fallback), |_: &E| false).await
    }

    /// Combination of [`call_with_fallback`](Self::call_with_fallback) and
    /// [`call_with_acceptable`](Self::call_with_acceptable).
    pub async fn call_with_fallback_acceptable<F, Fut, T, E, FB, A>(
        &self,
        req: F,
        fallback: FB,
        acceptable: A,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> Result<T, E>,
        A: Fn(&E) -> bool,
    {
        self.do_call(req, Some(fallback), acceptable).await
    }

    async fn do_call<F, Fut, T, E, FB, A>(
        &self,
        req: F,
        fallback: Option<FB>,
        acceptable: A,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> Result<T, E>,
        A: Fn(&E) -> bool,
    {
        if let Err(err) = self.accept() {
            return match fallback {
                Some(fb) => fb().map_err(BreakerError::Inner),
                None => Err(err.into()),
            };
        }

        // A panic or cancellation mid-request must still be accounted; the
        // guard records a failure unless it is disarmed below.
        let mut guard = OutcomeGuard::new(self);
        let result = req().await;
        match &result {
            Ok(_) => self.mark_success(),
            Err(err) if acceptable(err) => self.mark_success(),
            Err(_) => self.mark_failure(),
        }
        guard.disarm();

        result.map_err(BreakerError::Inner)
    }

    /// Runs the admission decision, recording the drop on refusal.
    pub(crate) fn accept(&self) -> Result<(), ServiceUnavailable> {
        match self.decide() {
            Ok(()) => {
                self.emit_with(|pattern_name, timestamp| BreakerEvent::Admitted {
                    pattern_name,
                    timestamp,
                });
                #[cfg(feature = "metrics")]
                counter!("breaker_requests_total", "breaker" => self.name.clone(), "outcome" => "admitted").increment(1);
                Ok(())
            }
            Err(err) => {
                self.mark_drop();
                Err(err)
            }
        }
    }

    fn decide(&self) -> Result<(), ServiceUnavailable> {
        let history = self.history();

        // k erodes toward its floor as the leading failing streak grows,
        // tripping faster under sustained failure
        let w = self.k - (self.k - MIN_K) * history.failing_buckets as f64 / self.buckets as f64;
        let weighted_accepts = w.max(MIN_K) * history.accepts as f64;
        // https://sre.google/sre-book/handling-overload/#eq2101
        let mut drop_ratio =
            ((history.total - PROTECTION) as f64 - weighted_accepts) / (history.total + 1) as f64;
        if drop_ratio <= 0.0 {
            return Ok(());
        }

        let now = self.elapsed_nanos();
        let last_pass = self.last_pass_nanos.load(Ordering::Relaxed);
        if last_pass > 0 && now.saturating_sub(last_pass) > FORCE_PASS_INTERVAL.as_nanos() as u64 {
            // probe: one request per interval senses recovery even while the
            // drop probability stays high
            self.last_pass_nanos.store(now, Ordering::Relaxed);
            return Ok(());
        }

        // shed harder while healthy buckets are scarce
        drop_ratio *= (self.buckets as i64 - history.working_buckets) as f64 / self.buckets as f64;
        if self.proba.true_on_proba(drop_ratio) {
            tracing::debug!(breaker = %self.name, drop_ratio, "request dropped");
            return Err(ServiceUnavailable);
        }

        self.last_pass_nanos.store(now, Ordering::Relaxed);
        Ok(())
    }

    fn history(&self) -> History {
        let mut history = History::default();
        self.stat.reduce(|b| {
            history.accepts += b.sum.success;
            history.total += b.sum.total();
            // a mixed bucket breaks both streaks and extends neither
            if b.sum.failure > 0 {
                history.working_buckets = 0;
            } else if b.sum.success > 0 {
                history.working_buckets += 1;
            }
            if b.sum.success > 0 {
                history.failing_buckets = 0;
            } else if b.sum.failure > 0 {
                history.failing_buckets += 1;
            }
        });
        history
    }

    /// Records an acceptable completion.
    pub fn mark_success(&self) {
        self.stat.add(Tally {
            success: 1,
            ..Default::default()
        });
        self.emit_with(|pattern_name, timestamp| BreakerEvent::SuccessRecorded {
            pattern_name,
            timestamp,
        });
        #[cfg(feature = "metrics")]
        counter!("breaker_requests_total", "breaker" => self.name.clone(), "outcome" => "success")
            .increment(1);
    }

    /// Records an unacceptable completion.
    pub fn mark_failure(&self) {
        self.stat.add(Tally {
            failure: 1,
            ..Default::default()
        });
        self.emit_with(|pattern_name, timestamp| BreakerEvent::FailureRecorded {
            pattern_name,
            timestamp,
        });
        #[cfg(feature = "metrics")]
        counter!("breaker_requests_total", "breaker" => self.name.clone(), "outcome" => "failure")
            .increment(1);
    }

    /// Records a shed request.
    pub fn mark_drop(&self) {
        self.stat.add(Tally {
            dropped: 1,
            ..Default::default()
        });
        self.emit_with(|pattern_name, timestamp| BreakerEvent::Dropped {
            pattern_name,
            timestamp,
        });
        #[cfg(feature = "metrics")]
        counter!("breaker_requests_total", "breaker" => self.name.clone(), "outcome" => "dropped")
            .increment(1);
    }

    fn elapsed_nanos(&self) -> u64 {
        self.started.elapsed().as_nanos() as u64
    }

    fn emit_with(&self, make: impl FnOnce(String, Instant) -> BreakerEvent) {
        if self.listeners.is_empty() {
            return;
        }
        let event = make(self.name.clone(), Instant::now());
        self.listeners.emit(&event);
    }
}

/// Settlement handle for an admitted request.
#[must_use = "an admitted request must be settled with accept() or reject()"]
pub struct Promise<'a> {
    breaker: &'a AdaptiveBreaker,
}

impl Promise<'_> {
    /// Records the guarded request as a success.
    pub fn accept(self) {
        self.breaker.mark_success();
    }

    /// Records the guarded request as a failure.
    pub fn reject(self) {
        self.breaker.mark_failure();
    }
}

/// Records a failure on drop unless disarmed.
///
/// Guards the span between admission and outcome classification so that a
/// panicking or cancelled request still counts against the window.
pub(crate) struct OutcomeGuard<'a> {
    breaker: &'a AdaptiveBreaker,
    armed: bool,
}

impl<'a> OutcomeGuard<'a> {
    pub(crate) fn new(breaker: &'a AdaptiveBreaker) -> Self {
        Self {
            breaker,
            armed: true,
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for OutcomeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.mark_failure();
        }
    }
}

/// Builder for [`AdaptiveBreaker`].
pub struct AdaptiveBreakerBuilder {
    name: String,
    k: f64,
    window: Duration,
    buckets: usize,
    listeners: EventListeners<BreakerEvent>,
}

impl AdaptiveBreakerBuilder {
    fn new() -> Self {
        Self {
            name: String::from("<unnamed>"),
            k: DEFAULT_K,
            window: DEFAULT_WINDOW,
            buckets: DEFAULT_BUCKETS,
            listeners: EventListeners::new(),
        }
    }

    /// Names the breaker for observability.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the sensitivity constant; lower values shed sooner.
    ///
    /// Default: 1.5. Values below 1.1 are rejected at `build`.
    pub fn k(mut self, k: f64) -> Self {
        self.k = k;
        self
    }

    /// Sets the total observation window.
    ///
    /// Default: 10 seconds.
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Sets the number of buckets the window is divided into.
    ///
    /// Default: 40.
    pub fn buckets(mut self, buckets: usize) -> Self {
        self.buckets = buckets;
        self
    }

    /// Installs a pre-built listener collection.
    pub fn listeners(mut self, listeners: EventListeners<BreakerEvent>) -> Self {
        self.listeners = listeners;
        self
    }

    /// Builds the breaker.
    ///
    /// # Panics
    ///
    /// Panics on invalid settings: `k < 1.1`, zero buckets, or a window
    /// shorter than one nanosecond per bucket.
    pub fn build(self) -> AdaptiveBreaker {
        assert!(self.k >= MIN_K, "breaker sensitivity k must be at least 1.1");
        assert!(self.buckets >= 1, "breaker needs at least one bucket");
        let interval = self.window / self.buckets as u32;

        AdaptiveBreaker {
            name: self.name,
            k: self.k,
            buckets: self.buckets,
            stat: RollingWindow::new(self.buckets, interval),
            proba: Proba::new(),
            started: Instant::now(),
            last_pass_nanos: AtomicU64::new(0),
            listeners: self.listeners,
        }
    }
}
