//! Time-bucketed rolling window.
//!
//! A [`RollingWindow`] keeps a ring of `size` buckets, each covering
//! `interval` of wall-clock time. Writers accumulate into the bucket that
//! covers "now"; buckets silently expire as time advances and are cleared
//! before they are written again.

use std::ops::AddAssign;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// A single aggregate slot: an accumulated sum and the number of additions.
///
/// `count == 0` implies `sum == T::default()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Bucket<T> {
    /// Accumulated value.
    pub sum: T,
    /// Number of additions since the bucket was last reset.
    pub count: u64,
}

impl<T: Copy + Default + AddAssign> Bucket<T> {
    fn add(&mut self, v: T) {
        self.sum += v;
        self.count += 1;
    }

    fn reset(&mut self) {
        self.sum = T::default();
        self.count = 0;
    }
}

struct Ring<T> {
    buckets: Vec<Bucket<T>>,
    /// Index of the bucket covering `[last_time, last_time + interval)`.
    offset: usize,
    /// Start time of the current bucket, aligned to an interval boundary.
    last_time: Instant,
}

/// A rolling window of `size` time-slotted buckets.
///
/// `add` is exclusive (write lock); any number of `reduce` calls may run
/// concurrently (read lock). A `reduce` racing an `add`-induced advance may
/// observe expired buckets that were just zeroed; readers treat stale
/// buckets as empty either way, so this is part of the read contract.
pub struct RollingWindow<T> {
    size: usize,
    interval: Duration,
    ignore_current: bool,
    inner: RwLock<Ring<T>>,
}

impl<T: Copy + Default + AddAssign> RollingWindow<T> {
    /// Creates a window of `size` buckets, each spanning `interval`.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero or `interval` is zero; both are programmer
    /// errors, not runtime conditions.
    pub fn new(size: usize, interval: Duration) -> Self {
        assert!(size >= 1, "rolling window must have at least one bucket");
        assert!(
            !interval.is_zero(),
            "rolling window bucket interval must be non-zero"
        );

        Self {
            size,
            interval,
            ignore_current: false,
            inner: RwLock::new(Ring {
                buckets: vec![Bucket::default(); size],
                offset: 0,
                last_time: Instant::now(),
            }),
        }
    }

    /// Makes `reduce` skip the current bucket.
    ///
    /// The leading bucket is only partially filled; excluding it avoids
    /// skewing ratios computed from the window.
    pub fn ignore_current(mut self) -> Self {
        self.ignore_current = true;
        self
    }

    /// Accumulates `v` into the bucket covering now.
    pub fn add(&self, v: T) {
        let mut ring = self.inner.write().unwrap();
        self.update_offset(&mut ring, Instant::now());
        let offset = ring.offset;
        ring.buckets[offset].add(v);
    }

    /// Runs `f` over every non-expired bucket, oldest first.
    ///
    /// Buckets that expired since the last write are skipped rather than
    /// zeroed; the next write clears them.
    pub fn reduce<F>(&self, mut f: F)
    where
        F: FnMut(&Bucket<T>),
    {
        let ring = self.inner.read().unwrap();
        let span = self.span(&ring, Instant::now());
        // the current bucket holds partial data, skip it when asked to
        let diff = if span == 0 && self.ignore_current {
            self.size - 1
        } else {
            self.size - span
        };
        if diff > 0 {
            let start = (ring.offset + span + 1) % self.size;
            for i in 0..diff {
                f(&ring.buckets[(start + i) % self.size]);
            }
        }
    }

    /// Number of whole intervals elapsed since `last_time`, clamped to
    /// `[0, size]`.
    fn span(&self, ring: &Ring<T>, now: Instant) -> usize {
        let elapsed = now.saturating_duration_since(ring.last_time);
        let span = (elapsed.as_nanos() / self.interval.as_nanos()) as usize;
        span.min(self.size)
    }

    fn update_offset(&self, ring: &mut Ring<T>, now: Instant) {
        let span = self.span(ring, now);
        if span == 0 {
            return;
        }

        // buckets skipped during the advance hold expired data
        let offset = ring.offset;
        for i in 1..=span {
            ring.buckets[(offset + i) % self.size].reset();
        }
        ring.offset = (offset + span) % self.size;

        // align to the interval boundary, keeping the fractional drift
        let elapsed = now.saturating_duration_since(ring.last_time);
        let rem = elapsed.as_nanos() % self.interval.as_nanos();
        ring.last_time = now - Duration::from_nanos(rem as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    const INTERVAL: Duration = Duration::from_millis(100);

    fn sum_and_count(w: &RollingWindow<f64>) -> (f64, u64) {
        let mut sum = 0.0;
        let mut count = 0;
        w.reduce(|b| {
            sum += b.sum;
            count += b.count;
        });
        (sum, count)
    }

    #[test]
    #[should_panic(expected = "at least one bucket")]
    fn zero_size_panics() {
        let _ = RollingWindow::<f64>::new(0, INTERVAL);
    }

    #[test]
    fn accumulates_into_current_bucket() {
        let w = RollingWindow::new(3, Duration::from_secs(1));
        w.add(1.0);
        w.add(2.0);
        w.add(3.0);

        let (sum, count) = sum_and_count(&w);
        assert_eq!(sum, 6.0);
        assert_eq!(count, 3);
    }

    #[test]
    fn ignore_current_skips_leading_bucket() {
        let w = RollingWindow::new(3, Duration::from_secs(1)).ignore_current();
        w.add(5.0);

        let (sum, count) = sum_and_count(&w);
        assert_eq!(sum, 0.0);
        assert_eq!(count, 0);
    }

    #[test]
    fn advances_and_keeps_live_buckets() {
        let w = RollingWindow::new(3, INTERVAL);
        w.add(1.0);
        sleep(INTERVAL + Duration::from_millis(10));
        w.add(2.0);
        sleep(INTERVAL + Duration::from_millis(10));
        w.add(3.0);

        let (sum, count) = sum_and_count(&w);
        assert_eq!(sum, 6.0);
        assert_eq!(count, 3);
    }

    #[test]
    fn reduce_skips_expired_buckets() {
        let w = RollingWindow::new(3, INTERVAL);
        w.add(1.0);
        sleep(INTERVAL + Duration::from_millis(10));
        w.add(2.0);

        // two intervals of silence expire the first bucket
        sleep(2 * INTERVAL + Duration::from_millis(10));
        let (sum, count) = sum_and_count(&w);
        assert_eq!(sum, 2.0);
        assert_eq!(count, 1);
    }

    #[test]
    fn full_window_of_silence_expires_everything() {
        let w = RollingWindow::new(2, INTERVAL);
        w.add(7.0);
        w.add(7.0);
        sleep(2 * INTERVAL + Duration::from_millis(20));

        let (sum, count) = sum_and_count(&w);
        assert_eq!(sum, 0.0);
        assert_eq!(count, 0);

        // the next write lands in a cleared bucket
        w.add(1.0);
        let (sum, count) = sum_and_count(&w);
        assert_eq!(sum, 1.0);
        assert_eq!(count, 1);
    }

    #[test]
    fn works_with_struct_valued_buckets() {
        #[derive(Clone, Copy, Debug, Default)]
        struct Pair {
            hits: i64,
            misses: i64,
        }

        impl AddAssign for Pair {
            fn add_assign(&mut self, rhs: Self) {
                self.hits += rhs.hits;
                self.misses += rhs.misses;
            }
        }

        let w = RollingWindow::new(4, Duration::from_secs(1));
        w.add(Pair { hits: 1, misses: 0 });
        w.add(Pair { hits: 0, misses: 2 });

        let mut hits = 0;
        let mut misses = 0;
        w.reduce(|b| {
            hits += b.sum.hits;
            misses += b.sum.misses;
        });
        assert_eq!(hits, 1);
        assert_eq!(misses, 2);
    }
}
