//! Power-of-two-choices selection over a fixed set of ready connections.

use crate::endpoint::{Endpoint, INIT_SUCCESS};
use crate::error::PickError;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// EWMA decay constant; the weight of an old observation halves roughly
/// every seven seconds of idle time.
const DECAY_TIME: Duration = Duration::from_secs(10);
/// An endpoint unpicked for this long wins the next pairwise choice.
const FORCE_PICK: Duration = Duration::from_secs(1);
/// Sampling attempts spent looking for a healthy pair.
const PICK_TIMES: usize = 3;
const LOG_INTERVAL: Duration = Duration::from_secs(60);

pub(crate) type SharedAcceptable<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

struct PickerShared<C, E> {
    conns: Vec<Arc<Endpoint<C>>>,
    /// Serializes selection and the stats dump; the generator rides along.
    rng: Mutex<SmallRng>,
    /// Origin of the picker clock; endpoint stamps are offsets from it.
    epoch: Instant,
    /// Time of the last stats dump, on the picker clock.
    stamp: AtomicI64,
    acceptable: SharedAcceptable<E>,
}

impl<C, E> PickerShared<C, E> {
    fn now_nanos(&self) -> i64 {
        self.epoch.elapsed().as_nanos() as i64
    }

    fn choose(&self, a: &Arc<Endpoint<C>>, b: Option<&Arc<Endpoint<C>>>) -> Arc<Endpoint<C>> {
        let start = self.now_nanos();
        let Some(b) = b else {
            a.pick.store(start, Ordering::Relaxed);
            return Arc::clone(a);
        };

        let (c1, c2) = if a.load() > b.load() { (b, a) } else { (a, b) };

        // lift the losing endpoint if it has been starved of selection; the
        // CAS makes sure only one racing pick does so
        let pick = c2.pick.load(Ordering::Acquire);
        if start - pick > FORCE_PICK.as_nanos() as i64
            && c2
                .pick
                .compare_exchange(pick, start, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            return Arc::clone(c2);
        }

        c1.pick.store(start, Ordering::Relaxed);
        Arc::clone(c1)
    }

    fn log_stats(&self) {
        let _guard = self.rng.lock().unwrap();
        let mut stats = Vec::with_capacity(self.conns.len());
        for conn in &self.conns {
            stats.push(format!(
                "conn: {}, load: {}, reqs: {}",
                conn.addr(),
                conn.load(),
                conn.requests.swap(0, Ordering::Relaxed),
            ));
        }
        tracing::info!("p2c - {}", stats.join("; "));
    }
}

/// A power-of-two-choices picker over a snapshot of ready connections.
///
/// The picker is immutable: when the ready set changes, the connection
/// manager builds a fresh one (see [`P2cBuilder`]). Cloning is cheap and
/// clones share all state.
pub struct P2cPicker<C, E> {
    shared: Arc<PickerShared<C, E>>,
}

impl<C, E> Clone for P2cPicker<C, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Clone, E> P2cPicker<C, E> {
    /// Builds a picker from the current ready set.
    ///
    /// `acceptable` classifies completion errors: errors it accepts (e.g.
    /// caller-side cancellations) do not count against endpoint health.
    pub fn build<A>(ready: impl IntoIterator<Item = (C, String)>, acceptable: A) -> Self
    where
        A: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self::build_shared(ready, Arc::new(acceptable))
    }

    fn build_shared(
        ready: impl IntoIterator<Item = (C, String)>,
        acceptable: SharedAcceptable<E>,
    ) -> Self {
        let conns = ready
            .into_iter()
            .map(|(conn, addr)| Arc::new(Endpoint::new(conn, addr)))
            .collect();

        Self {
            shared: Arc::new(PickerShared {
                conns,
                rng: Mutex::new(SmallRng::from_os_rng()),
                epoch: Instant::now(),
                stamp: AtomicI64::new(0),
                acceptable,
            }),
        }
    }

    /// Selects one connection for the next request.
    ///
    /// The returned [`Completion`] must be invoked exactly once when the
    /// request finishes; the connection-management framework guarantees
    /// this for picks it hands out.
    pub fn pick(&self) -> Result<Pick<C, E>, PickError> {
        let shared = &self.shared;
        let conns = &shared.conns;

        let chosen = {
            let mut rng = shared.rng.lock().unwrap();
            match conns.len() {
                0 => return Err(PickError::NoConnectionAvailable),
                1 => shared.choose(&conns[0], None),
                2 => shared.choose(&conns[0], Some(&conns[1])),
                len => {
                    // sample distinct pairs, settling for the last one if no
                    // healthy pair turns up
                    let mut node1 = &conns[0];
                    let mut node2 = &conns[1];
                    for _ in 0..PICK_TIMES {
                        let a = rng.random_range(0..len);
                        let mut b = rng.random_range(0..len - 1);
                        if b >= a {
                            b += 1;
                        }
                        node1 = &conns[a];
                        node2 = &conns[b];
                        if node1.healthy() && node2.healthy() {
                            break;
                        }
                    }
                    shared.choose(node1, Some(node2))
                }
            }
        };

        chosen.inflight.fetch_add(1, Ordering::Relaxed);
        chosen.requests.fetch_add(1, Ordering::Relaxed);

        Ok(Pick {
            conn: chosen.conn().clone(),
            completion: Completion {
                start: shared.now_nanos(),
                endpoint: chosen,
                shared: Arc::clone(shared),
            },
        })
    }

    /// The endpoints this picker selects from.
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint<C>> {
        self.shared.conns.iter().map(Arc::as_ref)
    }
}

/// Rebuild hook handed to the connection-management framework.
///
/// The framework calls [`build`](P2cBuilder::build) with the full ready set
/// whenever that set changes; per-endpoint statistics start fresh on every
/// rebuild.
pub struct P2cBuilder<E> {
    acceptable: SharedAcceptable<E>,
}

impl<E> P2cBuilder<E> {
    pub fn new<A>(acceptable: A) -> Self
    where
        A: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self {
            acceptable: Arc::new(acceptable),
        }
    }

    pub fn build<C: Clone>(&self, ready: impl IntoIterator<Item = (C, String)>) -> P2cPicker<C, E> {
        P2cPicker::build_shared(ready, Arc::clone(&self.acceptable))
    }
}

/// A selected connection plus its completion handle.
pub struct Pick<C, E> {
    pub conn: C,
    pub completion: Completion<C, E>,
}

impl<C: std::fmt::Debug, E> std::fmt::Debug for Pick<C, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pick")
            .field("conn", &self.conn)
            .field("completion", &"Completion { .. }")
            .finish()
    }
}

/// One-shot completion callback for a picked request.
pub struct Completion<C, E> {
    endpoint: Arc<Endpoint<C>>,
    shared: Arc<PickerShared<C, E>>,
    start: i64,
}

impl<C, E> Completion<C, E> {
    /// Feeds the request outcome back into the endpoint statistics.
    ///
    /// `err` is the request error, if any; errors the picker's
    /// acceptability rule accepts do not count against health. Never fails.
    pub fn complete(self, err: Option<&E>) {
        let c = &self.endpoint;
        c.inflight.fetch_sub(1, Ordering::Relaxed);

        let now = self.shared.now_nanos();
        let last = c.last.swap(now, Ordering::AcqRel);
        let td = (now - last).max(0);
        // the longer the gap since the previous completion, the less the old
        // average weighs
        let mut w = (-(td as f64) / DECAY_TIME.as_nanos() as f64).exp();

        let lag = (now - self.start).max(0);
        let old_lag = c.lag.load(Ordering::Relaxed);
        if old_lag == 0 {
            // first observation seeds the average directly
            w = 0.0;
        }
        c.lag.store(
            (old_lag as f64 * w + lag as f64 * (1.0 - w)) as u64,
            Ordering::Relaxed,
        );

        let fresh = match err {
            Some(err) if !(self.shared.acceptable)(err) => 0,
            _ => INIT_SUCCESS,
        };
        let old_success = c.success.load(Ordering::Relaxed);
        c.success.store(
            (old_success as f64 * w + fresh as f64 * (1.0 - w)) as u64,
            Ordering::Relaxed,
        );

        let stamp = self.shared.stamp.load(Ordering::Acquire);
        if now - stamp >= LOG_INTERVAL.as_nanos() as i64
            && self
                .shared
                .stamp
                .compare_exchange(stamp, now, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
        {
            self.shared.log_stats();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn picker(n: usize) -> P2cPicker<usize, io::Error> {
        P2cPicker::build((0..n).map(|i| (i, format!("backend-{i}:9000"))), |_| false)
    }

    #[test]
    fn empty_ready_set_errors() {
        let picker = picker(0);
        assert_eq!(picker.pick().unwrap_err(), PickError::NoConnectionAvailable);
    }

    #[test]
    fn single_connection_is_always_chosen() {
        let picker = picker(1);
        for _ in 0..10 {
            let pick = picker.pick().unwrap();
            assert_eq!(pick.conn, 0);
            pick.completion.complete(None);
        }
        assert_eq!(picker.shared.conns[0].inflight.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn pick_and_complete_balance_inflight() {
        let picker = picker(1);
        let first = picker.pick().unwrap();
        let second = picker.pick().unwrap();
        assert_eq!(picker.shared.conns[0].inflight.load(Ordering::Relaxed), 2);

        first.completion.complete(None);
        second.completion.complete(None);
        assert_eq!(picker.shared.conns[0].inflight.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn first_completion_seeds_the_latency_average() {
        let picker = picker(1);
        let pick = picker.pick().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        pick.completion.complete(None);

        let lag = picker.shared.conns[0].lag.load(Ordering::Relaxed);
        assert!(lag >= 20_000_000, "lag {lag} ns is below the observed gap");
        assert!(lag < 1_000_000_000, "lag {lag} ns is implausibly large");
        assert_eq!(
            picker.shared.conns[0].success.load(Ordering::Relaxed),
            INIT_SUCCESS
        );
    }

    #[test]
    fn unacceptable_errors_erode_health() {
        let picker = picker(1);
        for _ in 0..20 {
            let pick = picker.pick().unwrap();
            pick.completion
                .complete(Some(&io::Error::other("backend down")));
        }
        assert!(!picker.shared.conns[0].healthy());
    }

    #[test]
    fn acceptable_errors_leave_health_alone() {
        let picker: P2cPicker<usize, io::Error> = P2cPicker::build(
            vec![(0usize, "backend-0:9000".to_string())],
            |err: &io::Error| err.kind() == io::ErrorKind::Interrupted,
        );

        for _ in 0..20 {
            let pick = picker.pick().unwrap();
            pick.completion
                .complete(Some(&io::Error::from(io::ErrorKind::Interrupted)));
        }
        assert!(picker.shared.conns[0].healthy());
    }

    #[test]
    fn prefers_the_less_loaded_endpoint() {
        let picker = picker(2);
        for conn in &picker.shared.conns {
            conn.lag.store(1_000_000, Ordering::Relaxed);
        }
        picker.shared.conns[1].inflight.store(10, Ordering::Relaxed);

        let mut counts = [0usize; 2];
        for _ in 0..100 {
            let pick = picker.pick().unwrap();
            counts[pick.conn] += 1;
            pick.completion.complete(None);
        }
        assert!(
            counts[0] > counts[1],
            "idle endpoint was not preferred: {counts:?}"
        );
    }

    #[test]
    fn starved_endpoint_is_force_picked() {
        let picker = picker(2);
        for conn in &picker.shared.conns {
            conn.lag.store(1_000_000, Ordering::Relaxed);
        }
        // make endpoint 1 clearly worse yet long overdue for a pick
        picker.shared.conns[1].inflight.store(10, Ordering::Relaxed);
        picker.shared.conns[1]
            .pick
            .store(-2_000_000_000, Ordering::Relaxed);

        let pick = picker.pick().unwrap();
        assert_eq!(pick.conn, 1, "overdue endpoint must win the choice");
        pick.completion.complete(None);
    }

    #[test]
    fn stats_dump_zeroes_request_counters() {
        let picker = picker(2);
        for _ in 0..10 {
            let pick = picker.pick().unwrap();
            pick.completion.complete(None);
        }
        picker.shared.log_stats();

        for conn in &picker.shared.conns {
            assert_eq!(conn.requests.load(Ordering::Relaxed), 0);
        }
    }

    #[test]
    fn builder_rebuilds_fresh_pickers() {
        let builder = P2cBuilder::new(|_: &io::Error| false);
        let picker = builder.build(vec![(1usize, "a:9000".to_string())]);
        let pick = picker.pick().unwrap();
        assert_eq!(pick.conn, 1);
        pick.completion.complete(None);

        let rebuilt = builder.build(vec![
            (1usize, "a:9000".to_string()),
            (2usize, "b:9000".to_string()),
        ]);
        assert_eq!(rebuilt.endpoints().count(), 2);
        assert!(rebuilt.endpoints().all(|e| e.healthy()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn inflight_stays_balanced_under_concurrency() {
        let picker = picker(3);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let picker = picker.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..200 {
                    let pick = picker.pick().unwrap();
                    tokio::task::yield_now().await;
                    if i % 2 == 0 {
                        pick.completion.complete(None);
                    } else {
                        pick.completion
                            .complete(Some(&io::Error::other("transient")));
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        for conn in &picker.shared.conns {
            assert_eq!(conn.inflight.load(Ordering::Relaxed), 0);
        }
    }
}
