//! Distributed token-bucket limiter.

use crate::local::LocalLimiter;
#[cfg(feature = "metrics")]
use metrics::counter;
use redis::aio::ConnectionManager;
use redis::{RedisResult, Script};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TOKEN_SCRIPT: &str = include_str!("tokenscript.lua");
const PING_INTERVAL: Duration = Duration::from_millis(100);

struct LimiterInner {
    rate: u32,
    burst: u32,
    client: redis::Client,
    token_key: String,
    timestamp_key: String,
    script: Script,
    conn: tokio::sync::Mutex<Option<ConnectionManager>>,
    /// 1 while the remote store answers, 0 while the rescue bucket serves.
    redis_alive: AtomicU32,
    monitor_started: Mutex<bool>,
    rescue: LocalLimiter,
}

/// A distributed token-bucket limiter: capacity `burst`, refill `rate`
/// tokens per second, enforced across processes through an atomic script on
/// the shared store.
///
/// While the store is unreachable an in-process bucket of the same shape
/// answers instead, trading cross-process fairness for availability. The
/// limiter is cheap to clone; clones share all state.
#[derive(Clone)]
pub struct TokenLimiter {
    inner: Arc<LimiterInner>,
}

impl TokenLimiter {
    /// Creates a limiter for `key`, allowing `rate` tokens per second with
    /// bursts of at most `burst`.
    ///
    /// The store connection is established lazily; a store that is down at
    /// construction time only degrades the limiter to its rescue bucket.
    pub fn new(rate: u32, burst: u32, client: redis::Client, key: &str) -> Self {
        Self {
            inner: Arc::new(LimiterInner {
                rate,
                burst,
                client,
                // hash-tagged so both keys land on one cluster slot
                token_key: format!("{{{key}}}.tokens"),
                timestamp_key: format!("{{{key}}}.ts"),
                script: Script::new(TOKEN_SCRIPT),
                conn: tokio::sync::Mutex::new(None),
                redis_alive: AtomicU32::new(1),
                monitor_started: Mutex::new(false),
                rescue: LocalLimiter::new(rate, burst),
            }),
        }
    }

    /// Shorthand for `allow_n(SystemTime::now(), 1)`.
    pub async fn allow(&self) -> bool {
        self.allow_n(SystemTime::now(), 1).await
    }

    /// Reports whether `n` tokens may be consumed at time `now`.
    ///
    /// Callers that need a hard deadline wrap the future in
    /// `tokio::time::timeout`; store-side timeouts are answered with `false`
    /// without consulting the rescue bucket.
    pub async fn allow_n(&self, now: SystemTime, n: u32) -> bool {
        let allowed = self.reserve_n(now, n).await;

        #[cfg(feature = "metrics")]
        counter!(
            "tokenlimit_decisions_total",
            "key" => self.inner.token_key.clone(),
            "allowed" => if allowed { "true" } else { "false" },
        )
        .increment(1);

        allowed
    }

    async fn reserve_n(&self, now: SystemTime, n: u32) -> bool {
        let inner = &self.inner;
        if inner.redis_alive.load(Ordering::Acquire) == 0 {
            return self.rescue(n);
        }

        let result = self.run_script(now, n).await;
        self.resolve_remote(result, n)
    }

    /// Turns the outcome of the remote script into an admission decision.
    fn resolve_remote(&self, result: RedisResult<Option<i64>>, n: u32) -> bool {
        match result {
            // integer 1 means allowed, any other integer means refused
            Ok(Some(code)) => code == 1,
            // nil reply: the script itself refused
            Ok(None) => false,
            Err(err) if err.is_timeout() => {
                // the caller asked to stop; refuse without falling back
                tracing::error!(error = %err, "token limiter store call timed out");
                false
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    "token limiter store call failed, using in-process limiter for rescue"
                );
                self.start_monitor();
                self.rescue(n)
            }
        }
    }

    async fn run_script(&self, now: SystemTime, n: u32) -> RedisResult<Option<i64>> {
        let inner = &self.inner;
        let mut conn = inner.connection().await?;
        let now_unix = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let resp: Option<i64> = inner
            .script
            .key(&inner.token_key)
            .key(&inner.timestamp_key)
            .arg(inner.rate)
            .arg(inner.burst)
            .arg(now_unix)
            .arg(n)
            .invoke_async(&mut conn)
            .await?;
        Ok(resp)
    }

    fn rescue(&self, n: u32) -> bool {
        #[cfg(feature = "metrics")]
        counter!("tokenlimit_rescue_total", "key" => self.inner.token_key.clone()).increment(1);

        self.inner.rescue.allow_n(std::time::Instant::now(), n)
    }

    /// Flips to rescue mode and spawns the liveness monitor, at most one at
    /// a time.
    fn start_monitor(&self) {
        let mut started = self.inner.monitor_started.lock().unwrap();
        if *started {
            return;
        }
        *started = true;
        self.inner.redis_alive.store(0, Ordering::Release);
        drop(started);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            wait_for_store(inner).await;
        });
    }

    #[cfg(test)]
    fn redis_alive(&self) -> bool {
        self.inner.redis_alive.load(Ordering::Acquire) == 1
    }

    #[cfg(test)]
    fn monitor_running(&self) -> bool {
        *self.inner.monitor_started.lock().unwrap()
    }
}

impl LimiterInner {
    async fn connection(&self) -> RedisResult<ConnectionManager> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = ConnectionManager::new(self.client.clone()).await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn ping(&self) -> bool {
        let Ok(mut conn) = self.connection().await else {
            return false;
        };
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}

/// Pings the store until it answers, then hands traffic back to it.
async fn wait_for_store(inner: Arc<LimiterInner>) {
    loop {
        tokio::time::sleep(PING_INTERVAL).await;
        if inner.ping().await {
            break;
        }
    }
    inner.redis_alive.store(1, Ordering::Release);
    *inner.monitor_started.lock().unwrap() = false;
    tracing::info!("token limiter store recovered, leaving rescue mode");
}
