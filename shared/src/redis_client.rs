use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisResult};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::AppError;

/// Point-in-time connection statistics, mirroring the fields a caller would
/// want from a `/health` or `/queue-status` response.
#[derive(Clone, Debug, serde::Serialize)]
pub struct RedisStats {
    pub connected: bool,
    pub healthy: bool,
    pub last_error: Option<String>,
    pub connection_failures: u32,
    pub redis_url: String,
}

struct Inner {
    client: Client,
    connection: RwLock<MultiplexedConnection>,
    connected: AtomicBool,
    healthy: AtomicBool,
    last_error: RwLock<Option<String>>,
    connection_failures: AtomicU32,
    last_status_check_millis: AtomicU64,
    reconnect_lock: Mutex<()>,
    cache_ttl: Duration,
    redis_url_masked: String,
    epoch: Instant,
}

/// Wraps a pooled Redis connection with cached liveness checks, a single
/// reconnect-and-retry on transport failure, and a background health-check
/// loop. Used as a drop-in executor for every Redis-backed crate in the
/// workspace (queue, locks, worker registry, rate limiter).
#[derive(Clone)]
pub struct RedisClient {
    inner: Arc<Inner>,
}

impl RedisClient {
    pub async fn connect(config: &Config) -> Result<Self, AppError> {
        let client = Client::open(config.redis_url.as_str())?;
        let connection = client.get_multiplexed_tokio_connection().await?;

        info!(url = %mask_url(&config.redis_url), "connected to redis");

        let inner = Arc::new(Inner {
            client,
            connection: RwLock::new(connection),
            connected: AtomicBool::new(true),
            healthy: AtomicBool::new(true),
            last_error: RwLock::new(None),
            connection_failures: AtomicU32::new(0),
            last_status_check_millis: AtomicU64::new(0),
            reconnect_lock: Mutex::new(()),
            cache_ttl: Duration::from_secs_f64(config.redis_cache_ttl_secs.max(0.0)),
            redis_url_masked: mask_url(&config.redis_url),
            epoch: Instant::now(),
        });

        Ok(Self { inner })
    }

    /// Spawns the background health-check loop. Logs the healthy/degraded
    /// transition once, not on every tick.
    pub fn spawn_health_check(&self, interval: Duration) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let was_healthy = inner.healthy.load(Ordering::Relaxed);

                let ping_result: RedisResult<String> = {
                    let mut conn = inner.connection.write().await;
                    redis::cmd("PING").query_async(&mut *conn).await
                };

                match ping_result {
                    Ok(_) => {
                        inner.healthy.store(true, Ordering::Relaxed);
                        inner.connected.store(true, Ordering::Relaxed);
                        if !was_healthy {
                            info!("redis connection restored to healthy state");
                        }
                    }
                    Err(e) => {
                        if was_healthy {
                            warn!(error = %e, "redis health check failed");
                        }
                        inner.healthy.store(false, Ordering::Relaxed);
                        *inner.last_error.write().await = Some(e.to_string());
                        drop(inner.try_reconnect().await);
                    }
                }

                inner.touch_status_check();
            }
        });
    }

    /// Cached liveness check. Real state is evaluated at most once per
    /// `redis_cache_ttl_secs`; callers in the hot path never block on a ping.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed) && self.inner.healthy.load(Ordering::Relaxed)
    }

    /// Freshness of the cached liveness check: `(cache_fresh, seconds_since_check)`.
    /// `cache_fresh` is true while the last check is still within `redis_cache_ttl_secs`,
    /// matching the window `is_connected` relies on without re-pinging.
    pub fn cache_status(&self) -> (bool, f64) {
        let last = self.inner.last_status_check_millis.load(Ordering::Relaxed);
        let elapsed = self.inner.epoch.elapsed().as_millis() as u64 - last;
        let since = Duration::from_millis(elapsed).as_secs_f64();
        (Duration::from_millis(elapsed) <= self.inner.cache_ttl, since)
    }

    pub async fn stats(&self) -> RedisStats {
        RedisStats {
            connected: self.inner.connected.load(Ordering::Relaxed),
            healthy: self.inner.healthy.load(Ordering::Relaxed),
            last_error: self.inner.last_error.read().await.clone(),
            connection_failures: self.inner.connection_failures.load(Ordering::Relaxed),
            redis_url: self.inner.redis_url_masked.clone(),
        }
    }

    /// Runs a closure against the shared connection, reconnecting and
    /// retrying exactly once on transport failure before giving up.
    pub async fn execute<F, Fut, T>(&self, op: F) -> Result<T, AppError>
    where
        F: Fn(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = RedisResult<T>>,
    {
        let conn = self.inner.connection.read().await.clone();
        match op(conn).await {
            Ok(value) => {
                self.inner.connected.store(true, Ordering::Relaxed);
                self.inner.healthy.store(true, Ordering::Relaxed);
                Ok(value)
            }
            Err(e) if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() => {
                warn!(error = %e, "redis command failed, attempting reconnect");
                self.inner.connected.store(false, Ordering::Relaxed);
                self.inner.healthy.store(false, Ordering::Relaxed);
                *self.inner.last_error.write().await = Some(e.to_string());
                self.inner.touch_status_check();

                if self.inner.try_reconnect().await {
                    let conn = self.inner.connection.read().await.clone();
                    Ok(op(conn).await?)
                } else {
                    Err(AppError::RedisUnavailable)
                }
            }
            Err(e) => Err(AppError::RedisError(e)),
        }
    }

    pub fn client(&self) -> Client {
        self.inner.client.clone()
    }
}

impl Inner {
    fn touch_status_check(&self) {
        let millis = self.epoch.elapsed().as_millis() as u64;
        self.last_status_check_millis.store(millis, Ordering::Relaxed);
    }

    /// Reconnects at most once, guarded by a mutex so concurrent callers
    /// don't all dial Redis simultaneously on a shared failure.
    async fn try_reconnect(&self) -> bool {
        let _guard = self.reconnect_lock.lock().await;

        if self.connected.load(Ordering::Relaxed) && self.healthy.load(Ordering::Relaxed) {
            return true;
        }

        match self.client.get_multiplexed_tokio_connection().await {
            Ok(new_connection) => {
                *self.connection.write().await = new_connection;
                self.connected.store(true, Ordering::Relaxed);
                self.healthy.store(true, Ordering::Relaxed);
                self.connection_failures.store(0, Ordering::Relaxed);
                *self.last_error.write().await = None;
                info!("reconnected to redis");
                true
            }
            Err(e) => {
                let failures = self.connection_failures.fetch_add(1, Ordering::Relaxed) + 1;
                self.connected.store(false, Ordering::Relaxed);
                self.healthy.store(false, Ordering::Relaxed);
                *self.last_error.write().await = Some(e.to_string());

                if failures <= 3 || failures % 10 == 0 {
                    warn!(error = %e, failures, "failed to reconnect to redis");
                }
                false
            }
        }
    }
}

fn mask_url(url: &str) -> String {
    match url.find('@') {
        Some(at) => match url.find("://") {
            Some(scheme_end) => format!("{}://***{}", &url[..scheme_end], &url[at..]),
            None => "***".to_string(),
        },
        None => url.to_string(),
    }
}
