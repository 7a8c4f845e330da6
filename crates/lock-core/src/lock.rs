use std::process;

use redis::Script;
use shared::{AppError, RedisClient};
use tokio::time::{Duration, sleep};
use tracing::{debug, warn};

const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

/// A single-resource distributed lock backed by `SET NX EX`, released by a
/// compare-and-delete Lua script so a lock can never be released by a holder
/// that isn't the one who acquired it.
pub struct DistributedLock {
    resource_name: String,
    redis_key: String,
    owner_token: String,
    expire_seconds: u64,
    redis: RedisClient,
    held: bool,
}

impl DistributedLock {
    pub fn new(redis: RedisClient, lock_prefix: &str, resource_name: &str, expire_seconds: u64) -> Self {
        let owner_token = format!(
            "{}-{:?}-{}",
            process::id(),
            std::thread::current().id(),
            uuid::Uuid::new_v4()
        );

        Self {
            redis_key: format!("{lock_prefix}:{resource_name}"),
            resource_name: resource_name.to_string(),
            owner_token,
            expire_seconds,
            redis,
            held: false,
        }
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Attempts to acquire the lock once, with no retries.
    pub async fn try_acquire(&mut self) -> bool {
        if !self.redis.is_connected() {
            warn!(resource = %self.resource_name, "cannot acquire lock: redis unavailable");
            return false;
        }

        let key = self.redis_key.clone();
        let token = self.owner_token.clone();
        let expire = self.expire_seconds;

        let result: Result<Option<String>, AppError> = self
            .redis
            .execute(move |mut conn| {
                let key = key.clone();
                let token = token.clone();
                async move {
                    redis::cmd("SET")
                        .arg(&key)
                        .arg(&token)
                        .arg("NX")
                        .arg("EX")
                        .arg(expire)
                        .query_async(&mut conn)
                        .await
                }
            })
            .await;

        match result {
            Ok(Some(_)) => {
                self.held = true;
                debug!(resource = %self.resource_name, "acquired lock");
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(resource = %self.resource_name, error = %e, "error acquiring lock");
                false
            }
        }
    }

    /// Acquires the lock, retrying up to `retry_times` with `retry_interval`
    /// between attempts when `blocking` is set.
    pub async fn acquire(&mut self, blocking: bool, retry_interval: Duration, retry_times: u32) -> bool {
        if self.try_acquire().await {
            return true;
        }
        if !blocking {
            return false;
        }

        for _ in 0..retry_times {
            sleep(retry_interval).await;
            if self.try_acquire().await {
                return true;
            }
        }

        warn!(
            resource = %self.resource_name,
            retry_times,
            "failed to acquire lock after retries"
        );
        false
    }

    /// Releases the lock if held by this token. Returns false if the lock was
    /// not held locally, or had already been taken over by another owner.
    pub async fn release(&mut self) -> bool {
        if !self.held {
            warn!(resource = %self.resource_name, "attempted to release a lock not held");
            return false;
        }

        let key = self.redis_key.clone();
        let token = self.owner_token.clone();

        let result: Result<i64, AppError> = self
            .redis
            .execute(move |mut conn| {
                let key = key.clone();
                let token = token.clone();
                async move {
                    Script::new(RELEASE_SCRIPT)
                        .key(&key)
                        .arg(&token)
                        .invoke_async(&mut conn)
                        .await
                }
            })
            .await;

        self.held = false;

        match result {
            Ok(1) => {
                debug!(resource = %self.resource_name, "released lock");
                true
            }
            Ok(_) => {
                warn!(resource = %self.resource_name, "lock was owned by another holder at release time");
                false
            }
            Err(e) => {
                warn!(resource = %self.resource_name, error = %e, "error releasing lock");
                false
            }
        }
    }
}
